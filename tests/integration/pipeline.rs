//! End-to-end feedback-loop tests.
//!
//! Drive the full observe → mature → poll → aggregate path against a
//! temp data directory, exercising the same persistence files the
//! service uses in production.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;

use hindsight::api::routes::ServiceState;
use hindsight::api::build_router;
use hindsight::engine::CalibrationEngine;
use hindsight::outbox::RetryOutbox;
use hindsight::stats::anomaly::AnomalyDetector;
use hindsight::stats::calibration::CalibrationBook;
use hindsight::stats::correlation::CorrelationTracker;
use hindsight::stats::temporal::TemporalAnalyzer;
use hindsight::storage::{JsonStore, PENDING_OBSERVATIONS};
use hindsight::types::{Action, PendingObservation};

use crate::mock_sync::MockSyncTarget;

fn temp_dir() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("hindsight_it_{}", uuid::Uuid::new_v4()));
    p
}

fn build_engine(dir: &PathBuf) -> CalibrationEngine {
    let store = JsonStore::new(dir.clone());
    CalibrationEngine::new(
        store.clone(),
        vec![7, 15],
        Arc::new(CalibrationBook::new(store.clone())),
        Arc::new(AnomalyDetector::new(store.clone())),
        Arc::new(CorrelationTracker::new(store.clone())),
        Arc::new(TemporalAnalyzer::new(store)),
    )
}

fn scores(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(m, s)| (m.to_string(), *s)).collect()
}

/// Rewind every persisted observation's decision date so horizons mature.
/// Uses the same dataset file the engine persists to; callers must drop
/// or recreate the engine afterwards so the cache reloads from disk.
fn age_persisted_observations(dir: &PathBuf, days: i64) {
    let store = JsonStore::new(dir.clone());
    let mut pending: Vec<PendingObservation> = store.load(PENDING_OBSERVATIONS);
    assert!(!pending.is_empty(), "nothing persisted to age");
    for obs in &mut pending {
        obs.decision_date -= Duration::days(days);
    }
    store.save(PENDING_OBSERVATIONS, &pending);
}

#[tokio::test]
async fn test_full_feedback_loop() {
    let dir = temp_dir();

    let engine = build_engine(&dir);
    engine
        .observe(
            "AAPL",
            Action::Buy,
            scores(&[("orion", 85.0), ("atlas", 82.0), ("hermes", 40.0)]),
            "risk_on",
            100.0,
        )
        .await;
    engine
        .observe("THYAO.IS", Action::Sell, scores(&[("orion", 55.0)]), "risk_off", 50.0)
        .await;
    assert_eq!(engine.pending_count().await, 2);
    drop(engine);

    // Both horizons of both observations mature.
    age_persisted_observations(&dir, 16);

    let engine = build_engine(&dir);
    let prices = HashMap::from([
        ("AAPL".to_string(), 110.0),  // BUY and the price rose: correct
        ("THYAO.IS".to_string(), 60.0), // SELL but the price rose: incorrect
    ]);
    let evaluated = engine.process_matured_decisions(&prices).await;
    assert_eq!(evaluated, 4);
    assert_eq!(engine.pending_count().await, 0);

    // Calibration: both granularities are reachable from the snapshot.
    let snapshot = engine.current_stats().await;
    let orion = &snapshot.calibration.modules["orion"];
    assert_eq!(orion.brackets["80-100"].attempts, 2);
    assert_eq!(orion.brackets["80-100"].correct, 2);
    assert_eq!(orion.brackets["40-60"].attempts, 2);
    assert_eq!(orion.brackets["40-60"].correct, 0);
    let atlas = &snapshot.calibration.modules["atlas"];
    assert_eq!(atlas.brackets["80-100"].attempts, 2);
    assert!(snapshot.calibration.regimes.contains_key("risk_on"));
    assert!(snapshot.calibration.regimes.contains_key("risk_off"));
}

#[tokio::test]
async fn test_correlation_and_anomaly_feeds() {
    let dir = temp_dir();
    let store = JsonStore::new(dir.clone());
    let anomaly = Arc::new(AnomalyDetector::new(store.clone()));
    let correlation = Arc::new(CorrelationTracker::new(store.clone()));
    let engine = CalibrationEngine::new(
        store.clone(),
        vec![7, 15],
        Arc::new(CalibrationBook::new(store.clone())),
        anomaly.clone(),
        correlation.clone(),
        Arc::new(TemporalAnalyzer::new(store)),
    );

    engine
        .observe(
            "AAPL",
            Action::Buy,
            scores(&[("orion", 85.0), ("atlas", 82.0), ("hermes", 40.0)]),
            "risk_on",
            100.0,
        )
        .await;
    drop(engine);
    age_persisted_observations(&dir, 16);

    let engine = build_engine(&dir);
    let prices = HashMap::from([("AAPL".to_string(), 110.0)]);
    assert_eq!(engine.process_matured_decisions(&prices).await, 2);

    // Aggregators share the data directory, so reopened instances see
    // what the engine's own instances persisted.
    let store = JsonStore::new(dir.clone());
    let anomaly = AnomalyDetector::new(store.clone());
    let orion = anomaly.stats_for("orion").await.unwrap();
    assert_eq!(orion.all_time_scores.len(), 2);

    // Only orion and atlas qualify (hermes scored below 60), so the
    // single combination key covers both horizon evaluations.
    let correlation = CorrelationTracker::new(store);
    let significant = correlation.significant(1).await;
    assert_eq!(significant.len(), 1);
    let (key, stats) = &significant[0];
    assert_eq!(key, "atlas_80+_orion_80+");
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.correct, 2);
}

#[tokio::test]
async fn test_api_round_trip() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let dir = temp_dir();
    let store = JsonStore::new(dir.clone());
    let calibration = Arc::new(CalibrationBook::new(store.clone()));
    let anomaly = Arc::new(AnomalyDetector::new(store.clone()));
    let correlation = Arc::new(CorrelationTracker::new(store.clone()));
    let temporal = Arc::new(TemporalAnalyzer::new(store.clone()));
    let engine = Arc::new(CalibrationEngine::new(
        store.clone(),
        vec![7, 15],
        calibration,
        anomaly.clone(),
        correlation.clone(),
        temporal.clone(),
    ));
    let outbox = Arc::new(RetryOutbox::new(store, Arc::new(MockSyncTarget::new()), 3));
    let state = Arc::new(ServiceState {
        engine,
        anomaly,
        correlation,
        temporal,
        outbox,
    });

    // Observe through the API.
    let body = serde_json::json!({
        "symbol": "AAPL",
        "action": "BUY",
        "module_scores": {"orion": 85.0, "atlas": 82.0},
        "regime": "risk_on",
        "price": 100.0
    });
    let resp = build_router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/observe")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Age the persisted observation, then poll through the API. The
    // engine caches pending observations, so the poll goes through a
    // state rebuilt on the same data directory.
    age_persisted_observations(&dir, 16);

    let store = JsonStore::new(dir.clone());
    let calibration = Arc::new(CalibrationBook::new(store.clone()));
    let anomaly = Arc::new(AnomalyDetector::new(store.clone()));
    let correlation = Arc::new(CorrelationTracker::new(store.clone()));
    let temporal = Arc::new(TemporalAnalyzer::new(store.clone()));
    let engine = Arc::new(CalibrationEngine::new(
        store.clone(),
        vec![7, 15],
        calibration,
        anomaly.clone(),
        correlation.clone(),
        temporal.clone(),
    ));
    let outbox = Arc::new(RetryOutbox::new(store, Arc::new(MockSyncTarget::new()), 3));
    let state = Arc::new(ServiceState {
        engine,
        anomaly,
        correlation,
        temporal,
        outbox,
    });

    let poll = serde_json::json!({"prices": {"AAPL": 110.0}});
    let resp = build_router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/poll")
                .header("content-type", "application/json")
                .body(Body::from(poll.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["evaluated"], 2);
    assert_eq!(json["pending"], 0);

    // Stats reflect the evaluations.
    let resp = build_router(state)
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["pending_count"], 0);
    assert_eq!(json["modules"]["orion"]["brackets"]["80-100"]["attempts"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_outbox_replays_until_ceiling() {
    let dir = temp_dir();
    let target = Arc::new(MockSyncTarget::new());
    target.fail_document("doc-bad");

    let outbox = RetryOutbox::new(JsonStore::new(dir.clone()), target.clone(), 3);
    outbox
        .enqueue(hindsight::types::FailedSync::new(
            "insights",
            "doc-bad",
            "orion hit rate degraded in risk_off",
            HashMap::new(),
        ))
        .await;
    outbox
        .enqueue(hindsight::types::FailedSync::new(
            "insights",
            "doc-ok",
            "atlas calibration stable",
            HashMap::new(),
        ))
        .await;
    assert_eq!(outbox.queue_count().await, 2);

    // Pass 1: doc-ok succeeds and leaves, doc-bad fails.
    outbox.process_retry_queue().await;
    assert_eq!(target.attempts_for("doc-ok"), 1);
    assert_eq!(outbox.queue_count().await, 1);

    // Passes 2 and 3: doc-bad keeps failing with growing backoff until
    // the retry ceiling drops it.
    outbox.process_retry_queue().await;
    outbox.process_retry_queue().await;
    assert_eq!(target.attempts_for("doc-bad"), 3);
    assert_eq!(outbox.queue_count().await, 0);

    // Later passes have nothing to do.
    outbox.process_retry_queue().await;
    assert_eq!(target.attempts_for("doc-bad"), 3);
}

#[tokio::test]
async fn test_outbox_survives_restart_between_passes() {
    let dir = temp_dir();
    let target = Arc::new(MockSyncTarget::new());
    target.set_error("endpoint down");

    let outbox = RetryOutbox::new(JsonStore::new(dir.clone()), target.clone(), 3);
    outbox
        .enqueue(hindsight::types::FailedSync::new(
            "insights",
            "doc-1",
            "body",
            HashMap::new(),
        ))
        .await;
    outbox.process_retry_queue().await;
    assert_eq!(outbox.queue_count().await, 1);
    drop(outbox);

    // Endpoint recovers across a restart; the persisted entry drains.
    target.clear_error();
    let outbox = RetryOutbox::new(JsonStore::new(dir), target.clone(), 3);
    assert!(outbox.has_pending_items().await);
    tokio::time::pause();
    outbox.process_retry_queue().await;
    assert_eq!(outbox.queue_count().await, 0);
    assert_eq!(target.attempts_for("doc-1"), 2);
}
