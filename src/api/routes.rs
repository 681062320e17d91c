//! API route handlers.
//!
//! All endpoints speak JSON. State is shared via `Arc<ServiceState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::CalibrationEngine;
use crate::outbox::RetryOutbox;
use crate::stats::anomaly::{AnomalyAlert, AnomalyDetector};
use crate::stats::correlation::CorrelationTracker;
use crate::stats::temporal::{TemporalAnalyzer, TemporalAnomaly};
use crate::types::{Action, FailedSync};

const DEFAULT_Z_THRESHOLD: f64 = 1.5;
const DEFAULT_DEVIATION_THRESHOLD: f64 = 0.15;
const DEFAULT_TOP_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ServiceState {
    pub engine: Arc<CalibrationEngine>,
    pub anomaly: Arc<AnomalyDetector>,
    pub correlation: Arc<CorrelationTracker>,
    pub temporal: Arc<TemporalAnalyzer>,
    pub outbox: Arc<RetryOutbox>,
}

pub type AppState = Arc<ServiceState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ObserveRequest {
    pub symbol: String,
    pub action: Action,
    pub module_scores: HashMap<String, f64>,
    #[serde(default = "default_regime")]
    pub regime: String,
    pub price: f64,
}

fn default_regime() -> String {
    "unknown".to_string()
}

#[derive(Debug, Serialize)]
pub struct ObserveResponse {
    pub tracked: bool,
    pub pending: usize,
}

#[derive(Debug, Deserialize)]
pub struct PollRequest {
    pub prices: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub evaluated: usize,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pending_count: usize,
    pub top_module: Option<RankedModule>,
    pub weakest_module: Option<RankedModule>,
    pub last_updated: String,
    pub modules: serde_json::Value,
    pub regimes: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RankedModule {
    pub module: String,
    pub hit_rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    pub threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CorrelationEntry {
    pub combination: String,
    pub hit_rate: f64,
    pub samples: u64,
}

#[derive(Debug, Deserialize)]
pub struct OutboxRequest {
    pub namespace: String,
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct OutboxResponse {
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/observe
pub async fn post_observe(
    State(state): State<AppState>,
    Json(req): Json<ObserveRequest>,
) -> Json<ObserveResponse> {
    let tracked = state
        .engine
        .observe(&req.symbol, req.action, req.module_scores, &req.regime, req.price)
        .await;
    Json(ObserveResponse {
        tracked,
        pending: state.engine.pending_count().await,
    })
}

/// POST /api/poll
pub async fn post_poll(
    State(state): State<AppState>,
    Json(req): Json<PollRequest>,
) -> Json<PollResponse> {
    let evaluated = state.engine.process_matured_decisions(&req.prices).await;
    Json(PollResponse {
        evaluated,
        pending: state.engine.pending_count().await,
    })
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let snapshot = state.engine.current_stats().await;
    let ranked = |pair: Option<(String, f64)>| {
        pair.map(|(module, hit_rate)| RankedModule { module, hit_rate })
    };
    Json(StatsResponse {
        pending_count: snapshot.pending_count,
        top_module: ranked(snapshot.top_module()),
        weakest_module: ranked(snapshot.weakest_module()),
        last_updated: snapshot.calibration.last_updated.to_rfc3339(),
        modules: serde_json::to_value(&snapshot.calibration.modules).unwrap_or_default(),
        regimes: serde_json::to_value(&snapshot.calibration.regimes).unwrap_or_default(),
    })
}

/// GET /api/anomalies?threshold=
pub async fn get_anomalies(
    State(state): State<AppState>,
    Query(query): Query<ThresholdQuery>,
) -> Json<Vec<AnomalyAlert>> {
    let threshold = query.threshold.unwrap_or(DEFAULT_Z_THRESHOLD);
    Json(state.anomaly.detect_anomalies(threshold).await)
}

/// GET /api/correlations?count=
pub async fn get_correlations(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Json<Vec<CorrelationEntry>> {
    let count = query.count.unwrap_or(DEFAULT_TOP_COUNT);
    let entries = state
        .correlation
        .top(count)
        .await
        .into_iter()
        .map(|(combination, hit_rate, samples)| CorrelationEntry {
            combination,
            hit_rate,
            samples,
        })
        .collect();
    Json(entries)
}

/// GET /api/temporal?threshold=
pub async fn get_temporal(
    State(state): State<AppState>,
    Query(query): Query<ThresholdQuery>,
) -> Json<Vec<TemporalAnomaly>> {
    let threshold = query.threshold.unwrap_or(DEFAULT_DEVIATION_THRESHOLD);
    Json(state.temporal.temporal_anomalies(threshold).await)
}

/// POST /api/outbox
pub async fn post_outbox(
    State(state): State<AppState>,
    Json(req): Json<OutboxRequest>,
) -> Json<OutboxResponse> {
    state
        .outbox
        .enqueue(FailedSync::new(
            &req.namespace,
            &req.document_id,
            &req.text,
            req.metadata,
        ))
        .await;
    Json(OutboxResponse {
        pending: state.outbox.queue_count().await,
    })
}

/// GET /api/outbox
pub async fn get_outbox(State(state): State<AppState>) -> Json<OutboxResponse> {
    Json(OutboxResponse {
        pending: state.outbox.queue_count().await,
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
