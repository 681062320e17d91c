//! HINDSIGHT — Continuous calibration feedback loop for trading decisions
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the persistence layer, aggregators, engine, outbox, and API
//! server, then runs the outbox-drain loop with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use hindsight::api;
use hindsight::api::routes::ServiceState;
use hindsight::config::AppConfig;
use hindsight::engine::CalibrationEngine;
use hindsight::outbox::http::HttpSyncTarget;
use hindsight::outbox::{RetryOutbox, SyncTarget};
use hindsight::stats::anomaly::AnomalyDetector;
use hindsight::stats::calibration::CalibrationBook;
use hindsight::stats::correlation::CorrelationTracker;
use hindsight::stats::temporal::TemporalAnalyzer;
use hindsight::storage::JsonStore;

const BANNER: &str = r#"
 _   _ ___ _   _ ____  ____ ___ ____ _   _ _____
| | | |_ _| \ | |  _ \/ ___|_ _/ ___| | | |_   _|
| |_| || ||  \| | | | \___ \| | |  _| |_| | | |
|  _  || || |\  | |_| |___) | | |_| |  _  | | |
|_| |_|___|_| \_|____/|____/___\____|_| |_| |_|

  Decision Calibration Feedback Loop
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        service_name = %cfg.service.name,
        data_dir = %cfg.service.data_dir,
        horizons = ?cfg.observation.horizons_days,
        "HINDSIGHT starting up"
    );

    // -- Persistence and aggregators --------------------------------------

    let store = JsonStore::new(&cfg.service.data_dir);

    let calibration = Arc::new(CalibrationBook::new(store.clone()));
    let anomaly = Arc::new(AnomalyDetector::new(store.clone()));
    let correlation = Arc::new(CorrelationTracker::new(store.clone()));
    let temporal = Arc::new(TemporalAnalyzer::new(store.clone()));

    let engine = Arc::new(CalibrationEngine::new(
        store.clone(),
        cfg.observation.horizons_days.clone(),
        calibration,
        anomaly.clone(),
        correlation.clone(),
        temporal.clone(),
    ));

    info!(pending = engine.pending_count().await, "Observation state restored");

    // -- Sync target and outbox -------------------------------------------

    let target: Arc<dyn SyncTarget> = match &cfg.sync.endpoint {
        Some(endpoint) => {
            let api_key = cfg.sync.api_key_env.as_deref()
                .and_then(|env| std::env::var(env).ok());
            if api_key.is_none() {
                warn!("Sync endpoint configured without an API key");
            }
            info!(endpoint = %endpoint, "Using HTTP sync target");
            Arc::new(HttpSyncTarget::new(endpoint.clone(), api_key)?)
        }
        None => {
            warn!("No sync endpoint configured — outbox entries will retry against a void");
            Arc::new(NullSyncTarget)
        }
    };

    let outbox = Arc::new(RetryOutbox::new(
        store,
        target,
        cfg.outbox.max_retries,
    ));

    // -- API server --------------------------------------------------------

    let state = Arc::new(ServiceState {
        engine,
        anomaly,
        correlation,
        temporal,
        outbox: outbox.clone(),
    });
    api::spawn_api_server(state, cfg.service.port);

    // -- Outbox-drain loop -------------------------------------------------

    let retry_interval = Duration::from_secs(cfg.service.retry_interval_secs);
    let mut interval = tokio::time::interval(retry_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.service.retry_interval_secs,
        "Entering outbox-drain loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if outbox.has_pending_items().await {
                    outbox.process_retry_queue().await;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(
        pending_syncs = outbox.queue_count().await,
        "HINDSIGHT shut down cleanly."
    );

    Ok(())
}

/// Sink used when no remote endpoint is configured. Always fails, so
/// entries age out of the outbox at the retry ceiling.
struct NullSyncTarget;

#[async_trait::async_trait]
impl SyncTarget for NullSyncTarget {
    async fn upsert_document(
        &self,
        _namespace: &str,
        _id: &str,
        _text: &str,
        _metadata: &std::collections::HashMap<String, String>,
    ) -> Result<()> {
        anyhow::bail!("no sync endpoint configured")
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hindsight=info"));

    let json_logging = std::env::var("HINDSIGHT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
