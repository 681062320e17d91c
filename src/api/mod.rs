//! HTTP API — Axum server exposing the feedback loop.
//!
//! The decision engine pushes observations and price polls in; reporting
//! consumers pull calibration, anomaly, correlation, and temporal views
//! out. CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Start the API server. Spawns a background task and returns.
pub fn spawn_api_server(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "API server starting on http://localhost:{port}");

        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "Failed to bind API port");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/observe", post(routes::post_observe))
        .route("/api/poll", post(routes::post_poll))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/anomalies", get(routes::get_anomalies))
        .route("/api/correlations", get(routes::get_correlations))
        .route("/api/temporal", get(routes::get_temporal))
        .route("/api/outbox", post(routes::post_outbox).get(routes::get_outbox))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
