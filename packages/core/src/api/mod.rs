//! Operational HTTP API.
//!
//! Routes:
//! - `GET  /health`: liveness
//! - `GET  /stats`: delivery counters from the dedup store
//! - `GET  /status`: current orchestration loop state
//! - `POST /cycle`: cut the current sleep short
//! - `POST /stop`: stop the loop after the send in flight
//! - `GET  /metrics`: Prometheus exposition

pub mod control;
pub mod health;
pub mod stats;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::metrics::RelayMetrics;
use crate::relay::dedup::DedupStore;
use crate::scheduler::LoopControl;

/// Shared state behind every route.
pub struct ApiState {
    pub dedup: Arc<dyn DedupStore>,
    pub control: LoopControl,
    pub metrics: Arc<RelayMetrics>,
}

pub type SharedState = Arc<ApiState>;

/// Assemble the full router, as served by `main.rs`.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(stats::get_stats))
        .route("/status", get(control::get_status))
        .route("/cycle", post(control::trigger_cycle))
        .route("/stop", post(control::stop_loop))
        .route("/metrics", get(control::get_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
