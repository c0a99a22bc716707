//! Loop control and observability endpoints.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::SharedState;
use crate::scheduler::LoopState;

/// `GET /status`: what the orchestration loop is doing.
pub async fn get_status(State(state): State<SharedState>) -> Json<LoopState> {
    Json(state.control.state().await)
}

/// `POST /cycle`: start the next cycle without waiting for the interval.
pub async fn trigger_cycle(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    if state.control.is_stopped() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "relay loop is stopped" })),
        );
    }
    state.control.trigger_cycle_now();
    tracing::info!("cycle requested over HTTP");
    (StatusCode::ACCEPTED, Json(json!({ "triggered": true })))
}

/// `POST /stop`: stop the loop. Idempotent.
pub async fn stop_loop(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    state.control.stop();
    tracing::info!("stop requested over HTTP");
    (StatusCode::ACCEPTED, Json(json!({ "stopping": true })))
}

/// `GET /metrics`: Prometheus text format.
pub async fn get_metrics(State(state): State<SharedState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("metrics render failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, Body::from("metrics error")).into_response()
        }
    }
}
