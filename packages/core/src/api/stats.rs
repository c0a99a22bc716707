//! `GET /stats`: delivery counters.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::Value;

use super::SharedState;
use crate::relay::types::DeliveryStats;

pub async fn get_stats(
    State(state): State<SharedState>,
) -> Result<Json<DeliveryStats>, (StatusCode, Json<Value>)> {
    state.dedup.stats().await.map(Json).map_err(|err| {
        tracing::error!("stats query failed: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
    })
}
