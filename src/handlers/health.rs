use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::debug;

use crate::models::HealthResponse;
use crate::ws::registry::RoomRegistry;

/// Health check endpoint: process liveness plus the current room count.
pub async fn health_check(State(registry): State<Arc<RoomRegistry>>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        rooms: registry.count().await,
    })
}
