use crate::handlers::health_check;
use crate::ws::handler::ws_entry;
use crate::ws::registry::RoomRegistry;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create API routes. Everything that is not an API path falls through to
/// the WebSocket entry point, which serves upgrades and 404s the rest.
pub fn create_api_routes(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(ws_entry)
        .with_state(registry)
}
