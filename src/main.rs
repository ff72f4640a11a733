mod config;
mod docs;
mod handlers;
mod models;
mod routes;
mod ws;

use axum::http::{header, HeaderValue, Method};
use config::Config;
use docs::ApiDoc;
use routes::create_api_routes;
use std::panic;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use ws::engine::RelayEngine;
use ws::registry::RoomRegistry;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "whiteboard_sync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting sync server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // The room registry lives for the whole process; every connection and
    // every reaper task shares this one instance.
    let registry = RoomRegistry::new(RelayEngine::factory(), config.room_idle_timeout());

    let cors_origin = config.cors_origin.parse::<HeaderValue>().unwrap_or_else(|_| {
        warn!(
            "Invalid CORS_ORIGIN '{}', falling back to http://localhost:3000",
            config.cors_origin
        );
        HeaderValue::from_static("http://localhost:3000")
    });
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // Combine all routes
    let app_routes = create_api_routes(registry)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    // One listener serves health checks and WebSocket upgrades
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Sync server running on http://{}", config.server_address());
    info!(
        "📡 WebSocket available at ws://{}/board/<boardId>",
        config.server_address()
    );
    info!("🌐 CORS origin: {}", config.cors_origin);

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
