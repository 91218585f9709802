use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{events, manifest, AppState};
use crate::services::TriggerDispatcher;

/// Create router with application state
pub fn create_router_with_state(
    dispatcher: Arc<TriggerDispatcher>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) -> Router {
    let state = AppState {
        dispatcher,
        shutdown,
        tasks,
    };

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/manifestToSQL",
            get(manifest::manifest_to_sql).post(manifest::manifest_to_sql),
        )
        .route(
            "/api/manifestToSQLDDL",
            get(manifest::manifest_to_sql_ddl).post(manifest::manifest_to_sql_ddl),
        )
        .route(
            "/api/getMetadata",
            get(manifest::get_metadata).post(manifest::get_metadata),
        )
        .route("/api/events/storage", post(events::storage_events))
        .route("/api/queue/messages", post(events::queue_message))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
