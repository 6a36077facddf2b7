use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers::integration::{self, AppState};
use crate::api::handlers::resource;
use crate::services::TableCatalog;

/// Create router with application state
pub fn create_router_with_state(catalog: Arc<TableCatalog>) -> Router {
    let state = AppState { catalog };

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/integrations",
            get(integration::list_integrations).post(integration::create_integration),
        )
        .route(
            "/api/integrations/{name}",
            delete(integration::delete_integration),
        )
        .route(
            "/api/integrations/{name}/connect",
            post(integration::connect_integration),
        )
        .route(
            "/api/integrations/{name}/status",
            get(integration::integration_status),
        )
        .route(
            "/api/resources",
            get(resource::list_resources).post(resource::create_resource),
        )
        .route("/api/resources/{name}", delete(resource::delete_resource))
        .route("/api/resources/{name}/columns", get(resource::get_columns))
        .route("/api/resources/{name}/select", post(resource::select))
        .route("/api/resources/{name}/insert", post(resource::insert))
        .route("/api/resources/{name}/update", post(resource::update))
        .route("/api/resources/{name}/delete", post(resource::delete))
        .route("/api/resources/{name}/predict", post(resource::predict))
        .route("/api/resources/{name}/describe", get(resource::describe))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
