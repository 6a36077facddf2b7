use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{AuthConfig, Integration};
use crate::services::remote::HttpRemote;
use crate::services::TableCatalog;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<TableCatalog>,
}

#[derive(Debug, Deserialize)]
pub struct CreateIntegrationRequest {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub probe_path: Option<String>,
}

/// Public view of an integration; secrets never leave the process
#[derive(Debug, Serialize)]
pub struct IntegrationView {
    pub name: String,
    pub base_url: String,
    pub auth: &'static str,
    pub probe_path: String,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
}

impl IntegrationView {
    fn new(integration: &Integration, connected: bool) -> Self {
        Self {
            name: integration.name.clone(),
            base_url: HttpRemote::mask_credentials(&integration.base_url),
            auth: integration.auth.scheme(),
            probe_path: integration.probe_path.clone(),
            connected,
            created_at: integration.created_at,
        }
    }
}

/// List all integrations
pub async fn list_integrations(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let mut views = Vec::new();
    for integration in state.catalog.integrations().await {
        let connected = state.catalog.integration(&integration.name).await?.connection.is_connected().await;
        views.push(IntegrationView::new(&integration, connected));
    }

    Ok(Json(serde_json::json!({
        "integrations": views
    })))
}

/// Add a remote API; it stays disconnected until `connect` is called
pub async fn create_integration(
    State(state): State<AppState>,
    Json(payload): Json<CreateIntegrationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Integration name cannot be empty".to_string()));
    }
    if payload.base_url.trim().is_empty() {
        return Err(AppError::Validation("Base URL cannot be empty".to_string()));
    }

    let mut integration = Integration::new(name, payload.base_url.trim(), payload.auth);
    if let Some(probe_path) = payload.probe_path {
        integration = integration.with_probe_path(probe_path);
    }

    tracing::info!(
        "Creating integration '{}' at {}",
        integration.name,
        HttpRemote::mask_credentials(&integration.base_url)
    );
    let handle = state.catalog.add_integration(integration).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "integration": IntegrationView::new(&handle.integration, false)
        })),
    ))
}

/// Authenticate; a rejected handshake answers 503 with the report
pub async fn connect_integration(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let report = state.catalog.connect_integration(&name).await?;
    let status = if report.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(serde_json::json!({ "connection": report }))))
}

/// Probe the current session without reconnecting
pub async fn integration_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state.catalog.check_integration(&name).await?;
    Ok(Json(serde_json::json!({ "connection": report })))
}

/// Remove an integration; its resources go with it
pub async fn delete_integration(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.catalog.remove_integration(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
