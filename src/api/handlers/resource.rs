use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::api::handlers::integration::AppState;
use crate::api::middleware::AppError;
use crate::models::{
    DeleteRequest, InsertRequest, MutationStatus, PredictRequest, QuerySpec, ResourceDescriptor, ResultSet,
    UpdateRequest,
};
use crate::services::RegistrationPolicy;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterParams {
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DescribeParams {
    pub attribute: Option<String>,
}

/// List registered resources with the state of their tables
pub async fn list_resources(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let mut resources = Vec::new();
    for descriptor in state.catalog.resources().await {
        let table_state = state.catalog.table(&descriptor.name).await?.state().await;
        resources.push(serde_json::json!({
            "resource": &*descriptor,
            "state": table_state,
        }));
    }

    Ok(Json(serde_json::json!({
        "resources": resources
    })))
}

/// Register a descriptor; `?replace=true` overwrites an existing one
pub async fn create_resource(
    State(state): State<AppState>,
    Query(params): Query<RegisterParams>,
    Json(descriptor): Json<ResourceDescriptor>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let policy = if params.replace {
        RegistrationPolicy::Replace
    } else {
        RegistrationPolicy::Create
    };

    let table = state.catalog.register_resource(descriptor, policy).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "resource": table.descriptor().await.as_deref(),
            "state": table.state().await,
        })),
    ))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.catalog.remove_resource(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Declared schema, never touches the remote API
pub async fn get_columns(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let columns = state.catalog.table(&name).await?.get_columns().await?;
    Ok(Json(serde_json::json!({ "columns": columns })))
}

/// Run a query; failures still answer with an (empty) result next to the error
pub async fn select(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(query): Json<QuerySpec>,
) -> Response {
    tracing::info!("Select on resource '{}'", name);

    let table = match state.catalog.table(&name).await {
        Ok(table) => table,
        Err(e) => return failed_select(query.columns.clone(), e),
    };

    match table.select(&query).await {
        Ok(result) => Json(serde_json::json!({ "result": result })).into_response(),
        Err(e) => {
            tracing::warn!("Select on '{}' failed: {}", name, e);
            let columns = if query.columns.is_empty() {
                table
                    .get_columns()
                    .await
                    .map(|columns| columns.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default()
            } else {
                query.columns.clone()
            };
            failed_select(columns, e)
        }
    }
}

fn failed_select(columns: Vec<String>, error: AppError) -> Response {
    let body = serde_json::json!({
        "result": ResultSet::new(columns),
        "error": error.detail(),
    });
    let mut response = (error.status_code(), Json(body)).into_response();
    error.apply_retry_after(&mut response);
    response
}

pub async fn insert(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<InsertRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if payload.rows.is_empty() {
        return Err(AppError::Validation("Insert needs at least one row".to_string()));
    }
    let report = state.catalog.table(&name).await?.insert(payload.rows).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "report": report }))))
}

pub async fn update(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<UpdateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let status = state
        .catalog
        .table(&name)
        .await?
        .update(payload.filters, payload.changes)
        .await?;
    Ok(mutation_response(status))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<DeleteRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let status = state.catalog.table(&name).await?.delete(payload.filters).await?;
    Ok(mutation_response(status))
}

/// A missing target answers 404 so it never reads as a successful no-op
fn mutation_response(status: MutationStatus) -> (StatusCode, Json<serde_json::Value>) {
    let code = match status {
        MutationStatus::Applied { .. } => StatusCode::OK,
        MutationStatus::TargetMissing => StatusCode::NOT_FOUND,
    };
    (code, Json(serde_json::json!({ "result": status })))
}

pub async fn predict(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<PredictRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state.catalog.table(&name).await?.predict(payload.rows).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

pub async fn describe(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<DescribeParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .catalog
        .table(&name)
        .await?
        .describe(params.attribute.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "result": result })))
}
