use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::models::{BatchReport, PageToken, ResultSet};

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Translation unsupported: {0}")]
    TranslationUnsupported(String),

    #[error("Throttled by remote API: {}", .0.message)]
    Throttled(Box<ThrottleInfo>),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Partial batch failure: {} succeeded, {} failed", .0.succeeded.len(), .0.failed.len())]
    PartialBatchFailure(BatchReport),

    #[error("Remote error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    RemoteError { status: Option<u16>, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Rate-limit details, plus whatever was fetched before the limit hit
#[derive(Debug, Clone, Default)]
pub struct ThrottleInfo {
    pub message: String,
    pub retry_after: Option<Duration>,
    /// Rows from the pages fetched before the throttled one
    pub partial: ResultSet,
    /// Page to resume from when the caller retries
    pub resume_cursor: Option<PageToken>,
}

impl AppError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ConnectionFailure(_) => "CONNECTION_FAILURE",
            AppError::NotReady(_) => "NOT_READY",
            AppError::TranslationUnsupported(_) => "TRANSLATION_UNSUPPORTED",
            AppError::Throttled(_) => "THROTTLED",
            AppError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            AppError::PartialBatchFailure(_) => "PARTIAL_BATCH_FAILURE",
            AppError::RemoteError { .. } => "REMOTE_ERROR",
            AppError::Cancelled => "CANCELLED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ConnectionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotReady(_) => StatusCode::CONFLICT,
            AppError::TranslationUnsupported(_) => StatusCode::BAD_REQUEST,
            AppError::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::SchemaMismatch(_) => StatusCode::BAD_GATEWAY,
            AppError::PartialBatchFailure(_) => StatusCode::MULTI_STATUS,
            AppError::RemoteError { .. } => StatusCode::BAD_GATEWAY,
            AppError::Cancelled => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let detail = ErrorDetail::new(self.code(), self.to_string());
        match self {
            AppError::Throttled(info) => detail.with_details(json!({
                "retry_after_secs": info.retry_after.map(|d| d.as_secs()),
                "partial": info.partial,
                "resume_cursor": info.resume_cursor,
            })),
            AppError::PartialBatchFailure(report) => detail.with_details(json!(report)),
            AppError::RemoteError { status: Some(status), .. } => {
                detail.with_details(json!({ "remote_status": status }))
            }
            AppError::NotReady(_) => detail.with_details(json!(
                "Connect the integration before querying its resources."
            )),
            _ => detail,
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.detail(),
        });
        let mut response = (self.status_code(), body).into_response();
        self.apply_retry_after(&mut response);
        response
    }
}

impl AppError {
    /// Copy a throttling hint into the `Retry-After` header
    pub fn apply_retry_after(&self, response: &mut Response) {
        if let AppError::Throttled(info) = self {
            if let Some(delay) = info.retry_after {
                if let Ok(value) = HeaderValue::from_str(&delay.as_secs().max(1).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
        }
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("Invalid stored JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_format() {
        let error = AppError::NotFound("Resource contacts not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(detail.details.is_none());
    }

    #[test]
    fn test_throttled_sets_retry_after() {
        let error = AppError::Throttled(Box::new(ThrottleInfo {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(7)),
            ..Default::default()
        }));
        assert_eq!(error.code(), "THROTTLED");

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn test_kinds_are_distinct() {
        let throttled = AppError::Throttled(Box::default());
        let remote = AppError::RemoteError {
            status: Some(500),
            message: "boom".to_string(),
        };
        assert_ne!(throttled.code(), remote.code());
        assert_eq!(remote.to_string(), "Remote error (500): boom");
        assert_eq!(
            AppError::PartialBatchFailure(BatchReport::default()).status_code(),
            StatusCode::MULTI_STATUS
        );
    }
}
