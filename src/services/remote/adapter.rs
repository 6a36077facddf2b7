// Capability traits for remote API backends
use crate::api::middleware::AppError;
use crate::models::{HttpMethod, Session};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// One request against a remote API, already rendered for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query.extend(query);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw remote response: status, decoded body and the rate-limit hint
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
    pub retry_after: Option<Duration>,
}

impl RawResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            retry_after: None,
        }
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            retry_after: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_throttled(&self) -> bool {
        self.status == 429
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Best-effort error text from the body
    pub fn error_message(&self) -> String {
        match &self.body {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Object(obj) => ["message", "error", "detail"]
                .iter()
                .find_map(|key| match obj.get(*key) {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Object(inner)) => {
                        inner.get("message").and_then(Value::as_str).map(str::to_string)
                    }
                    _ => None,
                })
                .unwrap_or_else(|| self.body.to_string()),
            Value::Null => format!("HTTP {}", self.status),
            other => other.to_string(),
        }
    }
}

/// Failures below the HTTP layer; always considered transient
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Io(String),
}

/// Session establishment and liveness probing
#[async_trait::async_trait]
pub trait Connectable: Send + Sync {
    /// Establish a fresh session (token exchange, credential setup)
    async fn authenticate(&self) -> Result<Session, AppError>;

    /// Lightweight round-trip proving the session still works
    async fn probe(&self, session: &Session) -> Result<(), AppError>;
}

/// Executes one rendered request on an established session
#[async_trait::async_trait]
pub trait Queryable: Send + Sync {
    async fn call(&self, session: &Session, request: &RemoteRequest) -> Result<RawResponse, TransportError>;
}
