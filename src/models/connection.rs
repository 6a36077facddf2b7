use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One configured remote API shared by the resources registered against it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Path hit by `check_connection`, relative to `base_url`
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_probe_path() -> String {
    "/".to_string()
}

impl Integration {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth,
            probe_path: default_probe_path(),
            created_at: Utc::now(),
        }
    }

    pub fn with_probe_path(mut self, probe_path: impl Into<String>) -> Self {
        self.probe_path = probe_path.into();
        self
    }
}

#[derive(Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    ApiKey {
        header: String,
        key: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    /// OAuth2 client-credentials grant, exchanged for a bearer token on connect
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
    },
}

impl AuthConfig {
    pub fn scheme(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::ApiKey { .. } => "api_key",
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::ClientCredentials { .. } => "client_credentials",
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::None => write!(f, "None"),
            AuthConfig::Bearer { .. } => write!(f, "Bearer(***)"),
            AuthConfig::ApiKey { header, .. } => write!(f, "ApiKey({}: ***)", header),
            AuthConfig::Basic { username, .. } => write!(f, "Basic({}:***)", username),
            AuthConfig::ClientCredentials { token_url, client_id, .. } => {
                write!(f, "ClientCredentials({} @ {})", client_id, token_url)
            }
        }
    }
}

/// Credential material attached to every call made on a session
#[derive(Clone, PartialEq)]
pub enum Credential {
    Anonymous,
    Header { name: String, value: String },
    Basic { username: String, password: Option<String> },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Anonymous => write!(f, "Anonymous"),
            Credential::Header { name, .. } => write!(f, "Header({}: ***)", name),
            Credential::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

/// An established session against a remote API
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub integration: String,
    pub credential: Credential,
    pub established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(integration: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            integration: integration.into(),
            credential,
            established_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Session material plus liveness, owned by a `ConnectionManager`
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub session: Option<Arc<Session>>,
    pub status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            session: None,
            status: ConnectionStatus::Disconnected,
            last_connected_at: None,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected && self.session.is_some()
    }

    pub fn mark_connected(&mut self, session: Arc<Session>) {
        self.session = Some(session);
        self.status = ConnectionStatus::Connected;
        self.last_connected_at = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_disconnected(&mut self) {
        self.session = None;
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn mark_error(&mut self, message: String) {
        self.session = None;
        self.status = ConnectionStatus::Error;
        self.last_error = Some(message);
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of `connect()` / `check_connection()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatusReport {
    pub integration: String,
    pub connected: bool,
    pub status: ConnectionStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

impl ConnectionStatusReport {
    pub fn from_state(integration: &str, state: &ConnectionState, message: impl Into<String>) -> Self {
        Self {
            integration: integration.to_string(),
            connected: state.is_connected(),
            status: state.status.clone(),
            message: message.into(),
            session_id: state.session.as_ref().map(|s| s.id.clone()),
            last_connected_at: state.last_connected_at,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_debug_hides_secrets() {
        let auth = AuthConfig::ApiKey {
            header: "X-Api-Key".to_string(),
            key: "super-secret".to_string(),
        };
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("X-Api-Key"));
        assert!(!rendered.contains("super-secret"));

        let credential = Credential::Header {
            name: "Authorization".to_string(),
            value: "Bearer abc".to_string(),
        };
        assert!(!format!("{:?}", credential).contains("abc"));
    }

    #[test]
    fn test_integration_deserialize_defaults() {
        let integration: Integration = serde_json::from_value(serde_json::json!({
            "name": "crm",
            "base_url": "https://crm.example.com/api",
            "auth": { "type": "bearer", "token": "t0k" }
        }))
        .unwrap();
        assert_eq!(integration.probe_path, "/");
        assert_eq!(integration.auth, AuthConfig::Bearer { token: "t0k".to_string() });
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut state = ConnectionState::new();
        assert!(!state.is_connected());

        state.mark_connected(Arc::new(Session::new("crm", Credential::Anonymous)));
        assert!(state.is_connected());
        assert!(state.last_connected_at.is_some());

        state.mark_error("probe failed".to_string());
        assert!(!state.is_connected());
        assert_eq!(state.status, ConnectionStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some("probe failed"));
    }
}
