use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::middleware::AppError;
use crate::models::{ConnectionState, ConnectionStatusReport, Session};
use crate::services::remote::Connectable;

/// Owns the session of one integration
///
/// Readers take an `Arc<Session>` snapshot under a short read lock and
/// release it before any I/O. `connect()` holds the write lock for the whole
/// handshake, so new readers wait for the fresh session while in-flight calls
/// finish on the snapshot they already hold.
pub struct ConnectionManager {
    integration: String,
    connector: Arc<dyn Connectable>,
    state: RwLock<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(integration: impl Into<String>, connector: Arc<dyn Connectable>) -> Self {
        Self {
            integration: integration.into(),
            connector,
            state: RwLock::new(ConnectionState::new()),
        }
    }

    pub fn integration(&self) -> &str {
        &self.integration
    }

    /// Establish or refresh the session; failures are reported, never retried here
    pub async fn connect(&self) -> ConnectionStatusReport {
        let mut state = self.state.write().await;

        match self.connector.authenticate().await {
            Ok(session) => {
                tracing::info!(
                    "Connected integration '{}' (session {})",
                    self.integration,
                    session.id
                );
                state.mark_connected(Arc::new(session));
                ConnectionStatusReport::from_state(&self.integration, &state, "Connected")
            }
            Err(e) => {
                tracing::error!("Failed to connect integration '{}': {}", self.integration, e);
                state.mark_error(e.to_string());
                ConnectionStatusReport::from_state(&self.integration, &state, e.to_string())
            }
        }
    }

    /// Probe the current session without replacing it
    ///
    /// A failed probe clears the connected flag; a successful one changes nothing.
    pub async fn check_connection(&self) -> ConnectionStatusReport {
        let session = {
            let state = self.state.read().await;
            match (&state.session, state.is_connected()) {
                (Some(session), true) => session.clone(),
                _ => {
                    let message = state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "Not connected".to_string());
                    return ConnectionStatusReport::from_state(&self.integration, &state, message);
                }
            }
        };

        match self.connector.probe(&session).await {
            Ok(()) => {
                let state = self.state.read().await;
                ConnectionStatusReport::from_state(&self.integration, &state, "Connection is alive")
            }
            Err(e) => {
                let mut state = self.state.write().await;
                // A reconnect may have replaced the session while we probed
                let same_session = state
                    .session
                    .as_ref()
                    .map(|current| Arc::ptr_eq(current, &session))
                    .unwrap_or(false);
                if same_session {
                    tracing::warn!(
                        "Connection check failed for integration '{}': {}",
                        self.integration,
                        e
                    );
                    state.mark_error(e.to_string());
                }
                let mut report = ConnectionStatusReport::from_state(&self.integration, &state, e.to_string());
                report.connected = false;
                report
            }
        }
    }

    /// Stable session snapshot for one call
    pub async fn session(&self) -> Result<Arc<Session>, AppError> {
        let state = self.state.read().await;
        match (&state.session, state.is_connected()) {
            (Some(session), true) => Ok(session.clone()),
            _ => Err(AppError::NotReady(format!(
                "Integration '{}' is not connected",
                self.integration
            ))),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    pub async fn snapshot(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Teardown: drop the session
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if state.session.is_some() {
            tracing::info!("Disconnecting integration '{}'", self.integration);
        }
        state.mark_disconnected();
    }
}
