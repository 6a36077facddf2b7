// Remote API backends behind the capability traits
pub mod adapter;
pub mod http;
#[cfg(test)]
pub mod testing;

pub use adapter::{Connectable, Queryable, RawResponse, RemoteRequest, TransportError};
pub use http::HttpRemote;

use crate::api::middleware::AppError;
use crate::models::Integration;
use std::sync::Arc;
use std::time::Duration;

/// Factory function to create the backend for an integration
pub fn create_remote(integration: &Integration, timeout: Duration) -> Result<Arc<HttpRemote>, AppError> {
    Ok(Arc::new(HttpRemote::new(integration.clone(), timeout)?))
}
