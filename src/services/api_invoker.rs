// API Invoker
//
// Performs remote calls for a resource: paginated listings assembled into a
// ResultSet, and single create/update/delete/predict calls. Transient
// failures (transport errors, timeouts, 5xx) are retried with exponential
// backoff; 4xx responses are returned immediately and 429 surfaces as
// `Throttled` so the caller can back off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::api::middleware::{AppError, ThrottleInfo};
use crate::models::{ColumnMapping, ResourceDescriptor, ResultSet, Session};
use crate::services::pagination::Paginatable;
use crate::services::query_translator::RemoteCall;
use crate::services::remote::{Queryable, RawResponse, RemoteRequest};
use crate::services::ConnectionManager;
use crate::validation::SchemaValidator;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Cooperative cancellation, checked between page fetches
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ApiInvoker {
    remote: Arc<dyn Queryable>,
    connection: Arc<ConnectionManager>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ApiInvoker {
    pub fn new(
        remote: Arc<dyn Queryable>,
        connection: Arc<ConnectionManager>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            connection,
            retry,
            call_timeout,
        }
    }

    /// Fetch pages in cursor order until the limit is met or the API runs out
    pub async fn call(
        &self,
        descriptor: &ResourceDescriptor,
        call: &RemoteCall,
        cancel: &CancellationFlag,
    ) -> Result<ResultSet, AppError> {
        let session = self.connection.session().await?;
        let columns = Self::projected_columns(descriptor, &call.projection)?;
        let pager: &dyn Paginatable = &descriptor.pagination;

        let mut result = ResultSet::new(call.projection.clone());
        let mut token = pager.first_token();
        let mut pages = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Listing of '{}' cancelled after {} page(s)", descriptor.name, pages);
                return Err(AppError::Cancelled);
            }

            let remaining = call.limit.map(|limit| limit.saturating_sub(result.len()));
            if remaining == Some(0) {
                break;
            }

            let page_size = pager.request_size(remaining);
            let request = RemoteRequest::new(call.endpoint.method, call.endpoint.path.clone())
                .with_query(call.params.clone())
                .with_query(pager.page_params(&token, page_size));

            let response = match self.send(&session, &request).await {
                Ok(response) => response,
                Err(AppError::Throttled(mut info)) => {
                    tracing::warn!(
                        "Listing of '{}' throttled on page {} with {} row(s) collected",
                        descriptor.name,
                        pages + 1,
                        result.len()
                    );
                    info.partial = result;
                    info.resume_cursor = Some(token);
                    return Err(AppError::Throttled(info));
                }
                Err(e) => return Err(e),
            };
            pages += 1;

            let records = SchemaValidator::extract_records(&response.body, descriptor.rows_path.as_deref())?;
            let received = records.len();
            tracing::debug!("Page {} of '{}' returned {} record(s)", pages, descriptor.name, received);

            if received == 0 {
                break;
            }

            for record in records {
                if call.limit.map(|limit| result.len() >= limit).unwrap_or(false) {
                    break;
                }
                result.push(SchemaValidator::map_record(&columns, record)?);
            }

            match pager.next_token(&token, &response.body, received, page_size) {
                Some(next) => token = next,
                None => break,
            }
        }

        tracing::info!(
            "Fetched {} row(s) from '{}' in {} page(s)",
            result.len(),
            descriptor.name,
            pages
        );
        Ok(result)
    }

    /// One non-paginated call on the current session
    pub async fn execute(&self, request: &RemoteRequest) -> Result<RawResponse, AppError> {
        let session = self.connection.session().await?;
        self.send(&session, request).await
    }

    async fn send(&self, session: &Session, request: &RemoteRequest) -> Result<RawResponse, AppError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let outcome = tokio::time::timeout(self.call_timeout, self.remote.call(session, request)).await;
            let (status, failure) = match outcome {
                Err(_) => (None, format!("call timed out after {:?}", self.call_timeout)),
                Ok(Err(e)) => (None, e.to_string()),
                Ok(Ok(response)) if response.is_success() => return Ok(response),
                Ok(Ok(response)) if response.is_throttled() => {
                    return Err(AppError::Throttled(Box::new(ThrottleInfo {
                        message: response.error_message(),
                        retry_after: response.retry_after,
                        ..Default::default()
                    })));
                }
                Ok(Ok(response)) if response.is_client_error() => {
                    return Err(AppError::RemoteError {
                        status: Some(response.status),
                        message: response.error_message(),
                    });
                }
                Ok(Ok(response)) => (Some(response.status), response.error_message()),
            };

            if attempt >= self.retry.max_attempts || !request.method.is_idempotent() {
                tracing::error!(
                    "{:?} {} failed after {} attempt(s): {}",
                    request.method,
                    request.path,
                    attempt,
                    failure
                );
                return Err(AppError::RemoteError { status, message: failure });
            }

            let delay = self.retry.backoff_for(attempt);
            tracing::warn!(
                "{:?} {} failed (attempt {}/{}), retrying in {:?}: {}",
                request.method,
                request.path,
                attempt,
                self.retry.max_attempts,
                delay,
                failure
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn projected_columns<'a>(
        descriptor: &'a ResourceDescriptor,
        projection: &[String],
    ) -> Result<Vec<&'a ColumnMapping>, AppError> {
        projection
            .iter()
            .map(|name| {
                descriptor.column(name).ok_or_else(|| {
                    AppError::TranslationUnsupported(format!(
                        "Column '{}' does not exist on resource '{}'",
                        name, descriptor.name
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Cell, ColumnType, Endpoint, HttpMethod, Operations, PageToken, PaginationStrategy, QuerySpec,
    };
    use crate::services::query_translator::QueryTranslator;
    use crate::services::remote::testing::ScriptedApi;
    use crate::services::remote::TransportError;
    use serde_json::json;

    fn descriptor() -> ResourceDescriptor {
        let mut descriptor = ResourceDescriptor::new(
            "users",
            "crm",
            Operations::list_only(Endpoint::new(HttpMethod::Get, "/users")),
            vec![
                ColumnMapping::new("id", ColumnType::Integer),
                ColumnMapping::new("name", ColumnType::String),
            ],
        );
        descriptor.rows_path = Some("data".to_string());
        descriptor.pagination = PaginationStrategy::Cursor {
            cursor_param: "cursor".to_string(),
            size_param: "limit".to_string(),
            page_size: 2,
            next_cursor_path: "next".to_string(),
        };
        descriptor
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    async fn invoker(api: Arc<ScriptedApi>) -> ApiInvoker {
        let connection = Arc::new(ConnectionManager::new("crm", api.clone()));
        connection.connect().await;
        ApiInvoker::new(api, connection, fast_retry(), Duration::from_secs(5))
    }

    fn page(ids: &[i64], next: Option<&str>) -> serde_json::Value {
        let data: Vec<_> = ids.iter().map(|id| json!({ "id": id, "name": format!("user-{}", id) })).collect();
        json!({ "data": data, "next": next })
    }

    fn list_all() -> RemoteCall {
        QueryTranslator::translate(&descriptor(), &QuerySpec::all()).unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_pages_follow_cursor_order() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(page(&[1, 2], Some("c2")))
            .push_ok(page(&[3, 4], Some("c3")))
            .push_ok(page(&[5], None));
        let invoker = invoker(api.clone()).await;

        let result = invoker.call(&descriptor(), &list_all(), &CancellationFlag::new()).await.unwrap();
        let ids: Vec<_> = result.rows().iter().map(|r| r.get(0).unwrap().clone()).collect();
        assert_eq!(ids, (1..=5).map(|i| Cell::Present(json!(i))).collect::<Vec<_>>());

        let requests = api.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].query_value("cursor"), None);
        assert_eq!(requests[1].query_value("cursor"), Some("c2"));
        assert_eq!(requests[2].query_value("cursor"), Some("c3"));
    }

    #[tokio::test]
    async fn test_limit_stops_pagination() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(page(&[1, 2], Some("c2"))).push_ok(page(&[3], Some("c3")));
        let invoker = invoker(api.clone()).await;

        let call = QueryTranslator::translate(&descriptor(), &QuerySpec::all().limit(3)).unwrap();
        let result = invoker.call(&descriptor(), &call, &CancellationFlag::new()).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(api.request_count(), 2);
        // Second page only asks for what is still needed
        assert_eq!(api.requests()[1].query_value("limit"), Some("1"));
    }

    #[tokio::test]
    async fn test_empty_page_terminates_without_error() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(page(&[1, 2], Some("c2"))).push_ok(page(&[], Some("c3")));
        let invoker = invoker(api.clone()).await;

        let result = invoker.call(&descriptor(), &list_all(), &CancellationFlag::new()).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_column_uses_marker() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(json!({ "data": [ { "id": 1, "name": "Ada" }, { "id": 2 } ], "next": null }));
        let invoker = invoker(api).await;

        let result = invoker.call(&descriptor(), &list_all(), &CancellationFlag::new()).await.unwrap();
        assert_eq!(result.cell(1, "name"), Some(&Cell::Missing));
        assert_ne!(result.cell(1, "name"), Some(&Cell::Present(json!(""))));
        assert_eq!(result.cell(0, "name"), Some(&Cell::Present(json!("Ada"))));
    }

    #[tokio::test]
    async fn test_throttled_on_second_page_keeps_first_page() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(page(&[1, 2], Some("c2")))
            .push_throttled(Duration::from_secs(30))
            .push_ok(page(&[5], None));
        let invoker = invoker(api.clone()).await;

        let err = invoker
            .call(&descriptor(), &list_all(), &CancellationFlag::new())
            .await
            .unwrap_err();

        match err {
            AppError::Throttled(info) => {
                assert_eq!(info.retry_after, Some(Duration::from_secs(30)));
                assert_eq!(info.partial.len(), 2);
                assert_eq!(info.resume_cursor, Some(PageToken::Cursor("c2".to_string())));
            }
            other => panic!("expected Throttled, got {:?}", other),
        }
        // 429 is not retried internally
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let api = Arc::new(ScriptedApi::new());
        api.push_transport(TransportError::Timeout)
            .push_status(503, json!({ "message": "unavailable" }))
            .push_ok(page(&[1], None));
        let invoker = invoker(api.clone()).await;

        let result = invoker.call(&descriptor(), &list_all(), &CancellationFlag::new()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(api.request_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let api = Arc::new(ScriptedApi::new());
        for _ in 0..5 {
            api.push_status(500, json!({ "message": "boom" }));
        }
        let invoker = invoker(api.clone()).await;

        let err = invoker
            .call(&descriptor(), &list_all(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteError { status: Some(500), .. }));
        assert_eq!(api.request_count(), 3);
    }

    #[tokio::test]
    async fn test_creates_are_sent_once() {
        let api = Arc::new(ScriptedApi::new());
        api.push_transport(TransportError::Timeout);
        let invoker = invoker(api.clone()).await;

        let request = RemoteRequest::new(HttpMethod::Post, "/users").with_body(json!({ "name": "Ada" }));
        let err = invoker.execute(&request).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteError { status: None, .. }));
        assert_eq!(api.request_count(), 1);

        api.push_status(502, json!({ "message": "bad gateway" }))
            .push_ok(json!({ "id": 1 }));
        let patch = RemoteRequest::new(HttpMethod::Patch, "/users/1").with_body(json!({ "name": "Ada" }));
        assert!(invoker.execute(&patch).await.is_ok());
        assert_eq!(api.request_count(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let api = Arc::new(ScriptedApi::new());
        api.push_status(400, json!({ "message": "bad filter" }));
        let invoker = invoker(api.clone()).await;

        let err = invoker
            .call(&descriptor(), &list_all(), &CancellationFlag::new())
            .await
            .unwrap_err();
        match err {
            AppError::RemoteError { status, message } => {
                assert_eq!(status, Some(400));
                assert_eq!(message, "bad filter");
            }
            other => panic!("expected RemoteError, got {:?}", other),
        }
        assert_eq!(api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_schema_error() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(json!({ "data": [ { "id": "not-a-number", "name": "x" } ], "next": null }));
        let invoker = invoker(api).await;

        let err = invoker
            .call(&descriptor(), &list_all(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_pages() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ok(page(&[1, 2], Some("c2")));
        let invoker = invoker(api.clone()).await;

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = invoker.call(&descriptor(), &list_all(), &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(api.request_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_applies_per_call() {
        let api = Arc::new(ScriptedApi::new().with_delay(Duration::from_millis(50)));
        api.push_ok(page(&[1], None));
        let connection = Arc::new(ConnectionManager::new("crm", api.clone()));
        connection.connect().await;
        let invoker = ApiInvoker::new(api.clone(), connection, RetryPolicy::none(), Duration::from_millis(5));

        let err = invoker
            .call(&descriptor(), &list_all(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteError { status: None, .. }));
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let api = Arc::new(ScriptedApi::new());
        let connection = Arc::new(ConnectionManager::new("crm", api.clone()));
        let invoker = ApiInvoker::new(api.clone(), connection, fast_retry(), Duration::from_secs(1));

        let err = invoker
            .call(&descriptor(), &list_all(), &CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotReady(_)));
        assert_eq!(api.request_count(), 0);
    }
}
