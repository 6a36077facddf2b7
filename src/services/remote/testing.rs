// Scripted remote API used by unit tests across the crate
use crate::api::middleware::AppError;
use crate::models::{Credential, Session};
use crate::services::remote::adapter::{Connectable, Queryable, RawResponse, RemoteRequest, TransportError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Handler = Box<dyn Fn(&RemoteRequest) -> Result<RawResponse, TransportError> + Send + Sync>;

/// Replays queued responses in order, then falls back to an optional handler
pub struct ScriptedApi {
    queue: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<RemoteRequest>>,
    accept_auth: AtomicBool,
    probe_ok: AtomicBool,
    authentications: AtomicUsize,
    probes: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
            accept_auth: AtomicBool::new(true),
            probe_ok: AtomicBool::new(true),
            authentications: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&RemoteRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        let mut api = Self::new();
        api.handler = Some(Box::new(handler));
        api
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, body: Value) -> &Self {
        self.push(Ok(RawResponse::ok(body)))
    }

    pub fn push_status(&self, status: u16, body: Value) -> &Self {
        self.push(Ok(RawResponse::with_status(status, body)))
    }

    pub fn push_throttled(&self, retry_after: Duration) -> &Self {
        self.push(Ok(RawResponse {
            status: 429,
            body: serde_json::json!({ "message": "rate limit exceeded" }),
            retry_after: Some(retry_after),
        }))
    }

    pub fn push_transport(&self, error: TransportError) -> &Self {
        self.push(Err(error))
    }

    pub fn push(&self, response: Result<RawResponse, TransportError>) -> &Self {
        self.queue.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn set_accept_auth(&self, accept: bool) {
        self.accept_auth.store(accept, Ordering::SeqCst);
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    pub fn authentications(&self) -> usize {
        self.authentications.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connectable for ScriptedApi {
    async fn authenticate(&self) -> Result<Session, AppError> {
        self.authentications.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.accept_auth.load(Ordering::SeqCst) {
            return Err(AppError::ConnectionFailure("credentials rejected".to_string()));
        }
        Ok(Session::new(
            "scripted",
            Credential::Header {
                name: "Authorization".to_string(),
                value: "Bearer test".to_string(),
            },
        ))
    }

    async fn probe(&self, _session: &Session) -> Result<(), AppError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::ConnectionFailure("probe failed".to_string()))
        }
    }
}

#[async_trait::async_trait]
impl Queryable for ScriptedApi {
    async fn call(&self, _session: &Session, request: &RemoteRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        match (queued, &self.handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(request),
            (None, None) => Err(TransportError::Io("no scripted response left".to_string())),
        }
    }
}
