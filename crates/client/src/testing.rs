//! In-memory network double for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::fetch::{Network, NetworkError};
use crate::http::{Request, RequestBody, Response, ResponseKind};

type Handler = dyn Fn(&Request) -> Result<Response, NetworkError> + Send + Sync;

/// A network whose answers come from a closure.
///
/// Every request is recorded as `"METHOD url"`; uploads also record the
/// filename of their multipart part.
pub struct FakeNetwork {
    handler: Box<Handler>,
    offline: AtomicBool,
    log: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new(handler: impl Fn(&Request) -> Result<Response, NetworkError> + Send + Sync + 'static) -> Self {
        Self { handler: Box::new(handler), offline: AtomicBool::new(false), log: Mutex::new(Vec::new()) }
    }

    /// A network that is permanently unreachable.
    pub fn offline() -> Self {
        let network = Self::new(|_| Err(NetworkError::Unreachable("offline".into())));
        network.set_offline(true);
        network
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests seen so far, including ones refused while offline.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn send(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut line = format!("{} {}", request.method, request.url);
        if let RequestBody::Multipart { payload, .. } = &request.body {
            line.push(' ');
            line.push_str(&payload.filename);
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(line);
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable("offline".into()));
        }
        (self.handler)(request)
    }
}

/// Same-origin 200 with a text body.
pub fn ok(body: &str) -> Response {
    status(200, body)
}

/// Same-origin response with the given status.
pub fn status(code: u16, body: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::new(status, headers, body.to_string(), ResponseKind::Basic)
}

/// Cross-origin 200 with a readable body.
pub fn cross_origin(body: &str) -> Response {
    Response::new(StatusCode::OK, HeaderMap::new(), body.to_string(), ResponseKind::Cors)
}
