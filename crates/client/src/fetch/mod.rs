//! Network transport used by the router, lifecycle controller and sync coordinator.
//!
//! ### Transport contract
//! - A `Network` either returns a response (any status) or a `NetworkError`
//!   meaning the request never produced one (offline, DNS, timeout).
//! - HTTP error statuses are responses, not errors; callers decide.
//!
//! ### HTTP implementation
//! - reqwest with rustls, bounded redirects and a per-request timeout.
//! - Body size capped at `max_bytes`.
//! - Responses from the worker origin are `basic`; everything else is `cors`.

pub mod url;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};

pub use self::url::{UrlError, resolve, same_origin};

use crate::http::{Request, RequestBody, Response, ResponseKind};
use receipt_sw_core::{AppConfig, Error, UploadPayload};

/// Transport-level failure: no response was produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    /// Host unreachable, connection refused or reset.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Response body exceeded the configured limit.
    #[error("response too large: {size} bytes exceeds {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout
        } else if err.is_builder() {
            NetworkError::InvalidRequest(err.to_string())
        } else {
            NetworkError::Unreachable(err.to_string())
        }
    }
}

impl From<NetworkError> for Error {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::InvalidRequest(msg) => Error::InvalidInput(msg),
            other => Error::NetworkUnavailable(other.to_string()),
        }
    }
}

/// Multipart part carrying an upload; a malformed content type is rejected.
pub fn upload_part(payload: &UploadPayload) -> Result<Part, NetworkError> {
    Part::bytes(payload.bytes.clone())
        .file_name(payload.filename.clone())
        .mime_str(&payload.content_type)
        .map_err(|e| NetworkError::InvalidRequest(format!("bad content type {:?}: {}", payload.content_type, e)))
}

/// Something that can carry a request to the network.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "receipt-sw/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Origin whose responses count as same-origin
    pub origin: ::url::Url,
}

impl FetchConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self, Error> {
        let origin = ::url::Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: 5,
            origin,
        })
    }
}

/// HTTP transport backed by reqwest.
pub struct HttpNetwork {
    http: Client,
    config: FetchConfig,
}

impl HttpNetwork {
    /// Create a new transport with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn response_kind(&self, url: &::url::Url) -> ResponseKind {
        if same_origin(&self.config.origin, url) { ResponseKind::Basic } else { ResponseKind::Cors }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn send(&self, request: &Request) -> Result<Response, NetworkError> {
        let start = Instant::now();

        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
            RequestBody::Multipart { field, payload } => {
                builder.multipart(Form::new().part(field.clone(), upload_part(payload)?))
            }
        };

        let response = builder.send().await?;

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(NetworkError::TooLarge { size: len as usize, limit: self.config.max_bytes });
        }

        let status = response.status();
        let headers = response.headers().clone();
        let kind = self.response_kind(response.url());

        let bytes = response.bytes().await?;

        if bytes.len() > self.config.max_bytes {
            return Err(NetworkError::TooLarge { size: bytes.len(), limit: self.config.max_bytes });
        }

        tracing::debug!(
            "{} {} -> {} in {}ms ({} bytes)",
            request.method,
            request.url,
            status.as_u16(),
            start.elapsed().as_millis(),
            bytes.len()
        );

        Ok(Response::new(status, headers, bytes, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseSource;
    use receipt_sw_core::UploadPayload;
    use reqwest::StatusCode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_for(origin: &str) -> HttpNetwork {
        let config = FetchConfig {
            user_agent: "receipt-sw-test".into(),
            max_bytes: 1024,
            timeout: Duration::from_secs(5),
            max_redirects: 5,
            origin: ::url::Url::parse(origin).unwrap(),
        };
        HttpNetwork::new(config).unwrap()
    }

    #[test]
    fn test_fetch_config_from_app() {
        let config = FetchConfig::from_app(&AppConfig::default()).unwrap();
        assert_eq!(config.user_agent, "receipt-sw/0.1");
        assert_eq!(config.timeout, Duration::from_millis(20_000));
        assert_eq!(config.origin.as_str(), "http://localhost:8000/");
    }

    #[test]
    fn test_upload_part_rejects_bad_content_type() {
        let payload = |content_type: &str| UploadPayload {
            filename: "r.jpg".into(),
            content_type: content_type.into(),
            bytes: vec![0xff, 0xd8],
        };

        assert!(upload_part(&payload("image/jpeg")).is_ok());
        assert!(matches!(upload_part(&payload("not a mime")), Err(NetworkError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_same_origin_response_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body{}"))
            .mount(&server)
            .await;

        let network = network_for(&server.uri());
        let url = ::url::Url::parse(&format!("{}/styles.css", server.uri())).unwrap();
        let response = network.send(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.kind, ResponseKind::Basic);
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(&response.body[..], b"body{}");
    }

    #[tokio::test]
    async fn test_cross_origin_response_is_cors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .mount(&server)
            .await;

        let network = network_for("http://app.invalid");
        let url = ::url::Url::parse(&format!("{}/font.css", server.uri())).unwrap();
        let response = network.send(&Request::get(url)).await.unwrap();

        assert_eq!(response.kind, ResponseKind::Cors);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let network = network_for(&server.uri());
        let url = ::url::Url::parse(&format!("{}/health", server.uri())).unwrap();
        let response = network.send(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 4096]))
            .mount(&server)
            .await;

        let network = network_for(&server.uri());
        let url = ::url::Url::parse(&format!("{}/big", server.uri())).unwrap();
        let result = network.send(&Request::get(url)).await;

        assert!(matches!(result, Err(NetworkError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"merchant_name":"Cafe"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let network = network_for(&server.uri());
        let url = ::url::Url::parse(&format!("{}/analyze/upload", server.uri())).unwrap();
        let payload =
            UploadPayload { filename: "r.jpg".into(), content_type: "image/jpeg".into(), bytes: vec![1, 2, 3] };
        let response = network.send(&Request::multipart(url, "file", payload)).await.unwrap();

        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let network = network_for("http://127.0.0.1:9");
        let url = ::url::Url::parse("http://127.0.0.1:9/").unwrap();
        let result = network.send(&Request::get(url)).await;

        assert!(matches!(result, Err(NetworkError::Unreachable(_))));
    }
}
