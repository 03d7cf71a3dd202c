//! Request and response values that flow through the worker.
//!
//! Bodies are `Bytes`, so handing one copy to the caller and another to the
//! cache never re-reads the network.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use receipt_sw_core::{StoredResponse, UploadPayload};

/// Body of an outgoing request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// A single-file multipart form.
    Multipart { field: String, payload: UploadPayload },
}

/// An outgoing request as seen by the router.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: RequestBody::Empty }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST a single file as multipart field `field`.
    pub fn multipart(url: Url, field: &str, payload: UploadPayload) -> Self {
        Self { body: RequestBody::Multipart { field: field.to_string(), payload }, ..Self::new(Method::POST, url) }
    }

    /// Add a header, ignoring names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(name, "dropping invalid request header"),
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the `Accept` header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.header(header::ACCEPT.as_str())
            .is_some_and(|accept| accept.contains("text/html"))
    }
}

/// Visibility class of a response, mirroring the fetch response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response.
    Basic,
    /// Cross-origin response with readable status and body.
    Cors,
    /// Cross-origin response whose status and body are hidden.
    Opaque,
}

/// Where the router got a response from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Built locally because the network was unreachable.
    Synthetic,
}

/// A response returned to the caller.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub kind: ResponseKind,
    pub source: ResponseSource,
}

const NETWORK_UNAVAILABLE: &str = "Network unavailable. Please check your connection.";
const OFFLINE_TEXT: &str = "Offline content not available";
const OFFLINE_HTML: &str = "<!DOCTYPE html>
<html lang=\"en\">
<head><meta charset=\"utf-8\"><title>Offline - Receipt Scanner</title></head>
<body>
<h1>You are offline</h1>
<p>This page is not available offline. Receipts you capture are saved and uploaded when the connection returns.</p>
</body>
</html>
";

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>, kind: ResponseKind) -> Self {
        Self { status, headers, body: body.into(), kind, source: ResponseSource::Network }
    }

    fn synthetic(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self { status, headers, body: body.into(), kind: ResponseKind::Basic, source: ResponseSource::Synthetic }
    }

    /// 503 JSON body returned for API calls while offline.
    pub fn network_unavailable() -> Self {
        let body = serde_json::json!({ "error": NETWORK_UNAVAILABLE }).to_string();
        Self::synthetic(StatusCode::SERVICE_UNAVAILABLE, "application/json", body)
    }

    /// 503 plain-text body returned for non-HTML asset misses while offline.
    pub fn offline_text() -> Self {
        Self::synthetic(StatusCode::SERVICE_UNAVAILABLE, "text/plain; charset=utf-8", OFFLINE_TEXT)
    }

    /// Built-in offline page used when no offline page was cached.
    pub fn offline_page() -> Self {
        Self::synthetic(StatusCode::SERVICE_UNAVAILABLE, "text/html; charset=utf-8", OFFLINE_HTML)
    }

    /// Rebuild a response from the cache; `kind` comes from the entry's URL.
    pub fn from_stored(stored: StoredResponse, kind: ResponseKind) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &stored.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                headers.append(name, value);
            }
        }
        let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
        Self { status, headers, body: Bytes::from(stored.body), kind, source: ResponseSource::Cache }
    }

    /// Copy of this response in its stored form.
    pub fn to_stored(&self) -> StoredResponse {
        let headers = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        StoredResponse::new(
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or(""),
            headers,
            self.body.to_vec(),
        )
    }

    /// 2xx status.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Only plain same-origin 200 responses may be written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.kind == ResponseKind::Basic && self.status == StatusCode::OK
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
