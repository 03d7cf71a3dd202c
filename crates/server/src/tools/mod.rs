//! MCP tool implementations.
//!
//! Each platform signal the worker consumes is exposed as one tool, plus a few
//! inspection tools for the upload queue and cache generations.

pub mod cache;
pub mod fetch;
pub mod lifecycle;
pub mod signals;
pub mod uploads;

use std::collections::BTreeMap;

use chrono::Utc;
use receipt_sw_client::{DrainReport, Effect, Outcome, Response, ResponseKind, ResponseSource};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

/// A worker response rendered for the host.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutput {
    pub url: String,
    pub status: u16,
    pub kind: ResponseKind,
    pub source: ResponseSource,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Body decoded as UTF-8, lossily.
    pub body: String,
    pub body_bytes: usize,
    pub served_at: String,
}

impl FetchOutput {
    pub fn new(url: &str, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            kind: response.kind,
            source: response.source,
            content_type: response.content_type().map(str::to_string),
            headers,
            body: response.text(),
            body_bytes: response.body.len(),
            served_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A dispatched event's outcome rendered for the host.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeOutput {
    Response(FetchOutput),
    Effects { effects: Vec<Effect> },
    Reply { reply: serde_json::Value },
    Drained(DrainReport),
    Ignored,
}

impl OutcomeOutput {
    pub fn new(url: &str, outcome: Outcome) -> Self {
        match outcome {
            Outcome::Response(response) => OutcomeOutput::Response(FetchOutput::new(url, &response)),
            Outcome::Effects(effects) => OutcomeOutput::Effects { effects },
            Outcome::Reply(reply) => OutcomeOutput::Reply { reply },
            Outcome::Drained(report) => OutcomeOutput::Drained(report),
            Outcome::Ignored => OutcomeOutput::Ignored,
        }
    }
}

/// Pretty JSON text content, the shape every tool returns.
pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(ToolError::from)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use receipt_sw_client::Worker;
    use receipt_sw_client::testing::{FakeNetwork, ok, status};
    use receipt_sw_core::{AppConfig, CacheDb};
    use rmcp::model::CallToolResult;

    /// A small site: a two-page shell, the analyze endpoint and a health check.
    pub fn site() -> Arc<FakeNetwork> {
        Arc::new(FakeNetwork::new(|req| match req.url.path() {
            "/" => Ok(ok("<html>home</html>")),
            "/offline.html" => Ok(ok("<html>offline</html>")),
            "/analyze/upload" => Ok(ok(r#"{"merchant_name":"Cafe","total":4.2}"#)),
            "/health" => Ok(ok(r#"{"status":"healthy"}"#)),
            _ => Ok(status(404, "not found")),
        }))
    }

    pub async fn worker(network: Arc<FakeNetwork>) -> Arc<Worker> {
        let config = AppConfig { static_manifest: vec!["/".into(), "/offline.html".into()], ..AppConfig::default() };
        let db = CacheDb::open_in_memory().await.unwrap();
        Arc::new(Worker::new(&config, db, network).unwrap())
    }

    pub fn output(result: &CallToolResult) -> serde_json::Value {
        let content = serde_json::to_value(&result.content[0]).unwrap();
        let text = content
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
