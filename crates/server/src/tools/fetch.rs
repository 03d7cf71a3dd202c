//! worker_fetch tool implementation.
//!
//! Delivers one fetch event to the worker and returns the response it produced.

use std::collections::BTreeMap;

use receipt_sw_client::{Event, Method, Outcome, Request, RequestBody, Worker};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FetchOutput, json_result};
use crate::error::ToolError;

/// Input parameters for the worker_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerFetchParams {
    /// Absolute URL, or a path resolved against the worker origin.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers, e.g. `{"accept": "text/html"}`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Optional request body sent as-is.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Implementation of the worker_fetch tool.
pub async fn fetch_impl(worker: &Worker, params: WorkerFetchParams) -> Result<CallToolResult, McpError> {
    let method = Method::from_bytes(params.method.trim().to_uppercase().as_bytes())
        .map_err(|_| ToolError::InvalidInput(format!("invalid method: {}", params.method)))?;
    let url = worker.resolve(&params.url)?;

    let mut request = Request::new(method, url.clone());
    for (name, value) in &params.headers {
        request = request.with_header(name, value);
    }
    if let Some(body) = params.body {
        request.body = RequestBody::Bytes(body.into());
    }

    let response = match worker.dispatch(Event::Fetch(request)).await? {
        Outcome::Response(response) => response,
        other => {
            tracing::error!(outcome = ?other, "fetch produced no response");
            return Err(ToolError::InvalidInput("fetch produced no response".into()).into());
        }
    };

    tracing::debug!(url = %url, status = response.status.as_u16(), source = ?response.source, "fetch handled");
    json_result(&FetchOutput::new(url.as_str(), &response))
}
