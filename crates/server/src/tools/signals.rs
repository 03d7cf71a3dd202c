//! Tools for the non-fetch platform signals: reconnect, control messages,
//! push delivery and notification clicks.

use receipt_sw_client::{ControlMessage, Event, Worker};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{OutcomeOutput, json_result};

/// Parameters for the worker_sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerSyncParams {
    /// Registration tag of the reconnect signal (default: the configured sync tag).
    #[serde(default)]
    pub tag: Option<String>,
}

/// Parameters for the worker_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerMessageParams {
    /// Message type: "skip-waiting" or "get-version". Unknown types are ignored.
    #[serde(rename = "type")]
    pub message_type: String,
}

/// Parameters for the worker_push tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerPushParams {
    /// Push payload text, shown as the notification body.
    #[serde(default)]
    pub data: Option<String>,
}

/// Parameters for the worker_notification_click tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerNotificationClickParams {
    /// Action button that was clicked ("explore" or "close"); absent for the notification body.
    #[serde(default)]
    pub action: Option<String>,
}

pub async fn sync_impl(worker: &Worker, sync_tag: &str, params: WorkerSyncParams) -> Result<CallToolResult, McpError> {
    let tag = params.tag.unwrap_or_else(|| sync_tag.to_string());
    dispatch(worker, Event::Sync { tag }).await
}

pub async fn message_impl(worker: &Worker, params: WorkerMessageParams) -> Result<CallToolResult, McpError> {
    let message: ControlMessage = serde_json::from_value(serde_json::json!({ "type": params.message_type }))
        .unwrap_or(ControlMessage::Unknown);
    dispatch(worker, Event::Message(message)).await
}

pub async fn push_impl(worker: &Worker, params: WorkerPushParams) -> Result<CallToolResult, McpError> {
    dispatch(worker, Event::Push { data: params.data }).await
}

pub async fn notification_click_impl(
    worker: &Worker, params: WorkerNotificationClickParams,
) -> Result<CallToolResult, McpError> {
    dispatch(worker, Event::NotificationClick { action: params.action }).await
}

async fn dispatch(worker: &Worker, event: Event) -> Result<CallToolResult, McpError> {
    let outcome = worker.dispatch(event).await?;
    json_result(&OutcomeOutput::new(worker.origin().as_str(), outcome))
}
