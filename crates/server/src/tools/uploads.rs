//! Pending upload tools: submit or queue a receipt, list the queue, drop an entry.

use base64::Engine as _;
use receipt_sw_client::{UploadOutcome, Worker};
use receipt_sw_core::UploadPayload;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Parameters for the uploads_enqueue tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadsEnqueueParams {
    /// Filename sent with the multipart `file` part.
    pub filename: String,

    /// MIME type of the image (default: image/jpeg).
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Image bytes, base64 encoded.
    pub data_base64: String,

    /// Queue without attempting delivery.
    #[serde(default)]
    pub defer: bool,
}

fn default_content_type() -> String {
    "image/jpeg".into()
}

/// Parameters for the uploads_remove tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadsRemoveParams {
    /// Id returned when the upload was queued.
    pub id: String,
}

/// One queued upload, without its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PendingUploadSummary {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub enqueued_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadsListOutput {
    pub count: usize,
    pub uploads: Vec<PendingUploadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadsRemoveOutput {
    pub id: String,
    pub removed: bool,
}

/// Implementation of the uploads_enqueue tool.
pub async fn enqueue_impl(worker: &Worker, params: UploadsEnqueueParams) -> Result<CallToolResult, McpError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(params.data_base64.trim())
        .map_err(|e| ToolError::InvalidInput(format!("data_base64 is not valid base64: {e}")))?;
    let payload = UploadPayload { filename: params.filename, content_type: params.content_type, bytes };

    let outcome = if params.defer {
        UploadOutcome::Queued { id: worker.defer_upload(&payload).await? }
    } else {
        worker.submit_upload(payload).await?
    };

    json_result(&outcome)
}

/// Implementation of the uploads_list tool.
pub async fn list_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let uploads: Vec<PendingUploadSummary> = worker
        .db()
        .list_uploads()
        .await?
        .into_iter()
        .map(|u| PendingUploadSummary {
            id: u.id,
            filename: u.payload.filename,
            content_type: u.payload.content_type,
            size: u.payload.bytes.len(),
            enqueued_at: u.enqueued_at,
        })
        .collect();

    json_result(&UploadsListOutput { count: uploads.len(), uploads })
}

/// Implementation of the uploads_remove tool.
pub async fn remove_impl(worker: &Worker, params: UploadsRemoveParams) -> Result<CallToolResult, McpError> {
    let removed = worker.db().remove_upload(&params.id).await?;
    json_result(&UploadsRemoveOutput { id: params.id, removed })
}
