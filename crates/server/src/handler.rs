//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the worker.
use std::sync::Arc;

use crate::tools::{
    cache::names_impl,
    fetch::{WorkerFetchParams, fetch_impl},
    lifecycle::{activate_impl, install_impl},
    signals::{
        WorkerMessageParams, WorkerNotificationClickParams, WorkerPushParams, WorkerSyncParams, message_impl,
        notification_click_impl, push_impl, sync_impl,
    },
    uploads::{UploadsEnqueueParams, UploadsRemoveParams, enqueue_impl, list_impl, remove_impl},
};

use receipt_sw_client::Worker;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for receipt-sw.
#[derive(Clone)]
pub struct ReceiptSwServer {
    worker: Arc<Worker>,
    sync_tag: String,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl ReceiptSwServer {
    /// Create a new server handler around a configured worker.
    pub fn new(worker: Arc<Worker>, sync_tag: &str) -> Self {
        Self { worker, sync_tag: sync_tag.to_string(), tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Deliver a fetch event. GET requests are answered from the cache, the network or an offline fallback; other methods pass straight through."
    )]
    async fn worker_fetch(&self, params: Parameters<WorkerFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.worker, params.0).await
    }

    #[tool(description = "Deliver the install event: precache the static manifest, then activate.")]
    async fn worker_install(&self) -> Result<CallToolResult, McpError> {
        install_impl(&self.worker).await
    }

    #[tool(description = "Deliver the activate event: evict old cache generations and claim clients.")]
    async fn worker_activate(&self) -> Result<CallToolResult, McpError> {
        activate_impl(&self.worker).await
    }

    #[tool(description = "Deliver a reconnect signal. A matching tag drains the pending upload queue in order.")]
    async fn worker_sync(&self, params: Parameters<WorkerSyncParams>) -> Result<CallToolResult, McpError> {
        sync_impl(&self.worker, &self.sync_tag, params.0).await
    }

    #[tool(description = "Post a control message to the worker: skip-waiting or get-version.")]
    async fn worker_message(&self, params: Parameters<WorkerMessageParams>) -> Result<CallToolResult, McpError> {
        message_impl(&self.worker, params.0).await
    }

    #[tool(description = "Deliver a push message. Returns the notification to show.")]
    async fn worker_push(&self, params: Parameters<WorkerPushParams>) -> Result<CallToolResult, McpError> {
        push_impl(&self.worker, params.0).await
    }

    #[tool(description = "Deliver a notification click. The explore action opens the app root.")]
    async fn worker_notification_click(
        &self, params: Parameters<WorkerNotificationClickParams>,
    ) -> Result<CallToolResult, McpError> {
        notification_click_impl(&self.worker, params.0).await
    }

    #[tool(
        description = "Submit a receipt image for analysis. Queued for background sync if the network is unreachable, or immediately when defer is set."
    )]
    async fn uploads_enqueue(&self, params: Parameters<UploadsEnqueueParams>) -> Result<CallToolResult, McpError> {
        enqueue_impl(&self.worker, params.0).await
    }

    #[tool(description = "List pending uploads in delivery order.")]
    async fn uploads_list(&self) -> Result<CallToolResult, McpError> {
        list_impl(&self.worker).await
    }

    #[tool(description = "Remove a pending upload by id. Removing a missing id is not an error.")]
    async fn uploads_remove(&self, params: Parameters<UploadsRemoveParams>) -> Result<CallToolResult, McpError> {
        remove_impl(&self.worker, params.0).await
    }

    #[tool(description = "List cache generations with entry counts and the worker's lifecycle state.")]
    async fn cache_names(&self) -> Result<CallToolResult, McpError> {
        names_impl(&self.worker).await
    }
}

impl ServerHandler for ReceiptSwServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "receipt-sw".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
