//! worker_install and worker_activate tool implementations.

use receipt_sw_client::{Event, Worker};
use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::{OutcomeOutput, json_result};

pub async fn install_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let outcome = worker.dispatch(Event::Install).await?;
    json_result(&OutcomeOutput::new(worker.origin().as_str(), outcome))
}

pub async fn activate_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let outcome = worker.dispatch(Event::Activate).await?;
    json_result(&OutcomeOutput::new(worker.origin().as_str(), outcome))
}
