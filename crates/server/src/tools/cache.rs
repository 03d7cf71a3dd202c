//! cache_names tool implementation.
//!
//! Lists the generations present in the store next to the ones this worker
//! version recognizes, with entry counts.

use receipt_sw_client::Worker;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerationSummary {
    pub name: String,
    pub entries: u64,
    /// Whether this version recognizes the generation; others go on the next activation.
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheNamesOutput {
    pub version: String,
    pub state: String,
    pub static_name: String,
    pub dynamic_name: String,
    pub generations: Vec<GenerationSummary>,
}

/// Implementation of the cache_names tool.
pub async fn names_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let names = worker.names();
    let mut generations = Vec::new();
    for name in worker.db().generation_names().await? {
        let entries = worker.db().generation(&name).len().await?;
        generations.push(GenerationSummary { current: names.is_current(&name), name, entries });
    }

    json_result(&CacheNamesOutput {
        version: names.version().to_string(),
        state: worker.lifecycle().state().await.to_string(),
        static_name: names.static_name().to_string(),
        dynamic_name: names.dynamic_name().to_string(),
        generations,
    })
}
