//! receipt-sw server entry point.
//!
//! Boots the offline worker and hosts it as an MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use receipt_sw_client::{FetchConfig, HttpNetwork, Worker};
use receipt_sw_core::{AppConfig, CacheDb};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        db_path = %config.db_path.display(),
        origin = %config.origin,
        version = %config.generation_names().version(),
        "Starting receipt-sw worker on stdio transport"
    );

    let db = CacheDb::open(&config.db_path).await?;
    let pending = db.pending_upload_count().await?;
    if pending > 0 {
        tracing::info!(pending, "pending uploads waiting for background sync");
    }

    let network = Arc::new(HttpNetwork::new(FetchConfig::from_app(&config)?)?);
    let worker = Arc::new(Worker::open(&config, db.clone(), network).await?);
    worker.probe_health().await;

    let handler = handler::ReceiptSwServer::new(worker, &config.sync_tag);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    db.close().await?;
    Ok(())
}
