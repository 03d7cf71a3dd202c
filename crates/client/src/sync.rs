//! Background sync: redeliver queued uploads when connectivity returns.
//!
//! Each reconnect signal is a full drain. Entries are attempted in enqueue
//! order; a failure leaves the entry queued and moves on to the next one.
//! Store errors on a single entry are treated the same way.
//! There is no retry cap and no delay between signals.

use std::sync::Arc;

use receipt_sw_core::{CacheDb, Error, PendingUpload};
use serde::Serialize;
use url::Url;

use crate::api::AnalysisResult;
use crate::fetch::Network;
use crate::http::Request;

/// Multipart field the analysis service reads the image from.
pub const UPLOAD_FIELD: &str = "file";

/// Outcome of one drain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    /// Entries removed by a concurrent drain before this one reached them.
    pub skipped: Vec<String>,
}

pub struct SyncCoordinator {
    db: CacheDb,
    network: Arc<dyn Network>,
    upload_url: Url,
    tag: String,
}

impl SyncCoordinator {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, upload_url: Url, tag: &str) -> Self {
        Self { db, network, upload_url, tag: tag.to_string() }
    }

    /// Whether a signal with `tag` should trigger a drain.
    pub fn handles(&self, tag: &str) -> bool {
        tag == self.tag
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    /// Attempt every queued upload once.
    pub async fn drain(&self) -> Result<DrainReport, Error> {
        let pending = self.db.list_uploads().await?;
        tracing::info!(pending = pending.len(), "background sync triggered");

        let mut report = DrainReport::default();
        for upload in pending {
            match self.db.contains_upload(&upload.id).await {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped.push(upload.id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(id = %upload.id, error = %e, "queue lookup failed; entry left for the next sync");
                    report.failed.push(upload.id);
                    continue;
                }
            }

            report.attempted += 1;
            if !self.deliver(&upload).await {
                report.failed.push(upload.id);
                continue;
            }

            match self.db.remove_upload(&upload.id).await {
                Ok(_) => report.delivered.push(upload.id),
                Err(e) => {
                    tracing::warn!(id = %upload.id, error = %e, "delivered upload could not be dequeued");
                    report.failed.push(upload.id);
                }
            }
        }

        tracing::info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "background sync finished"
        );
        Ok(report)
    }

    async fn deliver(&self, upload: &PendingUpload) -> bool {
        let request = Request::multipart(self.upload_url.clone(), UPLOAD_FIELD, upload.payload.clone());

        match self.network.send(&request).await {
            Ok(response) if response.is_ok() => {
                match response.json::<AnalysisResult>() {
                    Ok(result) => tracing::info!(
                        id = %upload.id,
                        merchant = result.merchant_name.as_deref().unwrap_or("unknown"),
                        total = ?result.total,
                        "background upload successful"
                    ),
                    Err(_) => tracing::info!(id = %upload.id, "background upload successful"),
                }
                true
            }
            Ok(response) => {
                tracing::warn!(id = %upload.id, status = response.status.as_u16(), "background upload rejected");
                false
            }
            Err(e) => {
                tracing::warn!(id = %upload.id, error = %e, "background upload failed");
                false
            }
        }
    }
}
