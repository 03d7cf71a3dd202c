//! Pending upload queue operations.
//!
//! Receipt uploads that failed for lack of connectivity are persisted here
//! and drained in enqueue order on the next reconnect signal. Records are
//! never updated: an entry is inserted once and deleted once delivered.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

/// The multipart `file` part of an analyze submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A queued upload awaiting redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub id: String,
    pub payload: UploadPayload,
    pub enqueued_at: String,
}

impl CacheDb {
    /// Persist `payload` at the back of the queue and return its id.
    pub async fn enqueue_upload(&self, payload: &UploadPayload) -> Result<String, Error> {
        if payload.bytes.is_empty() {
            return Err(Error::InvalidInput("upload payload is empty".into()));
        }
        if payload.filename.trim().is_empty() {
            return Err(Error::InvalidInput("upload filename is empty".into()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let payload = payload.clone();
        let row_id = id.clone();
        let enqueued_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO pending_uploads (id, filename, content_type, file, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row_id, payload.filename, payload.content_type, payload.bytes, enqueued_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(%id, "upload queued");
        Ok(id)
    }

    /// Every pending upload, oldest first.
    pub async fn list_uploads(&self) -> Result<Vec<PendingUpload>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PendingUpload>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, filename, content_type, file, enqueued_at
                     FROM pending_uploads ORDER BY seq ASC",
                )?;
                let uploads = stmt
                    .query_map([], |row| {
                        Ok(PendingUpload {
                            id: row.get(0)?,
                            payload: UploadPayload {
                                filename: row.get(1)?,
                                content_type: row.get(2)?,
                                bytes: row.get(3)?,
                            },
                            enqueued_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(uploads)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove an upload by id.
    ///
    /// Returns false if it was already gone; removing twice is not an error.
    pub async fn remove_upload(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM pending_uploads WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether `id` is still queued.
    pub async fn contains_upload(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let found = conn
                    .query_row("SELECT 1 FROM pending_uploads WHERE id = ?1", params![id], |row| {
                        row.get::<_, i64>(0)
                    })
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of queued uploads.
    pub async fn pending_upload_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_uploads", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
