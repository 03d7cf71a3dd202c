//! Cache generation operations.
//!
//! A generation is a named partition of cached responses ("static-v1",
//! "dynamic-v1"). Lookups only ever scan the generation they were issued on;
//! callers decide the probe order. Generations are never trimmed entry by
//! entry; a whole generation is dropped with [`CacheDb::delete_generation`].

use std::collections::BTreeSet;

use super::connection::CacheDb;
use super::key::RequestKey;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// Names of the generations recognized by one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNames {
    static_name: String,
    dynamic_name: String,
    version: String,
}

impl GenerationNames {
    /// Build names as `{prefix}-static-{version}`; an empty prefix yields `static-{version}`.
    pub fn new(prefix: &str, version: &str) -> Self {
        let join = |part: &str| {
            if prefix.is_empty() { format!("{part}-{version}") } else { format!("{prefix}-{part}-{version}") }
        };
        let version_id = if prefix.is_empty() { version.to_string() } else { format!("{prefix}-{version}") };

        Self { static_name: join("static"), dynamic_name: join("dynamic"), version: version_id }
    }

    pub fn static_name(&self) -> &str {
        &self.static_name
    }

    pub fn dynamic_name(&self) -> &str {
        &self.dynamic_name
    }

    /// Identifier reported to clients asking for the worker version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rebuild names previously read back from the store.
    pub(crate) fn from_parts(static_name: String, dynamic_name: String, version: String) -> Self {
        Self { static_name, dynamic_name, version }
    }

    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }
}

/// A response captured into a generation.
///
/// Replaced wholesale on every put; never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl StoredResponse {
    /// Capture a response now.
    pub fn new(status: u16, status_text: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { status, status_text: status_text.to_string(), headers, body, stored_at: chrono::Utc::now().to_rfc3339() }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Handle to one named generation.
#[derive(Clone, Debug)]
pub struct Generation {
    db: CacheDb,
    name: String,
}

impl CacheDb {
    /// Open a generation, creating it if it does not exist yet.
    pub async fn open_generation(&self, name: &str) -> Result<Generation, Error> {
        let owned = name.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![owned, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(Generation { db: self.clone(), name: name.to_string() })
    }

    /// Handle to a generation without creating it.
    ///
    /// Lookups on a missing generation miss; writes fail.
    pub fn generation(&self, name: &str) -> Generation {
        Generation { db: self.clone(), name: name.to_string() }
    }

    /// Delete a generation and every response stored in it.
    ///
    /// Returns false if no generation had that name.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Names of every existing generation.
    pub async fn generation_names(&self) -> Result<BTreeSet<String>, Error> {
        self.conn
            .call(|conn| -> Result<BTreeSet<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM generations")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }
}

impl Generation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `response` under `key`, silently replacing any previous entry.
    ///
    /// Fails if the generation was deleted after this handle was opened, so
    /// an evicted generation is never resurrected by a late write.
    pub async fn put(&self, key: &RequestKey, response: &StoredResponse) -> Result<(), Error> {
        let name = self.name.clone();
        let row = EntryRow::encode(key, response)?;
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                row.upsert(conn, &name)?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Replace the generation's contents with `entries`, all or nothing.
    ///
    /// The generation itself is created inside the same transaction, so a
    /// failed bulk insert leaves no trace of the generation. Entries already
    /// stored under `name` are dropped first.
    pub async fn put_all(db: &CacheDb, name: &str, entries: &[(RequestKey, StoredResponse)]) -> Result<Generation, Error> {
        let rows = entries
            .iter()
            .map(|(key, response)| EntryRow::encode(key, response))
            .collect::<Result<Vec<_>, _>>()?;
        let owned = name.to_string();

        db.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![owned, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.execute("DELETE FROM entries WHERE generation = ?1", params![owned])?;
                for row in &rows {
                    row.upsert(&tx, &owned)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(Generation { db: db.clone(), name: name.to_string() })
    }

    /// Look up `key` in this generation only.
    pub async fn lookup(&self, key: &RequestKey) -> Result<Option<StoredResponse>, Error> {
        let name = self.name.clone();
        let hash = key.hash();
        self.db
            .conn
            .call(move |conn| -> Result<Option<StoredResponse>, Error> {
                let row = conn
                    .query_row(
                        "SELECT status, status_text, headers_json, body, stored_at
                         FROM entries WHERE generation = ?1 AND key_hash = ?2",
                        params![name, hash],
                        |row| {
                            Ok((
                                row.get::<_, u16>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Vec<u8>>(3)?,
                                row.get::<_, String>(4)?,
                            ))
                        },
                    )
                    .optional()?;

                match row {
                    Some((status, status_text, headers_json, body, stored_at)) => Ok(Some(StoredResponse {
                        status,
                        status_text,
                        headers: serde_json::from_str(&headers_json)?,
                        body,
                        stored_at,
                    })),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a single entry. Returns false if it was not present.
    pub async fn delete(&self, key: &RequestKey) -> Result<bool, Error> {
        let name = self.name.clone();
        let hash = key.hash();
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE generation = ?1 AND key_hash = ?2",
                    params![name, hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Keys stored in this generation, ordered by URL.
    pub async fn keys(&self) -> Result<Vec<RequestKey>, Error> {
        let name = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<RequestKey>, Error> {
                let mut stmt =
                    conn.prepare("SELECT method, url, vary_json FROM entries WHERE generation = ?1 ORDER BY url")?;
                let rows = stmt
                    .query_map(params![name], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(method, url, vary_json)| -> Result<RequestKey, Error> {
                        let vary: Vec<(String, String)> = serde_json::from_str(&vary_json)?;
                        Ok(RequestKey::new(&method, &url, vary))
                    })
                    .collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<u64, Error> {
        let name = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }
}

/// A response encoded for the `entries` table.
struct EntryRow {
    hash: String,
    method: String,
    url: String,
    vary_json: String,
    status: u16,
    status_text: String,
    headers_json: String,
    body: Vec<u8>,
    stored_at: String,
}

impl EntryRow {
    fn encode(key: &RequestKey, response: &StoredResponse) -> Result<Self, Error> {
        Ok(Self {
            hash: key.hash(),
            method: key.method().to_string(),
            url: key.url().to_string(),
            vary_json: serde_json::to_string(key.vary())?,
            status: response.status,
            status_text: response.status_text.clone(),
            headers_json: serde_json::to_string(&response.headers)?,
            body: response.body.clone(),
            stored_at: response.stored_at.clone(),
        })
    }

    fn upsert(&self, conn: &rusqlite::Connection, generation: &str) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO entries (
                generation, key_hash, method, url, vary_json,
                status, status_text, headers_json, body, stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(generation, key_hash) DO UPDATE SET
                method = excluded.method,
                url = excluded.url,
                vary_json = excluded.vary_json,
                status = excluded.status,
                status_text = excluded.status_text,
                headers_json = excluded.headers_json,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![
                generation,
                &self.hash,
                &self.method,
                &self.url,
                &self.vary_json,
                self.status,
                &self.status_text,
                &self.headers_json,
                &self.body,
                &self.stored_at,
            ],
        )?;
        Ok(())
    }
}
