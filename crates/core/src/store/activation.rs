//! The durable record of which worker version is active.
//!
//! Activation writes the version and its generation names; a restarted worker
//! reads them back so the cache keeps serving without reinstalling.

use super::connection::CacheDb;
use super::generations::GenerationNames;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

impl CacheDb {
    /// Record `names` as the active version, replacing any earlier record.
    pub async fn record_activation(&self, names: &GenerationNames) -> Result<(), Error> {
        let (version, static_name, dynamic_name) =
            (names.version().to_string(), names.static_name().to_string(), names.dynamic_name().to_string());

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO activation (id, version, static_name, dynamic_name, activated_at)
                     VALUES (1, ?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        version = excluded.version,
                        static_name = excluded.static_name,
                        dynamic_name = excluded.dynamic_name,
                        activated_at = excluded.activated_at",
                    params![version, static_name, dynamic_name, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Generation names of the last activated version, if any.
    pub async fn active_generations(&self) -> Result<Option<GenerationNames>, Error> {
        self.conn
            .call(|conn| -> Result<Option<GenerationNames>, Error> {
                let row = conn
                    .query_row("SELECT static_name, dynamic_name, version FROM activation WHERE id = 1", [], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })
                    .optional()?;
                Ok(row.map(|(static_name, dynamic_name, version)| {
                    GenerationNames::from_parts(static_name, dynamic_name, version)
                }))
            })
            .await
            .map_err(Error::from)
    }
}
