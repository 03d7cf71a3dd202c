//! SQLite-backed durable state for the offline worker.
//!
//! This module provides the shared mutable state of the worker,
//! persisted with async access via tokio-rusqlite:
//!
//! - Named cache generations mapping request keys to stored responses
//! - The ordered queue of deferred receipt uploads
//! - The record of which worker version was last activated
//!
//! Writes are upserts keyed by request hash or deletes keyed by upload id, so
//! concurrent handlers never need a lock held across a suspension point.

pub mod activation;
pub mod connection;
pub mod generations;
pub mod key;
pub mod migrations;
pub mod uploads;

pub use crate::Error;

pub use connection::CacheDb;
pub use generations::{Generation, GenerationNames, StoredResponse};
pub use key::RequestKey;
pub use uploads::{PendingUpload, UploadPayload};
