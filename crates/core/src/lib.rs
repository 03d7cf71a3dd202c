//! Core types and shared functionality for receipt-sw.
//!
//! This crate provides:
//! - Durable SQLite store for cache generations and the pending upload queue
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use store::{
    CacheDb, Generation, GenerationNames, PendingUpload, RequestKey, StoredResponse, UploadPayload,
};
