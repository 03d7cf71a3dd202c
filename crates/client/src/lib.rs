//! Offline cache-and-sync worker for receipt-sw.
//!
//! This crate provides the request router, the install/activate lifecycle,
//! the background upload drain and the reqwest transport they share.

pub mod api;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod router;
pub mod sync;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use api::{AnalysisResult, ReceiptItem};
pub use fetch::{FetchConfig, HttpNetwork, Network, NetworkError};
pub use http::{Request, RequestBody, Response, ResponseKind, ResponseSource};
pub use reqwest::{Method, StatusCode};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleController, WorkerProcessState};
pub use router::{Route, Router, RouterConfig};
pub use sync::{DrainReport, SyncCoordinator};
pub use worker::{ControlMessage, Effect, Event, Notification, Outcome, UploadOutcome, Worker};
