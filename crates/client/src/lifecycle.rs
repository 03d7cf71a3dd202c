//! Worker lifecycle: install, activate, and the state the other components query.
//!
//! Install fetches the whole static manifest before writing anything, then
//! commits it to the static generation in one transaction. Activate is the
//! only place whole generations are evicted, and it records the activated
//! version in the store so a restarted worker resumes serving from it.

use std::sync::Arc;

use receipt_sw_core::{CacheDb, Error, Generation, GenerationNames, RequestKey, StoredResponse};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use url::Url;

use crate::fetch::Network;
use crate::http::Request;
use crate::router::request_key;

/// Lifecycle state of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerProcessState {
    Installing,
    /// Installed, waiting for the previous version to release its clients.
    Waiting,
    Active,
    Redundant,
}

impl std::fmt::Display for WorkerProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerProcessState::Installing => "installing",
            WorkerProcessState::Waiting => "waiting",
            WorkerProcessState::Active => "active",
            WorkerProcessState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct LifecycleState {
    process: WorkerProcessState,
    skip_waiting: bool,
    clients_claimed: bool,
    /// Generations requests are answered from; `None` until some version is active.
    serving: Option<GenerationNames>,
}

/// Result of a successful install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub generation: String,
    pub cached: usize,
}

/// Result of an activation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
}

/// Owns the worker state machine and the current generation names.
pub struct LifecycleController {
    db: CacheDb,
    network: Arc<dyn Network>,
    names: GenerationNames,
    manifest: Vec<Url>,
    vary_headers: Vec<String>,
    state: RwLock<LifecycleState>,
}

impl LifecycleController {
    pub fn new(
        db: CacheDb, network: Arc<dyn Network>, names: GenerationNames, manifest: Vec<Url>, vary_headers: Vec<String>,
    ) -> Self {
        Self {
            db,
            network,
            names,
            manifest,
            vary_headers,
            state: RwLock::new(LifecycleState {
                process: WorkerProcessState::Installing,
                skip_waiting: false,
                clients_claimed: false,
                serving: None,
            }),
        }
    }

    pub fn names(&self) -> &GenerationNames {
        &self.names
    }

    pub async fn state(&self) -> WorkerProcessState {
        self.state.read().await.process
    }

    /// Whether fetches from open clients are routed through this worker.
    pub async fn controls_clients(&self) -> bool {
        let state = self.state.read().await;
        state.process == WorkerProcessState::Active && state.clients_claimed
    }

    /// Generations the router answers from.
    ///
    /// This is the current version once it is active, or the version a
    /// previous run activated while this one is still installing.
    pub async fn serving(&self) -> Option<GenerationNames> {
        self.state.read().await.serving.clone()
    }

    /// Pick up the activation recorded by an earlier run.
    ///
    /// When the recorded version is this one, the worker resumes as active
    /// without reinstalling. An older recorded version keeps serving until
    /// this one activates. A record whose static generation is gone is ignored.
    pub async fn restore(&self) -> Result<WorkerProcessState, Error> {
        let Some(recorded) = self.db.active_generations().await? else {
            return Ok(self.state().await);
        };
        if !self.db.generation_names().await?.contains(recorded.static_name()) {
            tracing::warn!(version = recorded.version(), "recorded activation has no static generation; ignoring");
            return Ok(self.state().await);
        }

        let mut state = self.state.write().await;
        if state.process != WorkerProcessState::Installing || state.serving.is_some() {
            return Ok(state.process);
        }

        if recorded == self.names {
            state.process = WorkerProcessState::Active;
            state.clients_claimed = true;
            tracing::info!(version = recorded.version(), "resumed active version");
        } else {
            tracing::info!(previous = recorded.version(), "previous version serving until activation");
        }
        state.serving = Some(recorded);
        Ok(state.process)
    }

    /// Whether activation may proceed without waiting for clients to close.
    pub async fn skip_waiting_requested(&self) -> bool {
        self.state.read().await.skip_waiting
    }

    /// Populate the static generation from the manifest.
    ///
    /// All-or-nothing: a single failed or non-2xx fetch rejects the install
    /// and leaves the store untouched. A fresh worker becomes redundant; an
    /// already active one refreshes its static generation in place and keeps
    /// serving the old contents when the refresh fails.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let from = self.state().await;
        if !matches!(from, WorkerProcessState::Installing | WorkerProcessState::Active) {
            return Err(Error::InvalidState(format!("cannot install from {from}")));
        }

        tracing::info!(generation = self.names.static_name(), entries = self.manifest.len(), "installing");

        let entries = match self.fetch_manifest().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "install rejected");
                self.reject_install(from).await;
                return Err(e);
            }
        };

        if let Err(e) = Generation::put_all(&self.db, self.names.static_name(), &entries).await {
            tracing::error!(error = %e, "install rejected: static generation write failed");
            self.reject_install(from).await;
            return Err(Error::InstallFailed(e.to_string()));
        }

        {
            let mut state = self.state.write().await;
            if state.process == WorkerProcessState::Installing {
                state.process = WorkerProcessState::Waiting;
            }
            state.skip_waiting = true;
        }

        tracing::info!(generation = self.names.static_name(), "static files cached");
        Ok(InstallReport { generation: self.names.static_name().to_string(), cached: entries.len() })
    }

    async fn reject_install(&self, from: WorkerProcessState) {
        if from == WorkerProcessState::Installing {
            self.state.write().await.process = WorkerProcessState::Redundant;
        }
    }

    async fn fetch_manifest(&self) -> Result<Vec<(RequestKey, StoredResponse)>, Error> {
        let mut tasks = JoinSet::new();
        for (index, url) in self.manifest.iter().enumerate() {
            let network = Arc::clone(&self.network);
            let request = Request::get(url.clone());
            tasks.spawn(async move {
                let result = network.send(&request).await;
                (index, request, result)
            });
        }

        let mut fetched = Vec::with_capacity(self.manifest.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, request, result) = joined.map_err(|e| Error::InstallFailed(e.to_string()))?;
            let response = result.map_err(|e| Error::InstallFailed(format!("{}: {}", request.url, e)))?;
            if !response.is_ok() {
                return Err(Error::InstallFailed(format!("{}: status {}", request.url, response.status.as_u16())));
            }
            fetched.push((index, request_key(&request, &self.vary_headers), response.to_stored()));
        }

        fetched.sort_by_key(|(index, _, _)| *index);
        Ok(fetched.into_iter().map(|(_, key, stored)| (key, stored)).collect())
    }

    /// Ask to activate as soon as installation finishes.
    ///
    /// Returns true when the worker is already installed and should activate now.
    pub async fn skip_waiting(&self) -> bool {
        let mut state = self.state.write().await;
        state.skip_waiting = true;
        state.process == WorkerProcessState::Waiting
    }

    /// Evict every generation outside the current set, record the activation,
    /// then claim clients.
    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        {
            let state = self.state.read().await;
            if !matches!(state.process, WorkerProcessState::Waiting | WorkerProcessState::Active) {
                return Err(Error::InvalidState(format!("cannot activate from {}", state.process)));
            }
        }

        tracing::info!("activating");

        let mut report = ActivateReport { deleted: Vec::new(), kept: Vec::new() };
        for name in self.db.generation_names().await? {
            if self.names.is_current(&name) {
                report.kept.push(name);
            } else if self.db.delete_generation(&name).await? {
                tracing::info!(generation = %name, "deleting old cache");
                report.deleted.push(name);
            }
        }

        self.db.record_activation(&self.names).await?;

        {
            let mut state = self.state.write().await;
            state.process = WorkerProcessState::Active;
            state.clients_claimed = true;
            state.serving = Some(self.names.clone());
        }

        tracing::info!(deleted = report.deleted.len(), "activated");
        Ok(report)
    }

    /// Retire this worker; it stops routing requests.
    pub async fn retire(&self) {
        let mut state = self.state.write().await;
        state.process = WorkerProcessState::Redundant;
        state.clients_claimed = false;
        state.serving = None;
    }
}
