//! The worker: one entry point for every platform signal.
//!
//! A host feeds [`Event`]s to [`Worker::dispatch`] and acts on the returned
//! [`Outcome`]. The worker itself never talks to clients; effects such as
//! showing a notification are returned for the host to perform.

use std::sync::Arc;

use receipt_sw_core::{AppConfig, CacheDb, Error, GenerationNames, UploadPayload};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::AnalysisResult;
use crate::fetch::{Network, NetworkError, resolve, upload_part};
use crate::http::{Request, Response};
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleController};
use crate::router::{Router, RouterConfig};
use crate::sync::{DrainReport, SyncCoordinator, UPLOAD_FIELD};

const NOTIFICATION_TITLE: &str = "Receipt Scanner";
const NOTIFICATION_DEFAULT_BODY: &str = "New receipt analysis complete!";
const NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";
const NOTIFICATION_BADGE: &str = "/icons/icon-72x72.png";

/// A platform signal delivered to the worker.
#[derive(Debug, Clone)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
    /// Reconnect signal carrying its registration tag.
    Sync { tag: String },
    Push { data: Option<String> },
    NotificationClick { action: Option<String> },
    Message(ControlMessage),
}

/// Structured message posted to the worker by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    #[serde(alias = "SKIP_WAITING")]
    SkipWaiting,
    #[serde(alias = "GET_VERSION")]
    GetVersion,
    #[serde(other)]
    Unknown,
}

/// Something the host must do on the worker's behalf.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    Installed(InstallReport),
    SkipWaiting,
    Activated(ActivateReport),
    ClaimClients,
    ShowNotification(Notification),
    CloseNotification,
    OpenWindow { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Notification shown for a push message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// The push text is shown as-is; no payload is parsed.
    pub fn for_push(data: Option<&str>) -> Self {
        let action = |action: &str, title: &str| NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: NOTIFICATION_BADGE.to_string(),
        };

        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: data.filter(|d| !d.is_empty()).unwrap_or(NOTIFICATION_DEFAULT_BODY).to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_BADGE.to_string(),
            vibrate: vec![100, 50, 100],
            actions: vec![action("explore", "View Results"), action("close", "Close")],
        }
    }
}

/// Result of one dispatched event.
#[derive(Debug)]
pub enum Outcome {
    Response(Response),
    Effects(Vec<Effect>),
    Reply(serde_json::Value),
    Drained(DrainReport),
    Ignored,
}

/// Result of submitting an upload through the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Delivered { result: Option<AnalysisResult> },
    Rejected { status: u16 },
    /// The network was unreachable or timed out; the upload waits for the
    /// next reconnect signal.
    Queued { id: String },
}

pub struct Worker {
    db: CacheDb,
    network: Arc<dyn Network>,
    origin: Url,
    health_url: Url,
    lifecycle: Arc<LifecycleController>,
    router: Router,
    sync: SyncCoordinator,
}

impl Worker {
    /// Wire the worker components from configuration.
    ///
    /// Every configured path is resolved against `origin` up front, so a bad
    /// manifest entry fails here rather than during install.
    pub fn new(config: &AppConfig, db: CacheDb, network: Arc<dyn Network>) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let at = |path: &str| resolve(&origin, path).map_err(|e| Error::InvalidUrl(format!("{path}: {e}")));

        let manifest = config.static_manifest.iter().map(|p| at(p.as_str())).collect::<Result<Vec<_>, _>>()?;
        let offline_page = at(&config.offline_page)?;
        let upload_url = at(&config.upload_path)?;
        let health_url = at(&config.health_path)?;

        let lifecycle = Arc::new(LifecycleController::new(
            db.clone(),
            Arc::clone(&network),
            config.generation_names(),
            manifest,
            config.vary_headers.clone(),
        ));
        let router = Router::new(
            db.clone(),
            Arc::clone(&network),
            Arc::clone(&lifecycle),
            RouterConfig {
                origin: origin.clone(),
                api_prefixes: config.api_prefixes.clone(),
                offline_page,
                vary_headers: config.vary_headers.clone(),
            },
        );
        let sync = SyncCoordinator::new(db.clone(), Arc::clone(&network), upload_url, &config.sync_tag);

        Ok(Self { db, network, origin, health_url, lifecycle, router, sync })
    }

    /// Wire the worker and resume whatever version a previous run activated.
    pub async fn open(config: &AppConfig, db: CacheDb, network: Arc<dyn Network>) -> Result<Self, Error> {
        let worker = Self::new(config, db, network)?;
        let state = worker.lifecycle.restore().await?;
        tracing::info!(version = worker.names().version(), state = %state, "worker opened");
        Ok(worker)
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn names(&self) -> &GenerationNames {
        self.lifecycle.names()
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Resolve a client-supplied target against the worker origin.
    pub fn resolve(&self, target: &str) -> Result<Url, Error> {
        resolve(&self.origin, target).map_err(|e| Error::InvalidUrl(e.to_string()))
    }

    pub async fn dispatch(&self, event: Event) -> Result<Outcome, Error> {
        match event {
            Event::Install => self.install().await.map(Outcome::Effects),
            Event::Activate => self.activate().await.map(Outcome::Effects),
            Event::Fetch(request) => self.fetch(request).await.map(Outcome::Response),
            Event::Sync { tag } => self.sync(&tag).await,
            Event::Push { data } => Ok(Outcome::Effects(self.push(data.as_deref()))),
            Event::NotificationClick { action } => Ok(Outcome::Effects(self.notification_click(action.as_deref()))),
            Event::Message(message) => self.message(message).await,
        }
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, Error> {
        Ok(self.router.handle(request).await?)
    }

    /// Install, then activate straight away when skip-waiting was signalled.
    pub async fn install(&self) -> Result<Vec<Effect>, Error> {
        let report = self.lifecycle.install().await?;
        let mut effects = vec![Effect::Installed(report), Effect::SkipWaiting];

        if self.lifecycle.skip_waiting_requested().await {
            effects.extend(self.activate().await?);
        }
        Ok(effects)
    }

    pub async fn activate(&self) -> Result<Vec<Effect>, Error> {
        let report = self.lifecycle.activate().await?;
        Ok(vec![Effect::Activated(report), Effect::ClaimClients])
    }

    /// Drain the upload queue for a matching reconnect signal.
    pub async fn sync(&self, tag: &str) -> Result<Outcome, Error> {
        if !self.sync.handles(tag) {
            tracing::debug!(tag, "ignoring sync signal");
            return Ok(Outcome::Ignored);
        }
        if self.lifecycle.serving().await.is_none() {
            tracing::debug!(tag, "sync signal before activation");
            return Ok(Outcome::Ignored);
        }

        self.sync.drain().await.map(Outcome::Drained)
    }

    pub fn push(&self, data: Option<&str>) -> Vec<Effect> {
        tracing::info!("push notification received");
        vec![Effect::ShowNotification(Notification::for_push(data))]
    }

    pub fn notification_click(&self, action: Option<&str>) -> Vec<Effect> {
        tracing::info!(action = ?action, "notification clicked");
        let mut effects = vec![Effect::CloseNotification];
        if action == Some("explore") {
            effects.push(Effect::OpenWindow { url: self.origin.join("/").unwrap_or_else(|_| self.origin.clone()).to_string() });
        }
        effects
    }

    pub async fn message(&self, message: ControlMessage) -> Result<Outcome, Error> {
        match message {
            ControlMessage::SkipWaiting => {
                if self.lifecycle.skip_waiting().await {
                    Ok(Outcome::Effects(self.activate().await?))
                } else {
                    Ok(Outcome::Effects(vec![Effect::SkipWaiting]))
                }
            }
            ControlMessage::GetVersion => Ok(Outcome::Reply(serde_json::json!({ "version": self.names().version() }))),
            ControlMessage::Unknown => {
                tracing::debug!("ignoring unrecognized control message");
                Ok(Outcome::Ignored)
            }
        }
    }

    /// Upload a receipt image, queueing it if the network is unreachable.
    ///
    /// Only transport failures queue. A payload that can never be sent is
    /// rejected with `InvalidInput` and nothing is stored.
    pub async fn submit_upload(&self, payload: UploadPayload) -> Result<UploadOutcome, Error> {
        if payload.bytes.is_empty() {
            return Err(Error::InvalidInput("upload payload is empty".into()));
        }
        upload_part(&payload)?;

        let request = Request::multipart(self.sync.upload_url().clone(), UPLOAD_FIELD, payload.clone());
        match self.router.handle(request).await {
            Ok(response) if response.is_ok() => Ok(UploadOutcome::Delivered { result: response.json().ok() }),
            Ok(response) => Ok(UploadOutcome::Rejected { status: response.status.as_u16() }),
            Err(NetworkError::InvalidRequest(msg)) => {
                tracing::warn!(error = %msg, "upload cannot be sent; not queueing");
                Err(Error::InvalidInput(msg))
            }
            Err(e) => {
                tracing::warn!(error = %e, "upload failed; queueing for background sync");
                let id = self.defer_upload(&payload).await?;
                Ok(UploadOutcome::Queued { id })
            }
        }
    }

    /// Queue an upload for the next reconnect signal without attempting it.
    pub async fn defer_upload(&self, payload: &UploadPayload) -> Result<String, Error> {
        upload_part(payload)?;
        let id = self.db.enqueue_upload(payload).await?;
        tracing::info!(id = %id, filename = %payload.filename, "upload queued");
        Ok(id)
    }

    /// Check connectivity to the analysis service.
    pub async fn probe_health(&self) -> bool {
        match self.network.send(&Request::get(self.health_url.clone())).await {
            Ok(response) if response.is_ok() => {
                tracing::info!(url = %self.health_url, "analysis service reachable");
                true
            }
            Ok(response) => {
                tracing::warn!(url = %self.health_url, status = response.status.as_u16(), "analysis service unhealthy");
                false
            }
            Err(e) => {
                tracing::warn!(url = %self.health_url, error = %e, "analysis service unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseSource;
    use crate::lifecycle::WorkerProcessState;
    use crate::testing::{FakeNetwork, ok, status};

    fn config() -> AppConfig {
        AppConfig {
            cache_prefix: "receipt-scanner".into(),
            cache_version: "v2".into(),
            static_manifest: vec!["/".into(), "/offline.html".into()],
            ..AppConfig::default()
        }
    }

    fn site() -> Arc<FakeNetwork> {
        Arc::new(FakeNetwork::new(|req| match req.url.path() {
            "/" => Ok(ok("<html>home</html>")),
            "/offline.html" => Ok(ok("<html>offline</html>")),
            "/analyze/upload" => Ok(ok(r#"{"merchant_name":"Cafe","total":9.0}"#)),
            "/health" => Ok(ok(r#"{"status":"healthy"}"#)),
            _ => Ok(status(404, "")),
        }))
    }

    fn payload() -> UploadPayload {
        UploadPayload { filename: "r.jpg".into(), content_type: "image/jpeg".into(), bytes: vec![0xff, 0xd8] }
    }

    async fn worker(network: Arc<FakeNetwork>) -> Worker {
        let db = CacheDb::open_in_memory().await.unwrap();
        Worker::new(&config(), db, network).unwrap()
    }

    #[tokio::test]
    async fn test_install_activates_immediately() {
        let worker = worker(site()).await;

        let effects = worker.install().await.unwrap();

        assert!(matches!(effects.first(), Some(Effect::Installed(r)) if r.cached == 2));
        assert!(effects.iter().any(|e| matches!(e, Effect::ClaimClients)));
        assert_eq!(worker.lifecycle().state().await, WorkerProcessState::Active);
    }

    #[tokio::test]
    async fn test_upgrade_evicts_previous_version() {
        let network = site();
        let db = CacheDb::open_in_memory().await.unwrap();
        let old = AppConfig { cache_version: "v1".into(), ..config() };
        Worker::new(&old, db.clone(), Arc::clone(&network) as Arc<dyn Network>)
            .unwrap()
            .install()
            .await
            .unwrap();

        let next = Worker::new(&config(), db.clone(), network).unwrap();
        let effects = next.install().await.unwrap();

        let deleted = effects.iter().find_map(|e| match e {
            Effect::Activated(report) => Some(report.deleted.clone()),
            _ => None,
        });
        assert_eq!(deleted, Some(vec!["receipt-scanner-static-v1".to_string()]));
        assert!(!db.generation_names().await.unwrap().contains("receipt-scanner-static-v1"));
    }

    #[tokio::test]
    async fn test_fetch_serves_precached_shell_offline() {
        let network = site();
        let worker = worker(Arc::clone(&network)).await;
        worker.install().await.unwrap();
        network.set_offline(true);

        let request = Request::get(worker.resolve("/").unwrap());
        let Outcome::Response(response) = worker.dispatch(Event::Fetch(request)).await.unwrap() else {
            panic!("expected a response");
        };

        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.text(), "<html>home</html>");
    }

    #[tokio::test]
    async fn test_get_version_reply() {
        let worker = worker(site()).await;

        let outcome = worker.dispatch(Event::Message(ControlMessage::GetVersion)).await.unwrap();

        let Outcome::Reply(reply) = outcome else { panic!("expected a reply") };
        assert_eq!(reply["version"], "receipt-scanner-v2");
    }

    #[tokio::test]
    async fn test_skip_waiting_message_activates_waiting_worker() {
        let worker = worker(site()).await;
        worker.lifecycle().install().await.unwrap();
        assert_eq!(worker.lifecycle().state().await, WorkerProcessState::Waiting);

        worker.message(ControlMessage::SkipWaiting).await.unwrap();

        assert_eq!(worker.lifecycle().state().await, WorkerProcessState::Active);
    }

    #[test]
    fn test_control_message_accepts_both_spellings() {
        let a: ControlMessage = serde_json::from_str(r#"{"type":"skip-waiting"}"#).unwrap();
        let b: ControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        let c: ControlMessage = serde_json::from_str(r#"{"type":"GET_VERSION"}"#).unwrap();
        let d: ControlMessage = serde_json::from_str(r#"{"type":"reload"}"#).unwrap();
        assert_eq!(a, ControlMessage::SkipWaiting);
        assert_eq!(b, ControlMessage::SkipWaiting);
        assert_eq!(c, ControlMessage::GetVersion);
        assert_eq!(d, ControlMessage::Unknown);
    }

    #[tokio::test]
    async fn test_submit_upload_queues_when_offline() {
        let network = site();
        let worker = worker(Arc::clone(&network)).await;
        worker.install().await.unwrap();
        network.set_offline(true);

        let outcome = worker.submit_upload(payload()).await.unwrap();

        let UploadOutcome::Queued { id } = outcome else { panic!("expected queued") };
        assert!(worker.db().contains_upload(&id).await.unwrap());

        network.set_offline(false);
        let Outcome::Drained(report) = worker.dispatch(Event::Sync { tag: "background-sync".into() }).await.unwrap()
        else {
            panic!("expected a drain");
        };
        assert_eq!(report.delivered, vec![id]);
        assert_eq!(worker.db().pending_upload_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_upload_delivered() {
        let worker = worker(site()).await;
        worker.install().await.unwrap();

        let outcome = worker.submit_upload(payload()).await.unwrap();

        let UploadOutcome::Delivered { result } = outcome else { panic!("expected delivered") };
        assert_eq!(result.and_then(|r| r.merchant_name).as_deref(), Some("Cafe"));
    }

    #[tokio::test]
    async fn test_submit_upload_rejected_is_not_queued() {
        let network = Arc::new(FakeNetwork::new(|_| Ok(status(422, "bad image"))));
        let worker = worker(network).await;

        let outcome = worker.submit_upload(payload()).await.unwrap();

        assert!(matches!(outcome, UploadOutcome::Rejected { status: 422 }));
        assert_eq!(worker.db().pending_upload_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_upload_bad_content_type_is_not_queued() {
        let network = site();
        let worker = worker(Arc::clone(&network)).await;
        worker.install().await.unwrap();
        let bad = UploadPayload { content_type: "not a mime".into(), ..payload() };

        let result = worker.submit_upload(bad.clone()).await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(matches!(worker.defer_upload(&bad).await, Err(Error::InvalidInput(_))));
        assert_eq!(worker.db().pending_upload_count().await.unwrap(), 0);
        assert!(!network.requests().iter().any(|r| r.starts_with("POST")));
    }

    #[tokio::test]
    async fn test_submit_upload_unbuildable_request_is_not_queued() {
        let network = Arc::new(FakeNetwork::new(|_| Err(NetworkError::InvalidRequest("builder error".into()))));
        let worker = worker(network).await;

        let result = worker.submit_upload(payload()).await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(worker.db().pending_upload_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_upload_queues_on_timeout() {
        let worker = worker(Arc::new(FakeNetwork::new(|_| Err(NetworkError::Timeout)))).await;

        let outcome = worker.submit_upload(payload()).await.unwrap();

        assert!(matches!(outcome, UploadOutcome::Queued { .. }));
        assert_eq!(worker.db().pending_upload_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restart_offline_serves_from_cache() {
        let db = CacheDb::open_in_memory().await.unwrap();
        Worker::new(&config(), db.clone(), site()).unwrap().install().await.unwrap();

        let restarted = Worker::open(&config(), db.clone(), Arc::new(FakeNetwork::offline())).await.unwrap();
        assert_eq!(restarted.lifecycle().state().await, WorkerProcessState::Active);

        let home = restarted.fetch(Request::get(restarted.resolve("/").unwrap())).await.unwrap();
        assert_eq!(home.source, ResponseSource::Cache);
        assert_eq!(home.text(), "<html>home</html>");

        let health = restarted.fetch(Request::get(restarted.resolve("/health").unwrap())).await.unwrap();
        assert_eq!(health.status, reqwest::StatusCode::SERVICE_UNAVAILABLE);

        assert!(matches!(restarted.install().await, Err(Error::InstallFailed(_))));
        assert_eq!(restarted.lifecycle().state().await, WorkerProcessState::Active);
        let again = restarted.fetch(Request::get(restarted.resolve("/").unwrap())).await.unwrap();
        assert_eq!(again.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_restart_on_new_version_serves_previous_cache() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let old = AppConfig { cache_version: "v1".into(), ..config() };
        Worker::new(&old, db.clone(), site()).unwrap().install().await.unwrap();

        let next = Worker::open(&config(), db.clone(), Arc::new(FakeNetwork::offline())).await.unwrap();
        assert_eq!(next.lifecycle().state().await, WorkerProcessState::Installing);
        assert!(next.install().await.is_err());

        let home = next.fetch(Request::get(next.resolve("/").unwrap())).await.unwrap();
        assert_eq!(home.source, ResponseSource::Cache);
        assert!(db.generation_names().await.unwrap().contains("receipt-scanner-static-v1"));
    }

    #[tokio::test]
    async fn test_sync_ignores_other_tags() {
        let worker = worker(site()).await;
        worker.install().await.unwrap();

        let outcome = worker.sync("periodic-refresh").await.unwrap();

        assert!(matches!(outcome, Outcome::Ignored));
    }

    #[tokio::test]
    async fn test_push_and_notification_click() {
        let worker = worker(site()).await;

        let effects = worker.push(None);
        let Some(Effect::ShowNotification(n)) = effects.first() else { panic!("expected a notification") };
        assert_eq!(n.title, "Receipt Scanner");
        assert_eq!(n.body, "New receipt analysis complete!");
        assert_eq!(n.actions.len(), 2);

        let effects = worker.notification_click(Some("explore"));
        assert!(matches!(effects[0], Effect::CloseNotification));
        assert!(matches!(&effects[1], Effect::OpenWindow { url } if url == "http://localhost:8000/"));

        assert_eq!(worker.notification_click(Some("close")).len(), 1);
    }

    #[tokio::test]
    async fn test_probe_health() {
        assert!(worker(site()).await.probe_health().await);
        assert!(!worker(Arc::new(FakeNetwork::offline())).await.probe_health().await);
    }

    #[tokio::test]
    async fn test_fetch_transport_error_maps_to_network_unavailable() {
        let network = Arc::new(FakeNetwork::new(|_| Err(NetworkError::Timeout)));
        let worker = worker(network).await;

        let request = Request::new(reqwest::Method::POST, worker.resolve("/analyze/upload").unwrap());
        let result = worker.fetch(request).await;

        assert!(matches!(result, Err(Error::NetworkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_rejects_invalid_origin() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let config = AppConfig { origin: "not a url".into(), ..config() };

        let result = Worker::new(&config, db, Arc::new(FakeNetwork::offline()));

        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
