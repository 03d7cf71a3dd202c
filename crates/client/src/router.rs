//! Request routing: pass-through, network-only or cache-first.
//!
//! | request                         | policy                          |
//! |---------------------------------|---------------------------------|
//! | any method other than GET       | pass-through, no cache access   |
//! | GET under an API prefix         | network only, 503 JSON offline  |
//! | any other GET                   | cache first, network fallback   |
//!
//! Cache-first probes the static generation, then the dynamic one. Hits are
//! served verbatim with no revalidation. Misses that come back as plain
//! same-origin 200s are copied into the dynamic generation.
//!
//! Until some version is active the cache is never read or written, but GET
//! failures still get the same synthetic 503 fallbacks.

use std::sync::Arc;

use receipt_sw_core::{CacheDb, GenerationNames, RequestKey, StoredResponse};
use reqwest::Method;
use url::Url;

use crate::fetch::{Network, NetworkError, same_origin};
use crate::http::{Request, Response, ResponseKind};
use crate::lifecycle::LifecycleController;

/// Handling policy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PassThrough,
    NetworkOnly,
    CacheFirst,
}

/// Routing settings derived from the app configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Responses cached from this origin come back `basic`, others `cors`.
    pub origin: Url,
    pub api_prefixes: Vec<String>,
    /// Absolute URL of the offline fallback page.
    pub offline_page: Url,
    pub vary_headers: Vec<String>,
}

/// Build the cache key for `request`, keeping only the configured headers.
pub fn request_key(request: &Request, vary_headers: &[String]) -> RequestKey {
    let vary = vary_headers
        .iter()
        .filter_map(|name| request.header(name).map(|value| (name.as_str(), value)));
    RequestKey::new(request.method.as_str(), request.url.as_str(), vary)
}

pub struct Router {
    db: CacheDb,
    network: Arc<dyn Network>,
    lifecycle: Arc<LifecycleController>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        db: CacheDb, network: Arc<dyn Network>, lifecycle: Arc<LifecycleController>, config: RouterConfig,
    ) -> Self {
        Self { db, network, lifecycle, config }
    }

    pub fn classify(&self, request: &Request) -> Route {
        if request.method != Method::GET {
            return Route::PassThrough;
        }

        let path = request.url.path();
        if self.config.api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            Route::NetworkOnly
        } else {
            Route::CacheFirst
        }
    }

    /// Route one request.
    ///
    /// GET requests always yield a response, synthesized when the network is
    /// unreachable, whether or not a version is active yet. Only pass-through
    /// requests surface a `NetworkError`, so the caller can decide to queue a
    /// failed upload.
    pub async fn handle(&self, request: Request) -> Result<Response, NetworkError> {
        let Some(names) = self.lifecycle.serving().await else {
            tracing::debug!(url = %request.url, "no active version; going to network");
            return self.uncontrolled(&request).await;
        };

        match self.classify(&request) {
            Route::PassThrough => self.network.send(&request).await,
            Route::NetworkOnly => Ok(self.network_only(&request).await),
            Route::CacheFirst => Ok(self.cache_first(&names, &request).await),
        }
    }

    /// Network for everything, with the cache left untouched.
    async fn uncontrolled(&self, request: &Request) -> Result<Response, NetworkError> {
        match self.classify(request) {
            Route::PassThrough => self.network.send(request).await,
            Route::NetworkOnly => Ok(self.network_only(request).await),
            Route::CacheFirst => match self.network.send(request).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    tracing::warn!(url = %request.url, error = %e, "fetch failed");
                    Ok(if request.accepts_html() { Response::offline_page() } else { Response::offline_text() })
                }
            },
        }
    }

    async fn network_only(&self, request: &Request) -> Response {
        match self.network.send(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "API request failed");
                Response::network_unavailable()
            }
        }
    }

    async fn cache_first(&self, names: &GenerationNames, request: &Request) -> Response {
        let key = request_key(request, &self.config.vary_headers);

        if let Some(stored) = self.lookup(names, &key).await {
            tracing::debug!(url = %request.url, "cache hit");
            return Response::from_stored(stored, self.kind_of(&request.url));
        }

        tracing::debug!(url = %request.url, "cache miss");
        match self.network.send(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_dynamic(names, &key, &response).await;
                }
                response
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "fetch failed");
                self.offline_fallback(names, request).await
            }
        }
    }

    /// Probe the static generation, then the dynamic one.
    async fn lookup(&self, names: &GenerationNames, key: &RequestKey) -> Option<StoredResponse> {
        for name in [names.static_name(), names.dynamic_name()] {
            match self.probe(name, key).await {
                Ok(Some(stored)) => return Some(stored),
                Ok(None) => {}
                Err(e) => tracing::warn!(generation = name, error = %e, "cache lookup failed"),
            }
        }
        None
    }

    async fn probe(&self, name: &str, key: &RequestKey) -> Result<Option<StoredResponse>, receipt_sw_core::Error> {
        self.db.generation(name).lookup(key).await
    }

    /// Write-through to the dynamic generation; failures never reach the caller.
    async fn store_dynamic(&self, names: &GenerationNames, key: &RequestKey, response: &Response) {
        let stored = response.to_stored();
        let result = match self.db.open_generation(names.dynamic_name()).await {
            Ok(generation) => generation.put(key, &stored).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::warn!(url = key.url(), error = %e, "cache write failed");
        }
    }

    async fn offline_fallback(&self, names: &GenerationNames, request: &Request) -> Response {
        if !request.accepts_html() {
            return Response::offline_text();
        }

        let key = RequestKey::get(self.config.offline_page.as_str());
        match self.lookup(names, &key).await {
            Some(stored) => Response::from_stored(stored, self.kind_of(&self.config.offline_page)),
            None => Response::offline_page(),
        }
    }

    fn kind_of(&self, url: &Url) -> ResponseKind {
        if same_origin(&self.config.origin, url) { ResponseKind::Basic } else { ResponseKind::Cors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ResponseKind, ResponseSource};
    use crate::testing::{FakeNetwork, cross_origin, ok, status};
    use reqwest::StatusCode;

    const ORIGIN: &str = "http://localhost:8000";

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    async fn active_router(db: &CacheDb, network: Arc<FakeNetwork>) -> Router {
        let lifecycle = Arc::new(LifecycleController::new(
            db.clone(),
            Arc::clone(&network) as Arc<dyn Network>,
            GenerationNames::new("", "v1"),
            Vec::new(),
            Vec::new(),
        ));
        lifecycle.install().await.unwrap();
        lifecycle.activate().await.unwrap();

        Router::new(db.clone(), network, lifecycle, router_config())
    }

    fn router_config() -> RouterConfig {
        RouterConfig {
            origin: url("/"),
            api_prefixes: vec!["/analyze".into(), "/health".into()],
            offline_page: url("/offline.html"),
            vary_headers: Vec::new(),
        }
    }

    fn idle_router(db: &CacheDb, network: Arc<FakeNetwork>) -> Router {
        let lifecycle = Arc::new(LifecycleController::new(
            db.clone(),
            Arc::clone(&network) as Arc<dyn Network>,
            GenerationNames::new("", "v1"),
            Vec::new(),
            Vec::new(),
        ));
        Router::new(db.clone(), network, lifecycle, router_config())
    }

    async fn entry_count(db: &CacheDb) -> u64 {
        let mut total = 0;
        for name in db.generation_names().await.unwrap() {
            total += db.open_generation(&name).await.unwrap().len().await.unwrap();
        }
        total
    }

    #[tokio::test]
    async fn test_classify() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;

        assert_eq!(router.classify(&Request::get(url("/styles.css"))), Route::CacheFirst);
        assert_eq!(router.classify(&Request::get(url("/analyze/upload"))), Route::NetworkOnly);
        assert_eq!(router.classify(&Request::get(url("/health"))), Route::NetworkOnly);
        assert_eq!(router.classify(&Request::new(Method::POST, url("/analyze/upload"))), Route::PassThrough);
        assert_eq!(router.classify(&Request::new(Method::DELETE, url("/receipts/1"))), Route::PassThrough);
    }

    #[tokio::test]
    async fn test_non_get_never_touches_cache() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::new(|_| Ok(ok("deleted"))));
        let router = active_router(&db, network).await;
        let before = entry_count(&db).await;

        let response = router
            .handle(Request::new(Method::DELETE, url("/receipts/abc")))
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(entry_count(&db).await, before);
        assert_eq!(before, 0);
    }

    #[tokio::test]
    async fn test_pass_through_surfaces_transport_error() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;

        let result = router.handle(Request::new(Method::POST, url("/analyze/upload"))).await;

        assert!(matches!(result, Err(NetworkError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_api_offline_returns_503_json() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;

        let response = router.handle(Request::get(url("/health"))).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().unwrap();
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn test_api_response_not_cached() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::new(|_| Ok(ok(r#"{"status":"healthy"}"#))));
        let router = active_router(&db, network).await;

        let response = router.handle(Request::get(url("/health"))).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(entry_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_stores_and_then_hits() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::new(|_| Ok(ok("console.log('app')"))));
        let router = active_router(&db, Arc::clone(&network)).await;

        let first = router.handle(Request::get(url("/app.js"))).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);

        let dynamic = db.open_generation("dynamic-v1").await.unwrap();
        let stored = dynamic.lookup(&RequestKey::get(url("/app.js").as_str())).await.unwrap().unwrap();
        assert_eq!(stored.body, first.body.to_vec());

        network.set_offline(true);
        let second = router.handle(Request::get(url("/app.js"))).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body, first.body);
    }

    #[tokio::test]
    async fn test_hit_is_served_without_network() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::offline());
        let router = active_router(&db, Arc::clone(&network)).await;
        let key = RequestKey::get(url("/styles.css").as_str());
        let stored = StoredResponse::new(200, "OK", vec![("content-type".into(), "text/css".into())], b"h1{}".to_vec());
        db.open_generation("static-v1").await.unwrap().put(&key, &stored).await.unwrap();

        let response = router.handle(Request::get(url("/styles.css"))).await.unwrap();

        assert_eq!(&response.body[..], b"h1{}");
        assert_eq!(response.content_type(), Some("text/css"));
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn test_static_generation_probed_first() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;
        let key = RequestKey::get(url("/").as_str());
        db.open_generation("dynamic-v1")
            .await
            .unwrap()
            .put(&key, &StoredResponse::new(200, "OK", Vec::new(), b"dynamic".to_vec()))
            .await
            .unwrap();
        db.open_generation("static-v1")
            .await
            .unwrap()
            .put(&key, &StoredResponse::new(200, "OK", Vec::new(), b"static".to_vec()))
            .await
            .unwrap();

        let response = router.handle(Request::get(url("/"))).await.unwrap();

        assert_eq!(&response.body[..], b"static");
    }

    #[tokio::test]
    async fn test_non_200_and_cross_origin_not_cached() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::new(|req| match req.url.path() {
            "/missing.png" => Ok(status(404, "nope")),
            _ => Ok(cross_origin("font")),
        }));
        let router = active_router(&db, network).await;

        let missing = router.handle(Request::get(url("/missing.png"))).await.unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let font = router
            .handle(Request::get(Url::parse("https://cdnjs.cloudflare.com/all.min.css").unwrap()))
            .await
            .unwrap();
        assert_eq!(font.kind, ResponseKind::Cors);

        assert_eq!(entry_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_offline_html_miss_uses_cached_offline_page() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;
        db.open_generation("static-v1")
            .await
            .unwrap()
            .put(
                &RequestKey::get(url("/offline.html").as_str()),
                &StoredResponse::new(200, "OK", Vec::new(), b"<h1>offline</h1>".to_vec()),
            )
            .await
            .unwrap();

        let request = Request::get(url("/receipts/view")).with_header("Accept", "text/html");
        let response = router.handle(request).await.unwrap();

        assert_eq!(&response.body[..], b"<h1>offline</h1>");
    }

    #[tokio::test]
    async fn test_offline_html_miss_without_cached_page() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;

        let request = Request::get(url("/somewhere")).with_header("Accept", "text/html");
        let response = router.handle(request).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.content_type().unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_offline_asset_miss_returns_503_text() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;

        let response = router.handle(Request::get(url("/logo.png"))).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "Offline content not available");
    }

    #[tokio::test]
    async fn test_store_failure_still_returns_response() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::new(|_| Ok(ok("fresh"))));
        let router = active_router(&db, network).await;
        db.clone().close().await.unwrap();

        let response = router.handle(Request::get(url("/late.js"))).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"fresh");
    }

    #[tokio::test]
    async fn test_uncontrolled_requests_go_to_network() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = idle_router(&db, Arc::new(FakeNetwork::new(|_| Ok(ok("net")))));

        let response = router.handle(Request::get(url("/app.js"))).await.unwrap();

        assert_eq!(response.source, ResponseSource::Network);
        assert!(db.generation_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uncontrolled_offline_get_is_synthesized() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_generation("static-v1")
            .await
            .unwrap()
            .put(&RequestKey::get(url("/app.js").as_str()), &StoredResponse::new(200, "OK", Vec::new(), b"x".to_vec()))
            .await
            .unwrap();
        let router = idle_router(&db, Arc::new(FakeNetwork::offline()));

        let health = router.handle(Request::get(url("/health"))).await.unwrap();
        assert_eq!(health.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(health.json::<serde_json::Value>().unwrap().get("error").is_some());

        let asset = router.handle(Request::get(url("/app.js"))).await.unwrap();
        assert_eq!(asset.source, ResponseSource::Synthetic);
        assert_eq!(asset.text(), "Offline content not available");

        let page = router
            .handle(Request::get(url("/")).with_header("Accept", "text/html"))
            .await
            .unwrap();
        assert_eq!(page.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(page.content_type().unwrap().starts_with("text/html"));

        let upload = router.handle(Request::new(Method::POST, url("/analyze/upload"))).await;
        assert!(matches!(upload, Err(NetworkError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_cache_hit_kind_follows_origin() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let router = active_router(&db, Arc::new(FakeNetwork::offline())).await;
        let cdn = Url::parse("https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css").unwrap();
        let generation = db.open_generation("static-v1").await.unwrap();
        for target in [&cdn, &url("/styles.css")] {
            generation
                .put(&RequestKey::get(target.as_str()), &StoredResponse::new(200, "OK", Vec::new(), b"css".to_vec()))
                .await
                .unwrap();
        }

        let font = router.handle(Request::get(cdn)).await.unwrap();
        assert_eq!(font.source, ResponseSource::Cache);
        assert_eq!(font.kind, ResponseKind::Cors);

        let styles = router.handle(Request::get(url("/styles.css"))).await.unwrap();
        assert_eq!(styles.kind, ResponseKind::Basic);
    }

    #[test]
    fn test_request_key_uses_configured_headers_only() {
        let request = Request::get(url("/"))
            .with_header("Accept", "text/html")
            .with_header("X-Trace", "1");
        let key = request_key(&request, &["accept".to_string()]);
        assert_eq!(key.vary(), &[("accept".to_string(), "text/html".to_string())]);
    }
}
