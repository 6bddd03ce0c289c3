//! Install, activate and request handling against an in-memory network

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use swcache_core::{
    Cache, CacheQueryOptions, CacheStorage, ExtendableEvent, FetchOptions, Fetcher, MemoryCacheStorage,
    Request, Response, ResponseType, RouteHandlerOptions, WorkerError, WorkerResult, WorkerScope,
};
use swcache_precaching::{
    InstallResult, ManifestEntry, PrecacheConfig, PrecacheEntry, PrecacheFallbackPlugin,
    PrecacheWorker,
};
use swcache_strategies::{HandlerOptions, Strategy, StrategyCore, StrategyHandler};
use url::Url;

/// Serves canned responses by path and records every request
#[derive(Default)]
struct FakeNetwork {
    responses: Mutex<HashMap<String, (u16, &'static str)>>,
    requests: Mutex<Vec<Request>>,
}

impl FakeNetwork {
    fn serve(&self, path: &str, status: u16, body: &'static str) {
        self.responses
            .lock()
            .insert(path.to_string(), (status, body));
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request, _: Option<&FetchOptions>) -> WorkerResult<Response> {
        self.requests.lock().push(request.clone());
        let served = self.responses.lock().get(request.url.path()).copied();
        match served {
            Some((status, body)) => Ok(Response::new(status, body)
                .with_url(request.url.clone())
                .with_type(ResponseType::Basic)),
            None => Err(WorkerError::Network(format!("no route to {}", request.url))),
        }
    }
}

struct Harness {
    worker: PrecacheWorker,
    network: Arc<FakeNetwork>,
    storage: Arc<MemoryCacheStorage>,
}

fn harness(config: PrecacheConfig) -> Harness {
    let network = Arc::new(FakeNetwork::default());
    let storage = Arc::new(MemoryCacheStorage::unlimited());
    let scope = WorkerScope::new(
        Url::parse("https://example.com/sw.js").unwrap(),
        storage.clone(),
        network.clone(),
    );
    let worker = PrecacheWorker::new(Arc::new(scope), config).unwrap();
    Harness {
        worker,
        network,
        storage,
    }
}

fn revisioned(url: &str, revision: &str) -> ManifestEntry {
    PrecacheEntry::new(url).with_revision(revision).into()
}

async fn install(worker: &PrecacheWorker) -> WorkerResult<InstallResult> {
    let event = Arc::new(ExtendableEvent::install());
    let result = worker.install(&event);
    let settled = event.settle().await;
    let result = result.await;
    if result.is_ok() {
        settled?;
    }
    result
}

async fn fetch(worker: &PrecacheWorker, url: &str) -> Option<WorkerResult<Response>> {
    let event = Arc::new(ExtendableEvent::fetch(Request::get(url).unwrap()));
    let response = worker.fetch(&event)?.await;
    event.settle().await.unwrap();
    Some(response)
}

#[tokio::test]
async fn test_install_then_match_precache() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/app.js", 200, "console.log('app')");
    h.worker.precache(&[revisioned("/app.js", "abc")]).unwrap();

    let result = install(&h.worker).await.unwrap();
    assert_eq!(result.updated_urls, vec!["https://example.com/app.js"]);

    let cached = h.worker.match_precache("/app.js").await.unwrap().unwrap();
    assert_eq!(cached.body, "console.log('app')");
    let by_request = h
        .worker
        .controller()
        .match_precache_request(&Request::get("https://example.com/app.js#main").unwrap())
        .await
        .unwrap();
    assert_eq!(by_request, Some(cached));
    assert_eq!(
        h.worker.controller().get_cached_urls(),
        vec!["https://example.com/app.js"]
    );

    // Stored under the revisioned key, fetched with the cache bypassed
    let cache_key = h.worker.controller().get_cache_key_for_url("/app.js").unwrap();
    assert!(cache_key.contains("__WB_REVISION__=abc"));
    let request = h.network.requests.lock()[0].clone();
    assert_eq!(request.cache, swcache_core::RequestCache::Reload);
}

#[tokio::test]
async fn test_second_install_reports_not_updated() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/a.js", 200, "a");
    h.network.serve("/b.css", 200, "b");
    h.worker
        .precache(&[revisioned("/a.js", "1"), ManifestEntry::from("/b.css")])
        .unwrap();

    let first = install(&h.worker).await.unwrap();
    assert_eq!(
        first.updated_urls,
        vec!["https://example.com/a.js", "https://example.com/b.css"]
    );
    assert!(first.not_updated_urls.is_empty());

    let second = install(&h.worker).await.unwrap();
    assert!(second.updated_urls.is_empty());
    assert_eq!(second.not_updated_urls.len(), 2);
    assert_eq!(h.network.request_count(), 2);
}

#[tokio::test]
async fn test_install_report_plugin_is_removed() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/a.js", 200, "a");
    h.worker.precache(&[revisioned("/a.js", "1")]).unwrap();
    install(&h.worker).await.unwrap();

    // Cache key, redirect copier and default cacheability remain
    let plugins = h.worker.controller().strategy().core().plugins();
    assert_eq!(plugins.len(), 3);
}

#[tokio::test]
async fn test_install_fails_on_uncacheable_response() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/ok.js", 200, "ok");
    h.network.serve("/missing.js", 404, "not found");
    h.worker
        .precache(&[revisioned("/ok.js", "1"), revisioned("/missing.js", "1")])
        .unwrap();

    let err = install(&h.worker).await.unwrap_err();
    assert_eq!(
        err,
        WorkerError::BadPrecachingResponse {
            url: "https://example.com/missing.js".to_string(),
            status: 404,
        }
    );
}

#[tokio::test]
async fn test_install_fails_on_network_error() {
    let h = harness(PrecacheConfig::default());
    h.worker.precache(&[revisioned("/gone.js", "1")]).unwrap();
    let err = install(&h.worker).await.unwrap_err();
    assert_eq!(err.kind(), "network-error");
}

#[tokio::test]
async fn test_activate_deletes_entries_outside_the_manifest() {
    let h = harness(PrecacheConfig::default());
    h.worker
        .precache(&[ManifestEntry::from("/a.js"), ManifestEntry::from("/c.js")])
        .unwrap();

    let cache = h.storage.open(h.worker.controller().cache_name()).await.unwrap();
    for path in ["/a.js", "/b.js", "/c.js"] {
        let request = Request::get(&format!("https://example.com{path}")).unwrap();
        cache.put(&request, Response::ok(path)).await.unwrap();
    }

    let event = Arc::new(ExtendableEvent::activate());
    let result = h.worker.activate(&event).await.unwrap();
    event.settle().await.unwrap();
    assert_eq!(result.deleted_urls, vec!["https://example.com/b.js"]);

    let remaining: Vec<String> = cache
        .keys(None, CacheQueryOptions::default())
        .await
        .unwrap()
        .iter()
        .map(|request| request.url.to_string())
        .collect();
    assert_eq!(
        remaining,
        vec!["https://example.com/a.js", "https://example.com/c.js"]
    );

    let event = Arc::new(ExtendableEvent::activate());
    let again = h.worker.activate(&event).await.unwrap();
    assert!(again.deleted_urls.is_empty());
}

#[tokio::test]
async fn test_activate_cleans_up_outdated_precaches() {
    let h = harness(PrecacheConfig::default().with_cleanup_outdated_caches(true));
    let outdated = "swcache-precache-v1-https://example.com/";
    h.storage.open(outdated).await.unwrap();
    h.storage.open("swcache-runtime-https://example.com/").await.unwrap();

    let event = Arc::new(ExtendableEvent::activate());
    let _ = h.worker.activate(&event);
    event.settle().await.unwrap();

    assert!(!h.storage.has(outdated).await.unwrap());
    assert!(h.storage.has("swcache-runtime-https://example.com/").await.unwrap());
}

#[tokio::test]
async fn test_route_matches_url_variations() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/docs/index.html", 200, "docs index");
    h.network.serve("/about.html", 200, "about page");
    h.worker
        .precache_and_route(&[
            revisioned("/docs/index.html", "1"),
            revisioned("/about.html", "1"),
        ])
        .unwrap();
    install(&h.worker).await.unwrap();
    let requests_after_install = h.network.request_count();

    let docs = fetch(&h.worker, "https://example.com/docs/").await.unwrap().unwrap();
    assert_eq!(docs.body, "docs index");

    let about = fetch(&h.worker, "https://example.com/about?utm_source=feed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(about.body, "about page");

    assert_eq!(h.network.request_count(), requests_after_install);
    assert!(fetch(&h.worker, "https://example.com/unknown.js").await.is_none());
}

#[tokio::test]
async fn test_bound_handler_serves_its_url_for_any_request() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/index.html", 200, "<html>shell</html>");
    h.worker.precache(&[revisioned("/index.html", "7")]).unwrap();
    install(&h.worker).await.unwrap();

    let handler = h.worker.create_handler_bound_to_url("/index.html").unwrap();
    let request = Request::navigate(Url::parse("https://example.com/some/deep/route").unwrap());
    let event = Arc::new(ExtendableEvent::fetch(request.clone()));
    let response = handler
        .handle(RouteHandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();

    assert_eq!(response.body, "<html>shell</html>");
}

#[tokio::test]
async fn test_missing_entry_is_repaired_when_integrity_is_known() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/lib.js", 200, "lib");
    h.worker
        .precache_and_route(&[PrecacheEntry::new("/lib.js").with_integrity("sha256-abc").into()])
        .unwrap();

    // Never installed, so the request falls back to the network
    let response = fetch(&h.worker, "https://example.com/lib.js").await.unwrap().unwrap();
    assert_eq!(response.body, "lib");
    assert_eq!(
        h.network.requests.lock()[0].integrity.as_deref(),
        Some("sha256-abc")
    );

    let repaired = h.worker.match_precache("/lib.js").await.unwrap();
    assert_eq!(repaired.unwrap().body, "lib");
}

#[tokio::test]
async fn test_missing_entry_without_integrity_is_not_cached() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/lib.js", 200, "lib");
    h.worker.precache_and_route(&[revisioned("/lib.js", "1")]).unwrap();

    let response = fetch(&h.worker, "https://example.com/lib.js").await.unwrap().unwrap();
    assert_eq!(response.body, "lib");
    assert!(h.worker.match_precache("/lib.js").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_entry_without_network_fallback() {
    let h = harness(PrecacheConfig::default().with_fallback_to_network(false));
    h.network.serve("/lib.js", 200, "lib");
    h.worker.precache_and_route(&[revisioned("/lib.js", "1")]).unwrap();

    let err = fetch(&h.worker, "https://example.com/lib.js")
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), "missing-precache-entry");
    assert_eq!(h.network.request_count(), 0);
}

struct NetworkOnly {
    core: StrategyCore,
}

#[async_trait]
impl Strategy for NetworkOnly {
    fn core(&self) -> &StrategyCore {
        &self.core
    }

    async fn handle_request(
        &self,
        request: Request,
        handler: &StrategyHandler,
    ) -> WorkerResult<Response> {
        handler.fetch(request).await
    }
}

#[tokio::test]
async fn test_fallback_plugin_serves_precached_page() {
    let h = harness(PrecacheConfig::default());
    h.network.serve("/offline.html", 200, "you are offline");
    h.worker.precache(&[revisioned("/offline.html", "1")]).unwrap();
    install(&h.worker).await.unwrap();

    let strategy = Arc::new(NetworkOnly {
        core: StrategyCore::new(Arc::clone(h.worker.scope())).with_plugins([
            Arc::new(PrecacheFallbackPlugin::new(
                "/offline.html",
                Arc::clone(h.worker.controller()),
            )) as Arc<dyn swcache_strategies::StrategyPlugin>,
        ]),
    });

    let request = Request::get("https://example.com/api/news").unwrap();
    let event = Arc::new(ExtendableEvent::fetch(request.clone()));
    let response = strategy
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();

    assert_eq!(response.body, "you are offline");
}
