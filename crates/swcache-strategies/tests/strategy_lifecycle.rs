//! Strategy and handler lifecycle tests
//!
//! These drive strategies through `handle_all` against an in-memory cache
//! storage and a scripted network.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use swcache_core::{
    CacheQueryOptions, CacheStorage, ExtendableEvent, FetchEventData, FetchOptions, Fetcher,
    MemoryCacheConfig, MemoryCacheStorage, Request, Response, WorkerError, WorkerResult,
    WorkerScope,
};
use swcache_strategies::plugin::{
    CacheDidUpdate, CacheDidUpdateParams, CacheKeyWillBeUsed, CacheKeyWillBeUsedParams,
    FetchDidFail, FetchDidFailParams, HandlerDidComplete, HandlerDidCompleteParams,
    HandlerDidError, HandlerDidErrorParams, HandlerWillRespond, HandlerWillRespondParams,
    HandlerWillStart, HandlerWillStartParams, RequestWillFetch, RequestWillFetchParams,
};
use swcache_strategies::{
    CacheKeyMode, HandlerOptions, Strategy, StrategyCore, StrategyHandler, StrategyPlugin,
};
use url::Url;

const ORIGIN: &str = "https://example.com";

/// Network that serves a fixed set of responses and records every request
#[derive(Default)]
struct ScriptedNetwork {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
    fn serve(&self, path: &str, response: Response) {
        self.responses
            .lock()
            .insert(format!("{ORIGIN}{path}"), response);
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &Request, _: Option<&FetchOptions>) -> WorkerResult<Response> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .get(request.url.as_str())
            .cloned()
            .map(|response| response.with_url(request.url.clone()))
            .ok_or_else(|| WorkerError::Network(format!("no route to {}", request.url)))
    }
}

type Decide =
    dyn Fn(Request, StrategyHandler) -> BoxFuture<'static, WorkerResult<Response>> + Send + Sync;

/// Strategy whose decision hook is a closure
struct Scripted {
    core: StrategyCore,
    decide: Box<Decide>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new<F>(scope: &Arc<WorkerScope>, decide: F) -> Arc<Self>
    where
        F: Fn(Request, StrategyHandler) -> BoxFuture<'static, WorkerResult<Response>>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            core: StrategyCore::new(Arc::clone(scope)).with_cache_name("test-cache"),
            decide: Box::new(decide),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Strategy for Scripted {
    fn core(&self) -> &StrategyCore {
        &self.core
    }

    async fn handle_request(
        &self,
        request: Request,
        handler: &StrategyHandler,
    ) -> WorkerResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.decide)(request, handler.clone()).await
    }
}

fn setup(storage: MemoryCacheStorage) -> (Arc<WorkerScope>, Arc<ScriptedNetwork>) {
    let network = Arc::new(ScriptedNetwork::default());
    let scope = Arc::new(WorkerScope::new(
        Url::parse(&format!("{ORIGIN}/sw.js")).unwrap(),
        Arc::new(storage),
        Arc::clone(&network) as Arc<dyn Fetcher>,
    ));
    (scope, network)
}

fn get(path: &str) -> Request {
    Request::get(&format!("{ORIGIN}{path}")).unwrap()
}

fn fetch_event(request: &Request) -> Arc<ExtendableEvent> {
    Arc::new(ExtendableEvent::fetch(request.clone()))
}

async fn cached(scope: &WorkerScope, path: &str) -> Option<Response> {
    scope
        .cache_storage()
        .match_request(&get(path), Some("test-cache"), CacheQueryOptions::default())
        .await
        .unwrap()
}

fn put_strategy(scope: &Arc<WorkerScope>) -> Arc<Scripted> {
    Scripted::new(scope, |request, handler| {
        async move {
            let response = handler.fetch(request.clone()).await?;
            let stored = handler.cache_put(request, Some(response.clone())).await?;
            Ok(response.with_status_text(if stored { "stored" } else { "skipped" }))
        }
        .boxed()
    })
}

/// Records callback invocations into a shared log
struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn new(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            label,
            log: Arc::clone(log),
        })
    }

    fn record(&self, slot: &str) {
        self.log.lock().push(format!("{}:{slot}", self.label));
    }
}

#[async_trait]
impl HandlerWillStart for Recorder {
    async fn handler_will_start(&self, params: HandlerWillStartParams<'_>) -> WorkerResult<()> {
        params.state.set("seen", serde_json::Value::from(self.label));
        self.record("start");
        Ok(())
    }
}

#[async_trait]
impl HandlerWillRespond for Recorder {
    async fn handler_will_respond(
        &self,
        params: HandlerWillRespondParams<'_>,
    ) -> WorkerResult<Response> {
        // State written by handler_will_start is private to this plugin
        assert_eq!(
            params.state.get("seen"),
            Some(serde_json::Value::from(self.label))
        );
        self.record("respond");
        Ok(params.response)
    }
}

#[async_trait]
impl HandlerDidComplete for Recorder {
    async fn handler_did_complete(
        &self,
        params: HandlerDidCompleteParams<'_>,
    ) -> WorkerResult<()> {
        let outcome = if params.error.is_some() { "error" } else { "ok" };
        self.record(&format!("complete-{outcome}"));
        Ok(())
    }
}

impl StrategyPlugin for Recorder {
    fn as_handler_will_start(&self) -> Option<&dyn HandlerWillStart> {
        Some(self)
    }

    fn as_handler_will_respond(&self) -> Option<&dyn HandlerWillRespond> {
        Some(self)
    }

    fn as_handler_did_complete(&self) -> Option<&dyn HandlerDidComplete> {
        Some(self)
    }
}

#[tokio::test]
async fn test_default_cacheability_stores_only_200() {
    let (scope, network) = setup(MemoryCacheStorage::unlimited());
    network.serve("/ok.js", Response::ok("ok"));
    network.serve("/missing.js", Response::new(404, "missing"));
    let strategy = put_strategy(&scope);

    let request = get("/ok.js");
    let event = fetch_event(&request);
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();
    assert_eq!(response.status_text, "stored");
    assert_eq!(cached(&scope, "/ok.js").await.unwrap().body, "ok");

    let request = get("/missing.js");
    let event = fetch_event(&request);
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "skipped");
    assert!(cached(&scope, "/missing.js").await.is_none());
}

#[tokio::test]
async fn test_quota_failure_runs_callbacks_in_order_then_fails() {
    let storage = MemoryCacheStorage::new(MemoryCacheConfig::new().with_quota(8)).unwrap();
    let (scope, network) = setup(storage);
    network.serve("/large.bin", Response::ok(vec![0_u8; 64]));

    let log = Arc::new(Mutex::new(Vec::new()));
    for label in ["evict-runtime", "evict-images"] {
        let log = Arc::clone(&log);
        scope.quota_callbacks().register(Arc::new(move || {
            let log = Arc::clone(&log);
            async move { log.lock().push(label) }.boxed()
        }));
    }

    let strategy = put_strategy(&scope);
    let request = get("/large.bin");
    let event = fetch_event(&request);
    let err = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap_err();
    event.settle().await.unwrap();

    assert_eq!(err, WorkerError::QuotaExceeded);
    assert_eq!(*log.lock(), vec!["evict-runtime", "evict-images"]);
}

#[tokio::test]
async fn test_callbacks_run_in_registration_order() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let log = Arc::new(Mutex::new(Vec::new()));
    let strategy = Scripted::new(&scope, |_, _| async { Ok(Response::ok("fine")) }.boxed());
    strategy.core().add_plugin(Recorder::new("a", &log));
    strategy.core().add_plugin(Recorder::new("b", &log));

    let request = get("/page");
    let event = fetch_event(&request);
    let handled = Arc::clone(&strategy).handle_all(HandlerOptions::new(request, Arc::clone(&event)));
    handled.response.await.unwrap();
    handled.done.await.unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "a:start",
            "b:start",
            "a:respond",
            "b:respond",
            "a:complete-ok",
            "b:complete-ok",
        ]
    );
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_plugins_are_snapshotted_per_request() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let log = Arc::new(Mutex::new(Vec::new()));
    let strategy = Scripted::new(&scope, |_, _| async { Ok(Response::ok("fine")) }.boxed());

    let request = get("/page");
    let event = fetch_event(&request);
    let handled = Arc::clone(&strategy).handle_all(HandlerOptions::new(request, Arc::clone(&event)));
    strategy.core().add_plugin(Recorder::new("late", &log));

    handled.response.await.unwrap();
    event.settle().await.unwrap();
    assert!(log.lock().is_empty());
}

struct Fallback;

#[async_trait]
impl HandlerDidError for Fallback {
    async fn handler_did_error(
        &self,
        params: HandlerDidErrorParams<'_>,
    ) -> WorkerResult<Option<Response>> {
        Ok(Some(Response::ok(format!("offline: {}", params.error.kind()))))
    }
}

impl StrategyPlugin for Fallback {
    fn as_handler_did_error(&self) -> Option<&dyn HandlerDidError> {
        Some(self)
    }
}

#[tokio::test]
async fn test_handler_did_error_supplies_substitute() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let strategy = Scripted::new(&scope, |request, handler| {
        async move { handler.fetch(request).await }.boxed()
    });

    let request = get("/unreachable");
    let event = fetch_event(&request);
    let err = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request.clone(), Arc::clone(&event)))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Network(_)));

    strategy.core().add_plugin(Arc::new(Fallback));
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    assert_eq!(response.body, "offline: network-error");
    event.settle().await.unwrap();
}

#[tokio::test]
async fn test_error_response_is_treated_as_failure() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let strategy = Scripted::new(&scope, |_, _| async { Ok(Response::error()) }.boxed());

    let request = get("/broken");
    let event = fetch_event(&request);
    let err = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "no-response");
    event.settle().await.unwrap();
}

#[tokio::test]
async fn test_fetch_and_cache_put_completes_with_done() {
    let (scope, network) = setup(MemoryCacheStorage::unlimited());
    network.serve("/app.js", Response::ok("app"));
    let strategy = Scripted::new(&scope, |request, handler| {
        async move { handler.fetch_and_cache_put(request).await }.boxed()
    });

    let request = get("/app.js");
    let event = fetch_event(&request);
    let handled = Arc::clone(&strategy).handle_all(HandlerOptions::new(request, Arc::clone(&event)));
    let response = handled.response.await.unwrap();
    assert_eq!(response.body, "app");

    handled.done.await.unwrap();
    assert_eq!(cached(&scope, "/app.js").await.unwrap().body, "app");
    event.settle().await.unwrap();
}

struct FailingUpdateObserver;

#[async_trait]
impl CacheDidUpdate for FailingUpdateObserver {
    async fn cache_did_update(&self, _: CacheDidUpdateParams<'_>) -> WorkerResult<()> {
        Err(WorkerError::Plugin("observer unavailable".to_string()))
    }
}

impl StrategyPlugin for FailingUpdateObserver {
    fn as_cache_did_update(&self) -> Option<&dyn CacheDidUpdate> {
        Some(self)
    }
}

#[tokio::test]
async fn test_extended_work_failure_only_fails_done() {
    let (scope, network) = setup(MemoryCacheStorage::unlimited());
    network.serve("/app.js", Response::ok("app"));
    let strategy = Scripted::new(&scope, |request, handler| {
        async move { handler.fetch_and_cache_put(request).await }.boxed()
    });
    let log = Arc::new(Mutex::new(Vec::new()));
    strategy.core().add_plugin(Arc::new(FailingUpdateObserver));
    strategy.core().add_plugin(Recorder::new("observer", &log));

    let request = get("/app.js");
    let event = fetch_event(&request);
    let handled = Arc::clone(&strategy).handle_all(HandlerOptions::new(request, Arc::clone(&event)));

    assert!(handled.response.await.is_ok());
    let err = handled.done.await.unwrap_err();
    assert_eq!(err, WorkerError::Plugin("observer unavailable".to_string()));
    assert!(log.lock().contains(&"observer:complete-error".to_string()));
    assert!(event.settle().await.is_err());
}

struct CountingKeys {
    calls: AtomicUsize,
}

#[async_trait]
impl CacheKeyWillBeUsed for CountingKeys {
    async fn cache_key_will_be_used(
        &self,
        params: CacheKeyWillBeUsedParams<'_>,
    ) -> WorkerResult<Request> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut url = params.request.url.clone();
        url.set_query(Some("v=1"));
        Ok(params.request.with_url(url))
    }
}

impl StrategyPlugin for CountingKeys {
    fn as_cache_key_will_be_used(&self) -> Option<&dyn CacheKeyWillBeUsed> {
        Some(self)
    }
}

#[tokio::test]
async fn test_cache_keys_are_memoized_per_mode() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let cache = scope.cache_storage().open("test-cache").await.unwrap();
    cache
        .put(&get("/data.json?v=1"), Response::ok("versioned"))
        .await
        .unwrap();

    let keys = Arc::new(CountingKeys {
        calls: AtomicUsize::new(0),
    });
    let strategy = Scripted::new(&scope, |request, handler| {
        async move {
            let first = handler.cache_match(&request).await?;
            let second = handler.cache_match(&request).await?;
            assert_eq!(first, second);
            first.ok_or_else(|| WorkerError::NoResponse(request.url.to_string()))
        }
        .boxed()
    });
    strategy.core().add_plugin(Arc::clone(&keys) as Arc<dyn StrategyPlugin>);

    let request = get("/data.json");
    let event = fetch_event(&request);
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();

    assert_eq!(response.body, "versioned");
    assert_eq!(keys.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_navigation_uses_preload_response() {
    let (scope, network) = setup(MemoryCacheStorage::unlimited());
    let strategy = Scripted::new(&scope, |request, handler| {
        async move { handler.fetch(request).await }.boxed()
    });

    let request = Request::navigate(Url::parse(&format!("{ORIGIN}/dashboard")).unwrap());
    let event = Arc::new(ExtendableEvent::fetch_with(FetchEventData {
        request: request.clone(),
        client_id: None,
        preload_response: Some(Response::ok("preloaded")),
    }));
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();

    assert_eq!(response.body, "preloaded");
    assert!(network.requests.lock().is_empty());
}

struct RequestRewriter {
    fail: bool,
    failures: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl RequestWillFetch for RequestRewriter {
    async fn request_will_fetch(&self, params: RequestWillFetchParams<'_>) -> WorkerResult<Request> {
        if self.fail {
            return Err(WorkerError::Plugin("rewrite refused".to_string()));
        }
        let mut url = params.request.url.clone();
        url.set_path("/rewritten");
        Ok(params.request.with_url(url))
    }
}

#[async_trait]
impl FetchDidFail for RequestRewriter {
    async fn fetch_did_fail(&self, params: FetchDidFailParams<'_>) -> WorkerResult<()> {
        self.failures.lock().push((
            params.original_request.url.path().to_string(),
            params.request.url.path().to_string(),
        ));
        Ok(())
    }
}

impl StrategyPlugin for RequestRewriter {
    fn as_request_will_fetch(&self) -> Option<&dyn RequestWillFetch> {
        Some(self)
    }

    fn as_fetch_did_fail(&self) -> Option<&dyn FetchDidFail> {
        Some(self)
    }
}

#[tokio::test]
async fn test_fetch_did_fail_sees_original_and_rewritten_requests() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let rewriter = Arc::new(RequestRewriter {
        fail: false,
        failures: Mutex::new(Vec::new()),
    });
    let strategy = Scripted::new(&scope, |request, handler| {
        async move { handler.fetch(request).await }.boxed()
    });
    strategy
        .core()
        .add_plugin(Arc::clone(&rewriter) as Arc<dyn StrategyPlugin>);

    let request = get("/original");
    let event = fetch_event(&request);
    let err = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap_err();
    event.settle().await.unwrap();

    assert!(matches!(err, WorkerError::Network(_)));
    assert_eq!(
        *rewriter.failures.lock(),
        vec![("/original".to_string(), "/rewritten".to_string())]
    );
}

#[tokio::test]
async fn test_request_will_fetch_error_is_wrapped() {
    let (scope, network) = setup(MemoryCacheStorage::unlimited());
    let strategy = Scripted::new(&scope, |request, handler| {
        async move { handler.fetch(request).await }.boxed()
    });
    strategy.core().add_plugin(Arc::new(RequestRewriter {
        fail: true,
        failures: Mutex::new(Vec::new()),
    }));

    let request = get("/any");
    let event = fetch_event(&request);
    let err = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap_err();
    event.settle().await.unwrap();

    assert_eq!(err.kind(), "plugin-error-request-will-fetch");
    assert!(network.requests.lock().is_empty());
}

#[tokio::test]
async fn test_cache_put_rejects_misuse() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let strategy = Scripted::new(&scope, |request, handler| {
        async move {
            let post = request.clone().with_method(Method::POST);
            let err = handler
                .cache_put(post, Some(Response::ok("x")))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "attempt-to-cache-non-get-request");

            // A fresh URL, since cache keys are memoized per URL and mode
            let other = request.with_url(Url::parse(&format!("{ORIGIN}/other")).unwrap());
            let err = handler.cache_put(other, None).await.unwrap_err();
            assert_eq!(err.kind(), "cache-put-with-no-response");
            Ok(Response::ok("checked"))
        }
        .boxed()
    });

    let request = get("/form");
    let event = fetch_event(&request);
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();
    assert_eq!(response.body, "checked");
}

#[tokio::test]
async fn test_cache_key_memo_ignores_method() {
    let (scope, _network) = setup(MemoryCacheStorage::unlimited());
    let strategy = Scripted::new(&scope, |request, handler| {
        async move {
            let post = request.clone().with_method(Method::POST);
            let first = handler.get_cache_key(&post, CacheKeyMode::Write).await?;
            assert_eq!(first.method, Method::POST);

            // Same URL and mode: the memoized POST key comes back
            let second = handler.get_cache_key(&request, CacheKeyMode::Write).await?;
            assert_eq!(second.method, Method::POST);
            let err = handler
                .cache_put(request.clone(), Some(Response::ok("x")))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "attempt-to-cache-non-get-request");

            // Another mode is memoized separately
            let read = handler.get_cache_key(&request, CacheKeyMode::Read).await?;
            assert_eq!(read.method, Method::GET);
            Ok(Response::ok("checked"))
        }
        .boxed()
    });

    let request = get("/form");
    let event = fetch_event(&request);
    let response = Arc::clone(&strategy)
        .handle(HandlerOptions::new(request, Arc::clone(&event)))
        .await
        .unwrap();
    event.settle().await.unwrap();
    assert_eq!(response.body, "checked");
}
