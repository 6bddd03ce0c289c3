//! Per-request strategy execution context
//!
//! A [`StrategyHandler`] is created for every request a strategy handles. It
//! snapshots the strategy's plugins, so plugins added or removed later do not
//! affect requests already in flight, and it offers the fetch and cache
//! primitives a strategy's decision logic is written against. Every primitive
//! routes through the plugin callbacks of its slot.

use crate::plugin::{
    CacheDidUpdateParams, CacheKeyMode, CacheKeyWillBeUsedParams, CachedResponseWillBeUsedParams,
    CacheWillUpdateParams, CallbackSlot, FetchDidFailParams, FetchDidSucceedParams,
    HandlerDidCompleteParams, HandlerDidRespondParams, HandlerWillStartParams, PluginState,
    RequestWillFetchParams, StrategyPlugin,
};
use futures::future::FutureExt;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use swcache_core::{
    CacheQueryOptions, ExtendableEvent, FetchOptions, LifetimeFuture, REVISION_SEARCH_PARAM,
    Request, Response, WorkerError, WorkerResult, WorkerScope, cache_match_ignore_params,
};
use tokio::sync::oneshot;
use url::Url;

/// Everything a handler needs from its strategy, captured at creation
#[derive(Clone)]
pub(crate) struct HandlerConfig {
    pub scope: Arc<WorkerScope>,
    pub cache_name: String,
    pub plugins: Vec<Arc<dyn StrategyPlugin>>,
    pub fetch_options: Option<FetchOptions>,
    pub match_options: CacheQueryOptions,
}

struct PluginEntry {
    plugin: Arc<dyn StrategyPlugin>,
    state: PluginState,
}

/// A plugin callback paired with its plugin's request-scoped state
pub struct StatefulCallback<'a, C: ?Sized> {
    pub callback: &'a C,
    pub state: &'a PluginState,
}

/// Arguments of the callback slots that only observe
pub enum Notification<'a> {
    FetchDidFail {
        original_request: &'a Request,
        request: &'a Request,
        error: &'a WorkerError,
    },
    CacheDidUpdate {
        cache_name: &'a str,
        request: &'a Request,
        old_response: Option<&'a Response>,
        new_response: &'a Response,
    },
    HandlerWillStart {
        request: &'a Request,
    },
    HandlerDidRespond {
        request: &'a Request,
        response: Option<&'a Response>,
    },
    HandlerDidComplete {
        request: &'a Request,
        response: Option<&'a Response>,
        error: Option<&'a WorkerError>,
    },
}

struct HandlerInner {
    request: Request,
    url: Option<Url>,
    params: Option<Value>,
    event: Arc<ExtendableEvent>,
    config: HandlerConfig,
    plugins: Vec<PluginEntry>,
    cache_keys: Mutex<HashMap<String, Request>>,
    extend_lifetime: Mutex<VecDeque<LifetimeFuture>>,
    completion: Mutex<Option<oneshot::Sender<()>>>,
}

/// Execution context of one handled request
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct StrategyHandler {
    inner: Arc<HandlerInner>,
}

impl std::fmt::Debug for StrategyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyHandler")
            .field("request", &self.inner.request.url.as_str())
            .field("cache_name", &self.inner.config.cache_name)
            .field("plugins", &self.inner.plugins.len())
            .finish_non_exhaustive()
    }
}

impl StrategyHandler {
    pub(crate) fn new(
        config: HandlerConfig,
        request: Request,
        event: Arc<ExtendableEvent>,
        url: Option<Url>,
        params: Option<Value>,
    ) -> Self {
        let plugins = config
            .plugins
            .iter()
            .map(|plugin| PluginEntry {
                plugin: Arc::clone(plugin),
                state: PluginState::new(),
            })
            .collect();

        // Keep the event alive until the handler is destroyed
        let (completion, released) = oneshot::channel::<()>();
        event.wait_until(async move {
            let _ = released.await;
            Ok(())
        });

        Self {
            inner: Arc::new(HandlerInner {
                request,
                url,
                params,
                event,
                config,
                plugins,
                cache_keys: Mutex::new(HashMap::new()),
                extend_lifetime: Mutex::new(VecDeque::new()),
                completion: Mutex::new(Some(completion)),
            }),
        }
    }

    /// The request being handled
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Params produced by the route that matched the request
    pub fn params(&self) -> Option<&Value> {
        self.inner.params.as_ref()
    }

    pub fn event(&self) -> &Arc<ExtendableEvent> {
        &self.inner.event
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.inner.config.scope
    }

    pub fn cache_name(&self) -> &str {
        &self.inner.config.cache_name
    }

    /// Fetch a request from the network, running the fetch callbacks
    ///
    /// Navigations are answered with the event's preload response when the
    /// host supplied one.
    pub async fn fetch(&self, request: Request) -> WorkerResult<Response> {
        let event: &ExtendableEvent = self.event();
        let scope = self.scope();

        if request.is_navigation()
            && let Some(preload) = event.preload_response()
        {
            tracing::info!(
                url = %scope.get_friendly_url(&request.url),
                "using a preloaded navigation response"
            );
            return Ok(preload.clone());
        }

        let original_request = self
            .has_callback(CallbackSlot::FetchDidFail)
            .then(|| request.clone());

        let mut request = request;
        for cb in self.iterate_callbacks(|p| p.as_request_will_fetch()) {
            request = cb
                .callback
                .request_will_fetch(RequestWillFetchParams {
                    request: request.clone(),
                    event,
                    state: cb.state,
                })
                .await
                .map_err(|e| WorkerError::PluginRequestWillFetch(e.to_string()))?;
        }

        let plugin_filtered_request = request.clone();
        let fetch_options = if request.is_navigation() {
            None
        } else {
            self.inner.config.fetch_options.as_ref()
        };

        let result = async {
            let mut response = scope.fetcher().fetch(&request, fetch_options).await?;
            tracing::debug!(
                url = %scope.get_friendly_url(&request.url),
                status = response.status,
                "network request returned"
            );
            for cb in self.iterate_callbacks(|p| p.as_fetch_did_succeed()) {
                response = cb
                    .callback
                    .fetch_did_succeed(FetchDidSucceedParams {
                        request: &plugin_filtered_request,
                        response,
                        event,
                        state: cb.state,
                    })
                    .await?;
            }
            Ok::<_, WorkerError>(response)
        }
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                tracing::debug!(
                    url = %scope.get_friendly_url(&request.url),
                    error = %error,
                    "network request failed"
                );
                if let Some(original_request) = &original_request {
                    self.run_callbacks(Notification::FetchDidFail {
                        original_request,
                        request: &plugin_filtered_request,
                        error: &error,
                    })
                    .await?;
                }
                Err(error)
            }
        }
    }

    /// Fetch a request and store a copy of the response in the cache
    ///
    /// The cache write is registered as extended work, so the response is
    /// returned before the write necessarily completes.
    pub async fn fetch_and_cache_put(&self, request: Request) -> WorkerResult<Response> {
        let response = self.fetch(request.clone()).await?;
        let handler = self.clone();
        let copy = response.clone();
        self.wait_until(async move { handler.cache_put(request, Some(copy)).await.map(|_| ()) });
        Ok(response)
    }

    /// Look up a request in the strategy's cache
    pub async fn cache_match(&self, key: &Request) -> WorkerResult<Option<Response>> {
        let scope = self.scope();
        let cache_name = self.cache_name();
        let match_options = self.inner.config.match_options;
        let effective_request = self.get_cache_key(key, CacheKeyMode::Read).await?;

        let mut cached_response = scope
            .cache_storage()
            .match_request(&effective_request, Some(cache_name), match_options)
            .await?;

        if cached_response.is_some() {
            tracing::debug!(cache_name, "found a cached response");
        } else {
            tracing::debug!(cache_name, "no cached response found");
        }

        for cb in self.iterate_callbacks(|p| p.as_cached_response_will_be_used()) {
            cached_response = cb
                .callback
                .cached_response_will_be_used(CachedResponseWillBeUsedParams {
                    cache_name,
                    request: &effective_request,
                    cached_response,
                    match_options,
                    event: self.event(),
                    state: cb.state,
                })
                .await?;
        }

        Ok(cached_response)
    }

    /// Store a response in the strategy's cache
    ///
    /// Returns `false` without writing when the response is not cacheable.
    pub async fn cache_put(&self, key: Request, response: Option<Response>) -> WorkerResult<bool> {
        // Let pending cache reads run first
        tokio::task::yield_now().await;

        let scope = self.scope();
        let cache_name = self.cache_name();
        let effective_request = self.get_cache_key(&key, CacheKeyMode::Write).await?;
        let friendly_url = scope.get_friendly_url(&effective_request.url);

        if effective_request.method != Method::GET {
            return Err(WorkerError::NonGetCacheAttempt {
                url: friendly_url,
                method: effective_request.method.to_string(),
            });
        }

        let Some(response) = response else {
            tracing::error!(url = %friendly_url, "cannot cache a missing response");
            return Err(WorkerError::MissingResponse(friendly_url));
        };

        let Some(response_to_cache) = self.ensure_response_safe_to_cache(response).await? else {
            tracing::debug!(url = %friendly_url, "response will not be cached");
            return Ok(false);
        };

        let has_cache_update_callback = self.has_callback(CallbackSlot::CacheDidUpdate);
        let cache = scope.cache_storage().open(cache_name).await?;

        let old_response = if has_cache_update_callback {
            cache_match_ignore_params(
                cache.as_ref(),
                &effective_request,
                &[REVISION_SEARCH_PARAM],
                self.inner.config.match_options,
            )
            .await?
        } else {
            None
        };

        tracing::debug!(cache_name, url = %friendly_url, "updating cache");

        if let Err(error) = cache.put(&effective_request, response_to_cache.clone()).await {
            if error == WorkerError::QuotaExceeded {
                scope.quota_callbacks().execute().await;
            }
            return Err(error);
        }

        self.run_callbacks(Notification::CacheDidUpdate {
            cache_name,
            request: &effective_request,
            old_response: old_response.as_ref(),
            new_response: &response_to_cache,
        })
        .await?;

        Ok(true)
    }

    /// The request to use as a cache key, after cache-key callbacks
    ///
    /// Results are memoized per URL and mode for the life of the handler.
    pub async fn get_cache_key(&self, request: &Request, mode: CacheKeyMode) -> WorkerResult<Request> {
        let key = format!("{} | {mode}", request.url);
        if let Some(cached) = self.inner.cache_keys.lock().get(&key) {
            return Ok(cached.clone());
        }

        let mut effective_request = request.clone();
        for cb in self.iterate_callbacks(|p| p.as_cache_key_will_be_used()) {
            effective_request = cb
                .callback
                .cache_key_will_be_used(CacheKeyWillBeUsedParams {
                    request: effective_request,
                    mode,
                    params: self.params(),
                    event: self.event(),
                    state: cb.state,
                })
                .await?;
        }

        self.inner
            .cache_keys
            .lock()
            .insert(key, effective_request.clone());
        Ok(effective_request)
    }

    /// Whether any snapshotted plugin implements the slot
    pub fn has_callback(&self, slot: CallbackSlot) -> bool {
        self.inner
            .plugins
            .iter()
            .any(|entry| slot.implemented_by(entry.plugin.as_ref()))
    }

    /// Callbacks of one slot in plugin registration order, each paired with
    /// its plugin's state
    pub fn iterate_callbacks<'a, C, F>(
        &'a self,
        pick: F,
    ) -> impl Iterator<Item = StatefulCallback<'a, C>> + 'a
    where
        C: ?Sized + 'a,
        F: Fn(&'a dyn StrategyPlugin) -> Option<&'a C> + 'a,
    {
        self.inner.plugins.iter().filter_map(move |entry| {
            pick(entry.plugin.as_ref()).map(|callback| StatefulCallback {
                callback,
                state: &entry.state,
            })
        })
    }

    /// Run every callback of an observing slot, one after another
    pub async fn run_callbacks(&self, notification: Notification<'_>) -> WorkerResult<()> {
        let event = self.event().as_ref();
        match notification {
            Notification::FetchDidFail {
                original_request,
                request,
                error,
            } => {
                for cb in self.iterate_callbacks(|p| p.as_fetch_did_fail()) {
                    cb.callback
                        .fetch_did_fail(FetchDidFailParams {
                            original_request,
                            request,
                            error,
                            event,
                            state: cb.state,
                        })
                        .await?;
                }
            }
            Notification::CacheDidUpdate {
                cache_name,
                request,
                old_response,
                new_response,
            } => {
                for cb in self.iterate_callbacks(|p| p.as_cache_did_update()) {
                    cb.callback
                        .cache_did_update(CacheDidUpdateParams {
                            cache_name,
                            request,
                            old_response,
                            new_response,
                            event,
                            state: cb.state,
                        })
                        .await?;
                }
            }
            Notification::HandlerWillStart { request } => {
                for cb in self.iterate_callbacks(|p| p.as_handler_will_start()) {
                    cb.callback
                        .handler_will_start(HandlerWillStartParams {
                            request,
                            event,
                            state: cb.state,
                        })
                        .await?;
                }
            }
            Notification::HandlerDidRespond { request, response } => {
                for cb in self.iterate_callbacks(|p| p.as_handler_did_respond()) {
                    cb.callback
                        .handler_did_respond(HandlerDidRespondParams {
                            request,
                            response,
                            event,
                            state: cb.state,
                        })
                        .await?;
                }
            }
            Notification::HandlerDidComplete {
                request,
                response,
                error,
            } => {
                for cb in self.iterate_callbacks(|p| p.as_handler_did_complete()) {
                    cb.callback
                        .handler_did_complete(HandlerDidCompleteParams {
                            request,
                            response,
                            error,
                            event,
                            state: cb.state,
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Register work with both the event and this handler
    ///
    /// The returned handle shares the work's single execution.
    pub fn wait_until<F>(&self, work: F) -> LifetimeFuture
    where
        F: Future<Output = WorkerResult<()>> + Send + 'static,
    {
        let shared = work.boxed().shared();
        self.inner.extend_lifetime.lock().push_back(shared.clone());
        self.inner.event.wait_until_shared(shared.clone());
        shared
    }

    /// Await all work registered through [`wait_until`](Self::wait_until),
    /// in registration order, including work added while waiting
    pub async fn done_waiting(&self) -> WorkerResult<()> {
        loop {
            let next = self.inner.extend_lifetime.lock().pop_front();
            match next {
                Some(work) => work.await?,
                None => return Ok(()),
            }
        }
    }

    /// Release the handler's hold on the event
    pub fn destroy(&self) {
        if let Some(completion) = self.inner.completion.lock().take() {
            let _ = completion.send(());
        }
    }

    async fn ensure_response_safe_to_cache(
        &self,
        response: Response,
    ) -> WorkerResult<Option<Response>> {
        let mut response_to_cache = response;
        let mut plugins_used = false;

        for cb in self.iterate_callbacks(|p| p.as_cache_will_update()) {
            plugins_used = true;
            let updated = cb
                .callback
                .cache_will_update(CacheWillUpdateParams {
                    request: self.request(),
                    response: response_to_cache,
                    event: self.event(),
                    state: cb.state,
                })
                .await?;
            match updated {
                Some(response) => response_to_cache = response,
                None => return Ok(None),
            }
        }

        if !plugins_used && response_to_cache.status != 200 {
            tracing::debug!(
                status = response_to_cache.status,
                "only responses with status 200 are cached by default"
            );
            return Ok(None);
        }

        Ok(Some(response_to_cache))
    }
}
