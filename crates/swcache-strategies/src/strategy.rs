//! The strategy abstraction
//!
//! A strategy is configuration ([`StrategyCore`]) plus one decision hook,
//! [`Strategy::handle_request`], written against a [`StrategyHandler`]. The
//! provided [`Strategy::handle_all`] wraps the hook in the plugin lifecycle:
//!
//! 1. handler-will-start callbacks
//! 2. the decision hook, run exactly once
//! 3. handler-did-error callbacks when the hook fails, until one recovers
//! 4. handler-will-respond callbacks
//!
//! and, on a separate completion future, handler-did-respond, the handler's
//! extended work, then handler-did-complete.

use crate::handler::{HandlerConfig, Notification, StrategyHandler};
use crate::plugin::{HandlerDidErrorParams, HandlerWillRespondParams, StrategyPlugin};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use swcache_core::{
    CacheQueryOptions, ExtendableEvent, FetchOptions, LifetimeFuture, Request, Response,
    RouteHandlerOptions, WorkerError, WorkerResult, WorkerScope,
};
use url::Url;

/// The response side of [`Strategy::handle_all`]
pub type ResponseFuture = Shared<BoxFuture<'static, WorkerResult<Response>>>;

/// Configuration shared by every strategy
pub struct StrategyCore {
    scope: Arc<WorkerScope>,
    cache_name: String,
    plugins: RwLock<Vec<Arc<dyn StrategyPlugin>>>,
    fetch_options: Option<FetchOptions>,
    match_options: CacheQueryOptions,
}

impl std::fmt::Debug for StrategyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCore")
            .field("cache_name", &self.cache_name)
            .field("plugins", &self.plugins.read().len())
            .field("fetch_options", &self.fetch_options)
            .field("match_options", &self.match_options)
            .finish_non_exhaustive()
    }
}

impl StrategyCore {
    /// Configuration using the scope's default runtime cache
    pub fn new(scope: Arc<WorkerScope>) -> Self {
        let cache_name = scope.cache_names().runtime_name(None);
        Self {
            scope,
            cache_name,
            plugins: RwLock::new(Vec::new()),
            fetch_options: None,
            match_options: CacheQueryOptions::default(),
        }
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = cache_name.into();
        self
    }

    pub fn with_plugins(self, plugins: impl IntoIterator<Item = Arc<dyn StrategyPlugin>>) -> Self {
        self.plugins.write().extend(plugins);
        self
    }

    pub fn with_fetch_options(mut self, fetch_options: FetchOptions) -> Self {
        self.fetch_options = Some(fetch_options);
        self
    }

    pub fn with_match_options(mut self, match_options: CacheQueryOptions) -> Self {
        self.match_options = match_options;
        self
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.scope
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn fetch_options(&self) -> Option<&FetchOptions> {
        self.fetch_options.as_ref()
    }

    pub fn match_options(&self) -> CacheQueryOptions {
        self.match_options
    }

    /// Current plugins, in registration order
    pub fn plugins(&self) -> Vec<Arc<dyn StrategyPlugin>> {
        self.plugins.read().clone()
    }

    pub fn add_plugin(&self, plugin: Arc<dyn StrategyPlugin>) {
        self.plugins.write().push(plugin);
    }

    /// Remove a plugin by identity; returns true if it was registered
    pub fn remove_plugin(&self, plugin: &Arc<dyn StrategyPlugin>) -> bool {
        let mut plugins = self.plugins.write();
        let before = plugins.len();
        plugins.retain(|existing| !Arc::ptr_eq(existing, plugin));
        plugins.len() != before
    }

    /// Mutate the plugin list under a single lock
    pub fn update_plugins<R>(&self, update: impl FnOnce(&mut Vec<Arc<dyn StrategyPlugin>>) -> R) -> R {
        update(&mut self.plugins.write())
    }

    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            scope: Arc::clone(&self.scope),
            cache_name: self.cache_name.clone(),
            plugins: self.plugins(),
            fetch_options: self.fetch_options.clone(),
            match_options: self.match_options,
        }
    }
}

/// Input to [`Strategy::handle_all`]
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub request: Request,
    pub event: Arc<ExtendableEvent>,
    pub url: Option<Url>,
    pub params: Option<Value>,
}

impl HandlerOptions {
    pub fn new(request: Request, event: Arc<ExtendableEvent>) -> Self {
        Self {
            request,
            event,
            url: None,
            params: None,
        }
    }

    /// Handle the request carried by a fetch event
    pub fn from_fetch_event(event: Arc<ExtendableEvent>) -> WorkerResult<Self> {
        let request = event
            .request()
            .cloned()
            .ok_or_else(|| WorkerError::Message("the event carries no request".to_string()))?;
        Ok(Self::new(request, event))
    }

    pub fn with_params(mut self, params: Option<Value>) -> Self {
        self.params = params;
        self
    }
}

impl From<RouteHandlerOptions> for HandlerOptions {
    fn from(options: RouteHandlerOptions) -> Self {
        Self {
            request: options.request,
            event: options.event,
            url: Some(options.url),
            params: options.params,
        }
    }
}

/// The two outcomes of [`Strategy::handle_all`]
///
/// `response` resolves with the strategy's response. `done` resolves once
/// every piece of extended work of the request has finished, and fails with
/// the first failure of that work only. `done` is also registered with the
/// event, so settling the event drives it.
pub struct HandleAll {
    pub response: ResponseFuture,
    pub done: LifetimeFuture,
}

/// A policy for answering requests
#[async_trait]
pub trait Strategy: Send + Sync + 'static {
    fn core(&self) -> &StrategyCore;

    /// Called before each request snapshots the plugin list
    fn prepare(&self) {}

    /// Decide how to answer the request
    async fn handle_request(&self, request: Request, handler: &StrategyHandler)
    -> WorkerResult<Response>;

    /// Handle a request and track its extended work
    fn handle_all(self: Arc<Self>, options: HandlerOptions) -> HandleAll
    where
        Self: Sized,
    {
        self.prepare();

        let HandlerOptions {
            request,
            event,
            url,
            params,
        } = options;
        let handler = StrategyHandler::new(
            self.core().handler_config(),
            request.clone(),
            Arc::clone(&event),
            url,
            params,
        );

        let response_handler = handler.clone();
        let response_request = request.clone();
        let response = async move {
            get_response(&*self, &response_handler, response_request).await
        }
        .boxed()
        .shared();

        let pending_response = response.clone();
        let done = async move { await_complete(pending_response, &handler, &request).await }
            .boxed()
            .shared();

        event.wait_until_shared(done.clone());
        HandleAll { response, done }
    }

    /// Handle a request, returning only the response
    fn handle(self: Arc<Self>, options: HandlerOptions) -> ResponseFuture
    where
        Self: Sized,
    {
        self.handle_all(options).response
    }
}

async fn get_response<S: Strategy + ?Sized>(
    strategy: &S,
    handler: &StrategyHandler,
    request: Request,
) -> WorkerResult<Response> {
    handler
        .run_callbacks(Notification::HandlerWillStart { request: &request })
        .await?;

    let outcome = match strategy.handle_request(request.clone(), handler).await {
        Ok(response) if response.is_error() => Err(WorkerError::NoResponse(request.url.to_string())),
        other => other,
    };

    let mut response = match outcome {
        Ok(response) => response,
        Err(error) => {
            let mut recovered = None;
            for cb in handler.iterate_callbacks(|p| p.as_handler_did_error()) {
                recovered = cb
                    .callback
                    .handler_did_error(HandlerDidErrorParams {
                        request: &request,
                        error: &error,
                        event: handler.event(),
                        state: cb.state,
                    })
                    .await?;
                if recovered.is_some() {
                    break;
                }
            }

            match recovered {
                Some(response) => {
                    tracing::debug!(
                        url = %handler.scope().get_friendly_url(&request.url),
                        error = %error,
                        "strategy failed; a plugin supplied a substitute response"
                    );
                    response
                }
                None => return Err(error),
            }
        }
    };

    for cb in handler.iterate_callbacks(|p| p.as_handler_will_respond()) {
        response = cb
            .callback
            .handler_will_respond(HandlerWillRespondParams {
                request: &request,
                response,
                event: handler.event(),
                state: cb.state,
            })
            .await?;
    }

    Ok(response)
}

async fn await_complete(
    response: ResponseFuture,
    handler: &StrategyHandler,
    request: &Request,
) -> WorkerResult<()> {
    let response = response.await.ok();

    let waited = async {
        handler
            .run_callbacks(Notification::HandlerDidRespond {
                request,
                response: response.as_ref(),
            })
            .await?;
        handler.done_waiting().await
    }
    .await;
    let error = waited.err();

    let completed = handler
        .run_callbacks(Notification::HandlerDidComplete {
            request,
            response: response.as_ref(),
            error: error.as_ref(),
        })
        .await;

    handler.destroy();
    completed?;

    error.map_or(Ok(()), Err)
}
