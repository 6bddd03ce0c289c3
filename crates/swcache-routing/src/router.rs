//! Request router
//!
//! Routes are kept per HTTP method in registration order; the first route
//! whose matcher accepts a request handles it. Requests no route accepts go
//! to the default handler for their method, if any. Failures are offered to
//! the matched route's catch handler, then to the router's global one.

use crate::route::{MatchContext, MatchResult, RegexRoute, Route, RouteMatcher};
use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::RwLock;
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use swcache_core::{
    ExtendableEvent, Request, RequestInit, Response, RouteHandler, RouteHandlerOptions,
    WorkerError, WorkerResult, WorkerScope,
};
use url::Url;

/// Message type asking the worker to cache a list of URLs
pub const CACHE_URLS_MESSAGE_TYPE: &str = "CACHE_URLS";

/// A matched route and the params its matcher produced
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: Option<Value>,
}

/// What [`Router::register_capture`] turns into a route
pub enum RouteCapture {
    /// An exact URL, resolved against the worker location
    Url(String),
    Regex(Regex),
    Matcher(Box<dyn RouteMatcher>),
}

impl From<&str> for RouteCapture {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for RouteCapture {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Regex> for RouteCapture {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlToCache {
    Url(String),
    WithInit(String, RequestInit),
    Bare((String,)),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheUrlsPayload {
    urls_to_cache: Vec<UrlToCache>,
}

#[derive(Debug, Deserialize)]
struct CacheUrlsMessage {
    #[serde(rename = "type")]
    kind: String,
    payload: Option<CacheUrlsPayload>,
}

/// Dispatches intercepted requests to routes
pub struct Router {
    scope: Arc<WorkerScope>,
    routes: RwLock<HashMap<Method, Vec<Arc<Route>>>>,
    default_handlers: RwLock<HashMap<Method, Arc<dyn RouteHandler>>>,
    catch_handler: RwLock<Option<Arc<dyn RouteHandler>>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: HashMap<String, usize> = self
            .routes
            .read()
            .iter()
            .map(|(method, routes)| (method.to_string(), routes.len()))
            .collect();
        f.debug_struct("Router")
            .field("routes", &routes)
            .field("default_handlers", &self.default_handlers.read().len())
            .field("has_catch_handler", &self.catch_handler.read().is_some())
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(scope: Arc<WorkerScope>) -> Self {
        Self {
            scope,
            routes: RwLock::new(HashMap::new()),
            default_handlers: RwLock::new(HashMap::new()),
            catch_handler: RwLock::new(None),
        }
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.scope
    }

    /// Routes registered for the method, in match priority order
    pub fn routes(&self, method: &Method) -> Vec<Arc<Route>> {
        self.routes.read().get(method).cloned().unwrap_or_default()
    }

    /// Append a route after every route already registered for its method
    pub fn register_route(&self, route: Arc<Route>) {
        self.routes
            .write()
            .entry(route.method().clone())
            .or_default()
            .push(route);
    }

    /// Build a route from a URL, a regex or a matcher and register it
    pub fn register_capture(
        &self,
        capture: impl Into<RouteCapture>,
        handler: Arc<dyn RouteHandler>,
        method: Method,
    ) -> WorkerResult<Arc<Route>> {
        let route = match capture.into() {
            RouteCapture::Url(url) => {
                let capture_url = self.scope.resolve_url(&url)?;
                Route::new(
                    move |context: &MatchContext<'_>| MatchResult::from(*context.url == capture_url),
                    handler,
                )
            }
            RouteCapture::Regex(regex) => RegexRoute::new(regex).into_route(handler),
            RouteCapture::Matcher(matcher) => Route::new(
                move |context: &MatchContext<'_>| matcher.matches(context),
                handler,
            ),
        };
        let route = Arc::new(route.with_method(method));
        self.register_route(Arc::clone(&route));
        Ok(route)
    }

    /// Remove a previously registered route instance
    pub fn unregister_route(&self, route: &Arc<Route>) -> WorkerResult<()> {
        let mut routes = self.routes.write();
        let Some(method_routes) = routes.get_mut(route.method()) else {
            return Err(WorkerError::RouteMethodNotRegistered(
                route.method().to_string(),
            ));
        };

        let Some(index) = method_routes
            .iter()
            .position(|existing| Arc::ptr_eq(existing, route))
        else {
            return Err(WorkerError::RouteNotRegistered);
        };

        method_routes.remove(index);
        Ok(())
    }

    /// Handler for requests of `method` that no route matches
    pub fn set_default_handler(&self, handler: Arc<dyn RouteHandler>, method: Method) {
        self.default_handlers.write().insert(method, handler);
    }

    /// Handler for failures no route-level catch handler recovered from
    pub fn set_catch_handler(&self, handler: Arc<dyn RouteHandler>) {
        *self.catch_handler.write() = Some(handler);
    }

    /// First route of the request's method that accepts it
    pub fn find_matching_route(&self, context: &MatchContext<'_>) -> Option<RouteMatch> {
        let routes = self.routes(&context.request.method);
        routes.into_iter().find_map(|route| {
            let result = route.matches(context);
            result.is_match().then(|| RouteMatch {
                route,
                params: result.into_params(),
            })
        })
    }

    /// Route a request
    ///
    /// Returns `None` when nothing handles the request, leaving it to the
    /// network. The returned future owns everything it needs.
    pub fn handle_request(
        &self,
        request: Request,
        event: Arc<ExtendableEvent>,
    ) -> Option<BoxFuture<'static, WorkerResult<Response>>> {
        let url = request.url.clone();
        if !url.scheme().starts_with("http") {
            tracing::debug!(url = %url, "only http(s) requests are routed");
            return None;
        }

        let friendly_url = self.scope.get_friendly_url(&url);
        let same_origin = self.scope.is_same_origin(&url);
        let matched = self.find_matching_route(&MatchContext {
            url: &url,
            same_origin,
            request: &request,
            event: &event,
        });

        let (route, params) = match matched {
            Some(RouteMatch { route, params }) => (Some(route), params),
            None => (None, None),
        };

        let handler = match &route {
            Some(route) => {
                tracing::debug!(url = %friendly_url, params = ?params, "found a route to handle the request");
                Arc::clone(route.handler())
            }
            None => {
                let default = self.default_handlers.read().get(&request.method).cloned();
                match default {
                    Some(handler) => {
                        tracing::debug!(url = %friendly_url, "no route matched; using the default handler");
                        handler
                    }
                    None => {
                        tracing::debug!(url = %friendly_url, "no route found");
                        return None;
                    }
                }
            }
        };

        let route_catch_handler = route.as_ref().and_then(|route| route.catch_handler());
        let global_catch_handler = self.catch_handler.read().clone();
        let options = RouteHandlerOptions {
            url,
            request,
            event,
            params,
            error: None,
        };

        Some(
            async move {
                let mut error = match Arc::clone(&handler).handle(options.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                };

                if let Some(catch_handler) = route_catch_handler {
                    tracing::debug!(url = %friendly_url, error = %error, "using the route's catch handler");
                    match catch_handler
                        .handle(options.clone().with_error(error.clone()))
                        .await
                    {
                        Ok(response) => return Ok(response),
                        Err(catch_error) => error = catch_error,
                    }
                }

                if let Some(catch_handler) = global_catch_handler {
                    tracing::debug!(url = %friendly_url, error = %error, "using the global catch handler");
                    let options = RouteHandlerOptions {
                        params: None,
                        ..options
                    };
                    return catch_handler.handle(options.with_error(error)).await;
                }

                Err(error)
            }
            .boxed(),
        )
    }

    /// Route the request carried by a fetch event
    pub fn handle_fetch_event(
        &self,
        event: &Arc<ExtendableEvent>,
    ) -> Option<BoxFuture<'static, WorkerResult<Response>>> {
        let request = event.request()?.clone();
        self.handle_request(request, Arc::clone(event))
    }

    /// Handle a `CACHE_URLS` message
    ///
    /// Every listed URL is routed as if it had been fetched, so the matching
    /// strategies populate their caches. The work is registered with the
    /// event, and `true` is posted on the first reply port once all of it
    /// succeeded. Returns false for any other message.
    pub fn handle_cache_urls_message(&self, event: &Arc<ExtendableEvent>) -> WorkerResult<bool> {
        let Some(data) = event.message_data() else {
            return Ok(false);
        };
        let Ok(message) = serde_json::from_value::<CacheUrlsMessage>(data.clone()) else {
            return Ok(false);
        };
        if message.kind != CACHE_URLS_MESSAGE_TYPE {
            return Ok(false);
        }
        let payload = message
            .payload
            .ok_or_else(|| WorkerError::Message("CACHE_URLS message without a payload".to_string()))?;

        tracing::debug!(count = payload.urls_to_cache.len(), "caching URLs from the window");

        let mut pending = Vec::with_capacity(payload.urls_to_cache.len());
        for entry in payload.urls_to_cache {
            let (url, init) = match entry {
                UrlToCache::Url(url) | UrlToCache::Bare((url,)) => (url, RequestInit::default()),
                UrlToCache::WithInit(url, init) => (url, init),
            };
            let request = init.into_request(self.resolve(&url)?)?;
            if let Some(response) = self.handle_request(request, Arc::clone(event)) {
                pending.push(response);
            }
        }

        let reply_port = event.ports().first().cloned();
        event.wait_until(async move {
            for result in join_all(pending).await {
                result?;
            }
            if let Some(port) = reply_port {
                port.post_message(Value::Bool(true));
            }
            Ok(())
        });
        Ok(true)
    }

    fn resolve(&self, url: &str) -> WorkerResult<Url> {
        self.scope.resolve_url(url)
    }
}
