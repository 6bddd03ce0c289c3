//! Routes and matchers
//!
//! A [`Route`] pairs a [`RouteMatcher`] with a [`RouteHandler`] for one HTTP
//! method. Matchers are synchronous and report a [`MatchResult`]; data they
//! return becomes the handler's `params`.

use parking_lot::RwLock;
use regex::Regex;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use swcache_core::{ExtendableEvent, Request, RouteHandler};
use url::Url;

/// What a matcher sees of an intercepted request
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub url: &'a Url,
    /// Whether the URL shares the worker's origin
    pub same_origin: bool,
    pub request: &'a Request,
    pub event: &'a ExtendableEvent,
}

/// Outcome of matching a request against a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// Matched without producing params
    Matched,
    MatchedWithParams(Value),
}

impl MatchResult {
    /// Interpret loosely typed match data
    ///
    /// `null`, `false`, `0` and the empty string do not match. `true`, an
    /// empty array and an empty object match without params. Anything else
    /// matches and becomes the params.
    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null | Value::Bool(false)) => Self::NoMatch,
            Some(Value::String(s)) if s.is_empty() => Self::NoMatch,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Self::NoMatch,
            Some(Value::Bool(true)) => Self::Matched,
            Some(Value::Array(items)) if items.is_empty() => Self::Matched,
            Some(Value::Object(map)) if map.is_empty() => Self::Matched,
            Some(value) => Self::MatchedWithParams(value),
        }
    }

    pub fn is_match(&self) -> bool {
        !matches!(self, Self::NoMatch)
    }

    /// Params carried by the match, if any
    pub fn into_params(self) -> Option<Value> {
        match self {
            Self::MatchedWithParams(value) => Some(value),
            Self::NoMatch | Self::Matched => None,
        }
    }
}

impl From<bool> for MatchResult {
    fn from(matched: bool) -> Self {
        if matched { Self::Matched } else { Self::NoMatch }
    }
}

/// Decides whether a route applies to a request
pub trait RouteMatcher: Send + Sync + 'static {
    fn matches(&self, context: &MatchContext<'_>) -> MatchResult;
}

impl<F> RouteMatcher for F
where
    F: Fn(&MatchContext<'_>) -> MatchResult + Send + Sync + 'static,
{
    fn matches(&self, context: &MatchContext<'_>) -> MatchResult {
        self(context)
    }
}

/// A matcher, a handler and the HTTP method they apply to
pub struct Route {
    matcher: Box<dyn RouteMatcher>,
    handler: Arc<dyn RouteHandler>,
    method: Method,
    catch_handler: RwLock<Option<Arc<dyn RouteHandler>>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("has_catch_handler", &self.catch_handler.read().is_some())
            .finish_non_exhaustive()
    }
}

impl Route {
    /// A GET route
    pub fn new(matcher: impl RouteMatcher, handler: Arc<dyn RouteHandler>) -> Self {
        Self {
            matcher: Box::new(matcher),
            handler,
            method: Method::GET,
            catch_handler: RwLock::new(None),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_catch_handler(self, handler: Arc<dyn RouteHandler>) -> Self {
        self.set_catch_handler(handler);
        self
    }

    /// Handler invoked when this route's handler fails
    pub fn set_catch_handler(&self, handler: Arc<dyn RouteHandler>) {
        *self.catch_handler.write() = Some(handler);
    }

    pub fn matches(&self, context: &MatchContext<'_>) -> MatchResult {
        self.matcher.matches(context)
    }

    pub fn handler(&self) -> &Arc<dyn RouteHandler> {
        &self.handler
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn catch_handler(&self) -> Option<Arc<dyn RouteHandler>> {
        self.catch_handler.read().clone()
    }
}

/// Matches the full request URL against a regular expression
///
/// For cross-origin requests the match must start at the beginning of the
/// URL, so a pattern like `.+/api/` only applies to the worker's own origin.
/// Capture groups become the params, as an array of strings.
#[derive(Debug, Clone)]
pub struct RegexRoute {
    regex: Regex,
}

impl RegexRoute {
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }

    /// A GET route using this matcher
    pub fn into_route(self, handler: Arc<dyn RouteHandler>) -> Route {
        Route::new(self, handler)
    }
}

impl RouteMatcher for RegexRoute {
    fn matches(&self, context: &MatchContext<'_>) -> MatchResult {
        let Some(captures) = self.regex.captures(context.url.as_str()) else {
            return MatchResult::NoMatch;
        };

        let starts_at_beginning = captures.get(0).is_some_and(|m| m.start() == 0);
        if !context.same_origin && !starts_at_beginning {
            tracing::debug!(
                pattern = %self.regex,
                url = %context.url,
                "cross-origin URL only partially matched; the pattern must match from the start"
            );
            return MatchResult::NoMatch;
        }

        let groups: Vec<Value> = captures
            .iter()
            .skip(1)
            .map(|group| group.map_or(Value::Null, |m| Value::String(m.as_str().to_string())))
            .collect();
        MatchResult::from_value(Some(Value::Array(groups)))
    }
}

/// Matches navigation requests by path and query
///
/// A navigation matches when its path plus query passes at least one
/// allowlist pattern and no denylist pattern.
#[derive(Debug, Clone)]
pub struct NavigationRoute {
    allowlist: Vec<Regex>,
    denylist: Vec<Regex>,
}

impl Default for NavigationRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationRoute {
    /// Matches every navigation
    pub fn new() -> Self {
        Self {
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }

    pub fn with_allowlist(mut self, allowlist: Vec<Regex>) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_denylist(mut self, denylist: Vec<Regex>) -> Self {
        self.denylist = denylist;
        self
    }

    /// A GET route using this matcher
    pub fn into_route(self, handler: Arc<dyn RouteHandler>) -> Route {
        Route::new(self, handler)
    }
}

impl RouteMatcher for NavigationRoute {
    fn matches(&self, context: &MatchContext<'_>) -> MatchResult {
        if !context.request.is_navigation() {
            return MatchResult::NoMatch;
        }

        let path_and_query = match context.url.query() {
            Some(query) => format!("{}?{query}", context.url.path()),
            None => context.url.path().to_string(),
        };

        if let Some(denied) = self.denylist.iter().find(|re| re.is_match(&path_and_query)) {
            tracing::trace!(url = %path_and_query, pattern = %denied, "navigation denied");
            return MatchResult::NoMatch;
        }

        let allowed =
            self.allowlist.is_empty() || self.allowlist.iter().any(|re| re.is_match(&path_and_query));
        if !allowed {
            tracing::trace!(url = %path_and_query, "navigation not in the allowlist");
        }
        MatchResult::from(allowed)
    }
}
