//! Strategy plugins
//!
//! A plugin observes or alters the fetch and cache pipeline of a strategy by
//! implementing any subset of twelve callback slots. Each slot is its own
//! trait; [`StrategyPlugin`] exposes which slots a plugin implements through
//! `as_*` accessors that default to `None`.
//!
//! Callbacks run strictly in plugin registration order. Every plugin gets a
//! private [`PluginState`] per handled request, passed to each of its
//! callbacks.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use swcache_core::{
    CacheQueryOptions, ExtendableEvent, Request, Response, WorkerError, WorkerResult,
};

/// Scratch state private to one plugin for one handled request
#[derive(Debug, Default)]
pub struct PluginState {
    values: Mutex<Map<String, Value>>,
}

impl PluginState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.lock().remove(key)
    }
}

/// The fixed set of plugin callback slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackSlot {
    RequestWillFetch,
    FetchDidSucceed,
    FetchDidFail,
    CacheKeyWillBeUsed,
    CachedResponseWillBeUsed,
    CacheWillUpdate,
    CacheDidUpdate,
    HandlerWillStart,
    HandlerWillRespond,
    HandlerDidRespond,
    HandlerDidComplete,
    HandlerDidError,
}

impl CallbackSlot {
    /// Whether the plugin implements this slot
    pub fn implemented_by(self, plugin: &dyn StrategyPlugin) -> bool {
        match self {
            Self::RequestWillFetch => plugin.as_request_will_fetch().is_some(),
            Self::FetchDidSucceed => plugin.as_fetch_did_succeed().is_some(),
            Self::FetchDidFail => plugin.as_fetch_did_fail().is_some(),
            Self::CacheKeyWillBeUsed => plugin.as_cache_key_will_be_used().is_some(),
            Self::CachedResponseWillBeUsed => plugin.as_cached_response_will_be_used().is_some(),
            Self::CacheWillUpdate => plugin.as_cache_will_update().is_some(),
            Self::CacheDidUpdate => plugin.as_cache_did_update().is_some(),
            Self::HandlerWillStart => plugin.as_handler_will_start().is_some(),
            Self::HandlerWillRespond => plugin.as_handler_will_respond().is_some(),
            Self::HandlerDidRespond => plugin.as_handler_did_respond().is_some(),
            Self::HandlerDidComplete => plugin.as_handler_did_complete().is_some(),
            Self::HandlerDidError => plugin.as_handler_did_error().is_some(),
        }
    }
}

/// Whether a cache key is computed for a read or a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKeyMode {
    Read,
    Write,
}

impl fmt::Display for CacheKeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

pub struct RequestWillFetchParams<'a> {
    pub request: Request,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct FetchDidSucceedParams<'a> {
    pub request: &'a Request,
    pub response: Response,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct FetchDidFailParams<'a> {
    /// The request before any request-will-fetch callback ran
    pub original_request: &'a Request,
    /// The request actually sent
    pub request: &'a Request,
    pub error: &'a WorkerError,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct CacheKeyWillBeUsedParams<'a> {
    pub request: Request,
    pub mode: CacheKeyMode,
    /// Params of the handled request, as produced by its route
    pub params: Option<&'a Value>,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct CachedResponseWillBeUsedParams<'a> {
    pub cache_name: &'a str,
    pub request: &'a Request,
    pub cached_response: Option<Response>,
    pub match_options: CacheQueryOptions,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct CacheWillUpdateParams<'a> {
    pub request: &'a Request,
    pub response: Response,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct CacheDidUpdateParams<'a> {
    pub cache_name: &'a str,
    pub request: &'a Request,
    pub old_response: Option<&'a Response>,
    pub new_response: &'a Response,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct HandlerWillStartParams<'a> {
    pub request: &'a Request,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct HandlerWillRespondParams<'a> {
    pub request: &'a Request,
    pub response: Response,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct HandlerDidRespondParams<'a> {
    pub request: &'a Request,
    pub response: Option<&'a Response>,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct HandlerDidCompleteParams<'a> {
    pub request: &'a Request,
    pub response: Option<&'a Response>,
    pub error: Option<&'a WorkerError>,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

pub struct HandlerDidErrorParams<'a> {
    pub request: &'a Request,
    pub error: &'a WorkerError,
    pub event: &'a ExtendableEvent,
    pub state: &'a PluginState,
}

/// Transforms a request before it goes to the network
#[async_trait]
pub trait RequestWillFetch: Send + Sync {
    async fn request_will_fetch(&self, params: RequestWillFetchParams<'_>) -> WorkerResult<Request>;
}

/// Transforms a successful network response
#[async_trait]
pub trait FetchDidSucceed: Send + Sync {
    async fn fetch_did_succeed(&self, params: FetchDidSucceedParams<'_>) -> WorkerResult<Response>;
}

/// Observes a failed network request
#[async_trait]
pub trait FetchDidFail: Send + Sync {
    async fn fetch_did_fail(&self, params: FetchDidFailParams<'_>) -> WorkerResult<()>;
}

/// Rewrites the request used as a cache key
#[async_trait]
pub trait CacheKeyWillBeUsed: Send + Sync {
    async fn cache_key_will_be_used(
        &self,
        params: CacheKeyWillBeUsedParams<'_>,
    ) -> WorkerResult<Request>;
}

/// Substitutes or suppresses a cached response before it is used
#[async_trait]
pub trait CachedResponseWillBeUsed: Send + Sync {
    async fn cached_response_will_be_used(
        &self,
        params: CachedResponseWillBeUsedParams<'_>,
    ) -> WorkerResult<Option<Response>>;
}

/// Decides whether, and in what form, a response is cached
///
/// Returning `None` declines the write.
#[async_trait]
pub trait CacheWillUpdate: Send + Sync {
    async fn cache_will_update(
        &self,
        params: CacheWillUpdateParams<'_>,
    ) -> WorkerResult<Option<Response>>;
}

/// Observes a completed cache write
#[async_trait]
pub trait CacheDidUpdate: Send + Sync {
    async fn cache_did_update(&self, params: CacheDidUpdateParams<'_>) -> WorkerResult<()>;
}

#[async_trait]
pub trait HandlerWillStart: Send + Sync {
    async fn handler_will_start(&self, params: HandlerWillStartParams<'_>) -> WorkerResult<()>;
}

/// Replaces the response about to be returned by a strategy
#[async_trait]
pub trait HandlerWillRespond: Send + Sync {
    async fn handler_will_respond(
        &self,
        params: HandlerWillRespondParams<'_>,
    ) -> WorkerResult<Response>;
}

#[async_trait]
pub trait HandlerDidRespond: Send + Sync {
    async fn handler_did_respond(&self, params: HandlerDidRespondParams<'_>) -> WorkerResult<()>;
}

/// Observes the end of a handled request, including its extended work
#[async_trait]
pub trait HandlerDidComplete: Send + Sync {
    async fn handler_did_complete(&self, params: HandlerDidCompleteParams<'_>)
    -> WorkerResult<()>;
}

/// Offers a substitute response when a strategy fails
#[async_trait]
pub trait HandlerDidError: Send + Sync {
    async fn handler_did_error(
        &self,
        params: HandlerDidErrorParams<'_>,
    ) -> WorkerResult<Option<Response>>;
}

/// A plugin attached to a strategy
///
/// Implement the slot traits a plugin needs and return `Some(self)` from the
/// matching accessors:
///
/// ```rust
/// use async_trait::async_trait;
/// use swcache_core::{Response, WorkerResult};
/// use swcache_strategies::plugin::{
///     CacheWillUpdate, CacheWillUpdateParams, StrategyPlugin,
/// };
///
/// struct CacheOkOnly;
///
/// #[async_trait]
/// impl CacheWillUpdate for CacheOkOnly {
///     async fn cache_will_update(
///         &self,
///         params: CacheWillUpdateParams<'_>,
///     ) -> WorkerResult<Option<Response>> {
///         Ok(params.response.is_ok().then_some(params.response))
///     }
/// }
///
/// impl StrategyPlugin for CacheOkOnly {
///     fn as_cache_will_update(&self) -> Option<&dyn CacheWillUpdate> {
///         Some(self)
///     }
/// }
/// ```
pub trait StrategyPlugin: Send + Sync + 'static {
    fn as_request_will_fetch(&self) -> Option<&dyn RequestWillFetch> {
        None
    }

    fn as_fetch_did_succeed(&self) -> Option<&dyn FetchDidSucceed> {
        None
    }

    fn as_fetch_did_fail(&self) -> Option<&dyn FetchDidFail> {
        None
    }

    fn as_cache_key_will_be_used(&self) -> Option<&dyn CacheKeyWillBeUsed> {
        None
    }

    fn as_cached_response_will_be_used(&self) -> Option<&dyn CachedResponseWillBeUsed> {
        None
    }

    fn as_cache_will_update(&self) -> Option<&dyn CacheWillUpdate> {
        None
    }

    fn as_cache_did_update(&self) -> Option<&dyn CacheDidUpdate> {
        None
    }

    fn as_handler_will_start(&self) -> Option<&dyn HandlerWillStart> {
        None
    }

    fn as_handler_will_respond(&self) -> Option<&dyn HandlerWillRespond> {
        None
    }

    fn as_handler_did_respond(&self) -> Option<&dyn HandlerDidRespond> {
        None
    }

    fn as_handler_did_complete(&self) -> Option<&dyn HandlerDidComplete> {
        None
    }

    fn as_handler_did_error(&self) -> Option<&dyn HandlerDidError> {
        None
    }
}
