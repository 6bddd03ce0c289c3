//! Plugins used by, and offered alongside, the precache strategy

use crate::controller::{PrecacheController, PrecacheIndex};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use swcache_core::{Request, Response, WorkerResult};
use swcache_strategies::plugin::{
    CacheKeyWillBeUsed, CacheKeyWillBeUsedParams, CachedResponseWillBeUsed,
    CachedResponseWillBeUsedParams, HandlerDidError, HandlerDidErrorParams, HandlerWillStart,
    HandlerWillStartParams, StrategyPlugin,
};
use url::Url;

const ORIGINAL_REQUEST_STATE_KEY: &str = "originalRequest";

/// Maps requests to their precache keys
///
/// The key comes from the route params when the precache route matched, and
/// from the manifest otherwise.
#[derive(Debug)]
pub struct PrecacheCacheKeyPlugin {
    index: Arc<PrecacheIndex>,
}

impl PrecacheCacheKeyPlugin {
    pub fn new(index: Arc<PrecacheIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl CacheKeyWillBeUsed for PrecacheCacheKeyPlugin {
    async fn cache_key_will_be_used(
        &self,
        params: CacheKeyWillBeUsedParams<'_>,
    ) -> WorkerResult<Request> {
        let from_params = params
            .params
            .and_then(|p| p.get("cacheKey"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let cache_key =
            from_params.or_else(|| self.index.cache_key_for_url(params.request.url.as_str()));

        match cache_key.and_then(|key| Url::parse(&key).ok()) {
            Some(url) => Ok(params.request.with_url(url)),
            None => Ok(params.request),
        }
    }
}

impl StrategyPlugin for PrecacheCacheKeyPlugin {
    fn as_cache_key_will_be_used(&self) -> Option<&dyn CacheKeyWillBeUsed> {
        Some(self)
    }
}

/// Records which entries an install actually downloaded
///
/// An entry found in the cache before its fetch is "not updated"; any other
/// entry is "updated".
#[derive(Debug, Default)]
pub struct PrecacheInstallReportPlugin {
    updated_urls: Mutex<Vec<String>>,
    not_updated_urls: Mutex<Vec<String>>,
}

impl PrecacheInstallReportPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updated_urls(&self) -> Vec<String> {
        self.updated_urls.lock().clone()
    }

    pub fn not_updated_urls(&self) -> Vec<String> {
        self.not_updated_urls.lock().clone()
    }
}

#[async_trait]
impl HandlerWillStart for PrecacheInstallReportPlugin {
    async fn handler_will_start(&self, params: HandlerWillStartParams<'_>) -> WorkerResult<()> {
        params.state.set(
            ORIGINAL_REQUEST_STATE_KEY,
            Value::String(params.request.url.to_string()),
        );
        Ok(())
    }
}

#[async_trait]
impl CachedResponseWillBeUsed for PrecacheInstallReportPlugin {
    async fn cached_response_will_be_used(
        &self,
        params: CachedResponseWillBeUsedParams<'_>,
    ) -> WorkerResult<Option<Response>> {
        if params.event.is_install()
            && let Some(Value::String(url)) = params.state.get(ORIGINAL_REQUEST_STATE_KEY)
        {
            if params.cached_response.is_some() {
                self.not_updated_urls.lock().push(url);
            } else {
                self.updated_urls.lock().push(url);
            }
        }
        Ok(params.cached_response)
    }
}

impl StrategyPlugin for PrecacheInstallReportPlugin {
    fn as_handler_will_start(&self) -> Option<&dyn HandlerWillStart> {
        Some(self)
    }

    fn as_cached_response_will_be_used(&self) -> Option<&dyn CachedResponseWillBeUsed> {
        Some(self)
    }
}

/// Answers failed requests of any strategy with a precached page
///
/// Attach it to a runtime strategy to serve, say, an offline page whenever
/// the strategy cannot produce a response.
#[derive(Debug)]
pub struct PrecacheFallbackPlugin {
    fallback_url: String,
    controller: Arc<PrecacheController>,
}

impl PrecacheFallbackPlugin {
    pub fn new(fallback_url: impl Into<String>, controller: Arc<PrecacheController>) -> Self {
        Self {
            fallback_url: fallback_url.into(),
            controller,
        }
    }
}

#[async_trait]
impl HandlerDidError for PrecacheFallbackPlugin {
    async fn handler_did_error(
        &self,
        _params: HandlerDidErrorParams<'_>,
    ) -> WorkerResult<Option<Response>> {
        self.controller.match_precache(&self.fallback_url).await
    }
}

impl StrategyPlugin for PrecacheFallbackPlugin {
    fn as_handler_did_error(&self) -> Option<&dyn HandlerDidError> {
        Some(self)
    }
}
