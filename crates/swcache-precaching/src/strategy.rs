//! The strategy that serves and populates the precache

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use swcache_core::{
    Request, RequestMode, Response, RouteHandler, RouteHandlerOptions, WorkerError, WorkerResult,
    copy_response,
};
use swcache_strategies::plugin::{CacheWillUpdate, CacheWillUpdateParams, StrategyPlugin};
use swcache_strategies::{Strategy, StrategyCore, StrategyHandler};
use url::Origin;

/// Caches only complete, successful responses
#[derive(Debug)]
struct DefaultPrecacheCacheability;

#[async_trait]
impl CacheWillUpdate for DefaultPrecacheCacheability {
    async fn cache_will_update(
        &self,
        params: CacheWillUpdateParams<'_>,
    ) -> WorkerResult<Option<Response>> {
        Ok((params.response.status == 200).then_some(params.response))
    }
}

impl StrategyPlugin for DefaultPrecacheCacheability {
    fn as_cache_will_update(&self) -> Option<&dyn CacheWillUpdate> {
        Some(self)
    }
}

/// Stores redirected responses as plain copies, so they can answer
/// navigations later
#[derive(Debug)]
struct CopyRedirectedCacheableResponses {
    origin: Origin,
}

#[async_trait]
impl CacheWillUpdate for CopyRedirectedCacheableResponses {
    async fn cache_will_update(
        &self,
        params: CacheWillUpdateParams<'_>,
    ) -> WorkerResult<Option<Response>> {
        if params.response.redirected {
            return copy_response(&params.response, &self.origin, None).map(Some);
        }
        Ok(Some(params.response))
    }
}

impl StrategyPlugin for CopyRedirectedCacheableResponses {
    fn as_cache_will_update(&self) -> Option<&dyn CacheWillUpdate> {
        Some(self)
    }
}

/// Serves precached responses and fills the precache during install
///
/// Outside of install a cache miss falls back to the network unless that is
/// disabled. When the manifest recorded integrity for the entry, the fresh
/// response also repairs the cache.
pub struct PrecacheStrategy {
    core: StrategyCore,
    fallback_to_network: bool,
    copy_redirected: Arc<dyn StrategyPlugin>,
    default_cacheability: Arc<dyn StrategyPlugin>,
}

impl std::fmt::Debug for PrecacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecacheStrategy")
            .field("core", &self.core)
            .field("fallback_to_network", &self.fallback_to_network)
            .finish_non_exhaustive()
    }
}

impl PrecacheStrategy {
    pub fn new(core: StrategyCore) -> Self {
        let copy_redirected: Arc<dyn StrategyPlugin> = Arc::new(CopyRedirectedCacheableResponses {
            origin: core.scope().origin(),
        });
        core.add_plugin(Arc::clone(&copy_redirected));
        Self {
            core,
            fallback_to_network: true,
            copy_redirected,
            default_cacheability: Arc::new(DefaultPrecacheCacheability),
        }
    }

    pub fn with_fallback_to_network(mut self, enabled: bool) -> Self {
        self.fallback_to_network = enabled;
        self
    }

    pub fn fallback_to_network(&self) -> bool {
        self.fallback_to_network
    }

    async fn handle_install(
        &self,
        request: Request,
        handler: &StrategyHandler,
    ) -> WorkerResult<Response> {
        let response = handler.fetch(request.clone()).await?;
        let was_cached = handler
            .cache_put(request.clone(), Some(response.clone()))
            .await?;
        if !was_cached {
            return Err(WorkerError::BadPrecachingResponse {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    async fn handle_fetch(
        &self,
        request: Request,
        handler: &StrategyHandler,
    ) -> WorkerResult<Response> {
        if !self.fallback_to_network {
            return Err(WorkerError::MissingPrecacheEntry {
                cache_name: self.core.cache_name().to_string(),
                url: request.url.to_string(),
            });
        }

        let integrity_in_manifest = handler
            .params()
            .and_then(|params| params.get("integrity"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let integrity_in_request = request.integrity.clone();
        let no_integrity_conflict = integrity_in_request.is_none()
            || integrity_in_request == integrity_in_manifest;
        let no_cors = request.mode == RequestMode::NoCors;

        let integrity = if no_cors {
            None
        } else {
            integrity_in_request.or_else(|| integrity_in_manifest.clone())
        };
        let response = handler
            .fetch(request.clone().with_integrity(integrity))
            .await?;

        // The fetch was integrity-checked against the manifest, so the cache
        // can be repaired with it
        if integrity_in_manifest.is_some() && no_integrity_conflict && !no_cors {
            let was_cached = handler
                .cache_put(request.clone(), Some(response.clone()))
                .await?;
            tracing::debug!(
                url = %handler.scope().get_friendly_url(&request.url),
                was_cached,
                "precache entry was missing; repaired it from the network"
            );
        }

        Ok(response)
    }
}

#[async_trait]
impl Strategy for PrecacheStrategy {
    fn core(&self) -> &StrategyCore {
        &self.core
    }

    /// Keep exactly one cacheability decision in the plugin list
    ///
    /// The default status-200 check is added while no other plugin decides
    /// cacheability, and dropped once one does. The redirect copier does
    /// not count.
    fn prepare(&self) {
        self.core.update_plugins(|plugins| {
            let mut default_index = None;
            let mut cache_will_update_count = 0;
            for (index, plugin) in plugins.iter().enumerate() {
                if Arc::ptr_eq(plugin, &self.copy_redirected) {
                    continue;
                }
                if Arc::ptr_eq(plugin, &self.default_cacheability) {
                    default_index = Some(index);
                }
                if plugin.as_cache_will_update().is_some() {
                    cache_will_update_count += 1;
                }
            }

            if cache_will_update_count == 0 {
                plugins.push(Arc::clone(&self.default_cacheability));
            } else if cache_will_update_count > 1
                && let Some(index) = default_index
            {
                plugins.remove(index);
            }
        });
    }

    async fn handle_request(
        &self,
        request: Request,
        handler: &StrategyHandler,
    ) -> WorkerResult<Response> {
        if let Some(response) = handler.cache_match(&request).await? {
            return Ok(response);
        }

        if handler.event().is_install() {
            return self.handle_install(request, handler).await;
        }

        self.handle_fetch(request, handler).await
    }
}

#[async_trait]
impl RouteHandler for PrecacheStrategy {
    async fn handle(self: Arc<Self>, options: RouteHandlerOptions) -> WorkerResult<Response> {
        Strategy::handle(self, options.into()).await
    }
}
