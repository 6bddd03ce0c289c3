//! Wiring a precache controller and a router into a worker
//!
//! [`PrecacheWorker`] is the object a worker builds at startup. It routes
//! the four lifecycle events to the controller and the router:
//!
//! - `install` downloads the manifest into the precache
//! - `activate` removes stale entries, and optionally stale precaches
//! - `fetch` routes the request
//! - `message` handles `CACHE_URLS` requests from windows

use crate::cache_key::ManifestEntry;
use crate::config::PrecacheConfig;
use crate::controller::{ActivateResult, InstallResult, LifecycleFuture, PrecacheController};
use crate::route::{PrecacheRoute, UrlVariationOptions};
use futures::future::{BoxFuture, join_all};
use reqwest::Method;
use std::sync::Arc;
use swcache_core::{
    CacheStorage, ExtendableEvent, Response, RouteHandler, WorkerResult, WorkerScope,
};
use swcache_routing::{Route, Router};

/// Marker shared by the names of every precache
pub const PRECACHE_NAME_MARKER: &str = "-precache-";

/// Delete precaches of this scope other than the current one
///
/// A cache is considered a precache of this scope when its name contains
/// both [`PRECACHE_NAME_MARKER`] and the registration scope. Returns the
/// deleted names.
pub async fn delete_outdated_caches(
    cache_storage: &dyn CacheStorage,
    current_precache_name: &str,
    registration_scope: &str,
) -> WorkerResult<Vec<String>> {
    let to_delete: Vec<String> = cache_storage
        .keys()
        .await?
        .into_iter()
        .filter(|name| {
            name.contains(PRECACHE_NAME_MARKER)
                && name.contains(registration_scope)
                && name != current_precache_name
        })
        .collect();

    for result in join_all(to_delete.iter().map(|name| cache_storage.delete(name))).await {
        result?;
    }

    if !to_delete.is_empty() {
        tracing::info!(caches = ?to_delete, "deleted outdated precaches");
    }
    Ok(to_delete)
}

/// A worker that precaches a manifest and routes requests
#[derive(Debug)]
pub struct PrecacheWorker {
    scope: Arc<WorkerScope>,
    config: PrecacheConfig,
    controller: Arc<PrecacheController>,
    router: Arc<Router>,
}

impl PrecacheWorker {
    pub fn new(scope: Arc<WorkerScope>, config: PrecacheConfig) -> WorkerResult<Self> {
        let controller = Arc::new(PrecacheController::new(Arc::clone(&scope), &config)?);
        let router = Arc::new(Router::new(Arc::clone(&scope)));
        Ok(Self {
            scope,
            config,
            controller,
            router,
        })
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.scope
    }

    pub fn config(&self) -> &PrecacheConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<PrecacheController> {
        &self.controller
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Add entries to the precache manifest
    pub fn precache(&self, entries: &[ManifestEntry]) -> WorkerResult<()> {
        self.controller.precache(entries)
    }

    /// Register the precache route with the configured URL variations
    pub fn add_route(&self) -> WorkerResult<Arc<Route>> {
        let options = self.config.url_variation_options()?;
        Ok(self.add_route_with(options))
    }

    /// Register the precache route with explicit URL variations
    pub fn add_route_with(&self, options: UrlVariationOptions) -> Arc<Route> {
        let handler: Arc<dyn RouteHandler> = self.controller.strategy().clone();
        let route = Arc::new(
            PrecacheRoute::new(Arc::clone(self.controller.index()), options).into_route(handler),
        );
        self.router.register_route(Arc::clone(&route));
        route
    }

    /// Precache the entries and serve them through the precache route
    pub fn precache_and_route(&self, entries: &[ManifestEntry]) -> WorkerResult<Arc<Route>> {
        self.precache(entries)?;
        self.add_route()
    }

    pub fn register_route(&self, route: Arc<Route>) {
        self.router.register_route(route);
    }

    pub fn set_default_handler(&self, handler: Arc<dyn RouteHandler>) {
        self.router.set_default_handler(handler, Method::GET);
    }

    pub fn set_catch_handler(&self, handler: Arc<dyn RouteHandler>) {
        self.router.set_catch_handler(handler);
    }

    pub fn create_handler_bound_to_url(&self, url: &str) -> WorkerResult<Arc<dyn RouteHandler>> {
        self.controller.create_handler_bound_to_url(url)
    }

    pub async fn match_precache(&self, url: &str) -> WorkerResult<Option<Response>> {
        self.controller.match_precache(url).await
    }

    /// Handle the install event
    pub fn install(&self, event: &Arc<ExtendableEvent>) -> LifecycleFuture<InstallResult> {
        self.controller.install(event)
    }

    /// Handle the activate event
    ///
    /// With `cleanup_outdated_caches`, precaches of this scope other than
    /// the current one are deleted too, as separate work on the event.
    pub fn activate(&self, event: &Arc<ExtendableEvent>) -> LifecycleFuture<ActivateResult> {
        if self.config.cleanup_outdated_caches {
            let storage = Arc::clone(self.scope.cache_storage());
            let current = self.controller.cache_name().to_string();
            let registration_scope = self.scope.registration_scope().to_string();
            event.wait_until(async move {
                delete_outdated_caches(storage.as_ref(), &current, &registration_scope)
                    .await
                    .map(|_| ())
            });
        }
        self.controller.activate(event)
    }

    /// Handle a fetch event; `None` leaves the request to the network
    pub fn fetch(
        &self,
        event: &Arc<ExtendableEvent>,
    ) -> Option<BoxFuture<'static, WorkerResult<Response>>> {
        self.router.handle_fetch_event(event)
    }

    /// Handle a message event; returns whether the message was understood
    pub fn message(&self, event: &Arc<ExtendableEvent>) -> WorkerResult<bool> {
        self.router.handle_cache_urls_message(event)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swcache_core::MemoryCacheStorage;

    #[tokio::test]
    async fn test_delete_outdated_caches() {
        let storage = MemoryCacheStorage::unlimited();
        let scope = "https://example.com/app/";
        for name in [
            "swcache-precache-v2-https://example.com/app/",
            "swcache-precache-v1-https://example.com/app/",
            "swcache-precache-v1-https://example.com/other/",
            "swcache-runtime-https://example.com/app/",
        ] {
            storage.open(name).await.unwrap();
        }

        let deleted = delete_outdated_caches(
            &storage,
            "swcache-precache-v2-https://example.com/app/",
            scope,
        )
        .await
        .unwrap();

        assert_eq!(deleted, vec!["swcache-precache-v1-https://example.com/app/"]);
        assert_eq!(storage.keys().await.unwrap().len(), 3);
    }
}
