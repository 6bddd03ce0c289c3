//! The precache controller
//!
//! The controller owns the manifest index, installs every entry into the
//! precache when the worker installs, and removes stale entries when it
//! activates.

use crate::cache_key::{ManifestEntry, create_cache_key};
use crate::config::PrecacheConfig;
use crate::plugins::{PrecacheCacheKeyPlugin, PrecacheInstallReportPlugin};
use crate::strategy::PrecacheStrategy;
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared, join};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use swcache_core::{
    CacheQueryOptions, Credentials, ExtendableEvent, Request, RequestCache, Response,
    RouteHandler, RouteHandlerOptions, WorkerError, WorkerResult, WorkerScope, extend_lifetime,
};
use swcache_strategies::{HandleAll, HandlerOptions, Strategy, StrategyCore, StrategyPlugin};
use url::Url;

#[derive(Debug, Clone, Default)]
struct IndexState {
    /// Manifest URLs in the order they were first added
    urls: Vec<String>,
    urls_to_cache_keys: HashMap<String, String>,
    urls_to_cache_modes: HashMap<String, RequestCache>,
    cache_keys_to_integrities: HashMap<String, String>,
}

/// The manifest as seen by the controller, its route and its plugins
///
/// Keys are absolute URL strings.
#[derive(Debug, Default)]
pub struct PrecacheIndex {
    state: RwLock<IndexState>,
}

impl PrecacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key_for_url(&self, url: &str) -> Option<String> {
        self.state.read().urls_to_cache_keys.get(url).cloned()
    }

    pub fn integrity_for_cache_key(&self, cache_key: &str) -> Option<String> {
        self.state
            .read()
            .cache_keys_to_integrities
            .get(cache_key)
            .cloned()
    }

    pub fn cache_mode_for_url(&self, url: &str) -> Option<RequestCache> {
        self.state.read().urls_to_cache_modes.get(url).copied()
    }

    /// `(url, cache_key)` pairs in manifest order
    pub fn entries(&self) -> Vec<(String, String)> {
        let state = self.state.read();
        state
            .urls
            .iter()
            .filter_map(|url| {
                state
                    .urls_to_cache_keys
                    .get(url)
                    .map(|key| (url.clone(), key.clone()))
            })
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.read().urls.clone()
    }

    pub fn cache_keys(&self) -> HashSet<String> {
        self.state
            .read()
            .urls_to_cache_keys
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add entries, all or none
    ///
    /// Returns the URLs of entries without revision information.
    fn add_entries(&self, entries: &[ManifestEntry], base: &Url) -> WorkerResult<Vec<String>> {
        let mut unrevisioned = Vec::new();
        let mut state = self.state.write();
        let mut staged = state.clone();

        for entry in entries {
            if entry.revision().is_none() {
                unrevisioned.push(entry.url().to_string());
            }

            let key = create_cache_key(entry, base)?;
            let url = key.url.to_string();
            let cache_key = key.cache_key.to_string();
            let cache_mode = if entry.key_revision().is_some() {
                RequestCache::Reload
            } else {
                RequestCache::Default
            };

            if let Some(existing) = staged.urls_to_cache_keys.get(&url)
                && *existing != cache_key
            {
                return Err(WorkerError::ConflictingEntries {
                    first_entry: existing.clone(),
                    second_entry: cache_key,
                });
            }

            if let Some(integrity) = entry.integrity() {
                if staged
                    .cache_keys_to_integrities
                    .get(&cache_key)
                    .is_some_and(|existing| existing != integrity)
                {
                    return Err(WorkerError::ConflictingIntegrity { url });
                }
                staged
                    .cache_keys_to_integrities
                    .insert(cache_key.clone(), integrity.to_string());
            }

            if staged
                .urls_to_cache_keys
                .insert(url.clone(), cache_key)
                .is_none()
            {
                staged.urls.push(url.clone());
            }
            staged.urls_to_cache_modes.insert(url, cache_mode);
        }

        *state = staged;
        Ok(unrevisioned)
    }
}

/// Outcome of [`PrecacheController::install`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallResult {
    /// Entries downloaded by this install
    #[serde(rename = "updatedURLs")]
    pub updated_urls: Vec<String>,
    /// Entries that were already cached
    #[serde(rename = "notUpdatedURLs")]
    pub not_updated_urls: Vec<String>,
}

/// Outcome of [`PrecacheController::activate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateResult {
    #[serde(rename = "deletedURLs")]
    pub deleted_urls: Vec<String>,
}

/// Handle to an install or activate registered with its event
pub type LifecycleFuture<T> = Shared<BoxFuture<'static, WorkerResult<T>>>;

/// Keeps the precache in step with the manifest
#[derive(Debug)]
pub struct PrecacheController {
    scope: Arc<WorkerScope>,
    index: Arc<PrecacheIndex>,
    strategy: Arc<PrecacheStrategy>,
}

impl PrecacheController {
    pub fn new(scope: Arc<WorkerScope>, config: &PrecacheConfig) -> WorkerResult<Self> {
        Self::with_plugins(scope, config, Vec::new())
    }

    /// Create a controller whose strategy also runs `plugins`
    pub fn with_plugins(
        scope: Arc<WorkerScope>,
        config: &PrecacheConfig,
        plugins: Vec<Arc<dyn StrategyPlugin>>,
    ) -> WorkerResult<Self> {
        config
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;

        let index = Arc::new(PrecacheIndex::new());
        let cache_name = scope
            .cache_names()
            .precache_name(config.cache_name.as_deref());
        let cache_key_plugin: Arc<dyn StrategyPlugin> =
            Arc::new(PrecacheCacheKeyPlugin::new(Arc::clone(&index)));

        let core = StrategyCore::new(Arc::clone(&scope))
            .with_cache_name(cache_name)
            .with_plugins(plugins)
            .with_plugins([cache_key_plugin]);
        let strategy = PrecacheStrategy::new(core).with_fallback_to_network(config.fallback_to_network);

        Ok(Self {
            scope,
            index,
            strategy: Arc::new(strategy),
        })
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.scope
    }

    pub fn index(&self) -> &Arc<PrecacheIndex> {
        &self.index
    }

    /// The strategy serving precached requests
    pub fn strategy(&self) -> &Arc<PrecacheStrategy> {
        &self.strategy
    }

    pub fn cache_name(&self) -> &str {
        self.strategy.core().cache_name()
    }

    /// Add manifest entries
    ///
    /// Entries are added all or none. Re-adding an identical entry is a
    /// no-op; a URL may not change its cache key, and a cache key may not
    /// change its integrity.
    pub fn add_entries(&self, entries: &[ManifestEntry]) -> WorkerResult<()> {
        let unrevisioned = self.index.add_entries(entries, self.scope.location())?;
        if !unrevisioned.is_empty() {
            tracing::warn!(
                urls = ?unrevisioned,
                "precached entries without revision info must carry a version in their URL, \
                 otherwise updates to them may never be picked up"
            );
        }
        Ok(())
    }

    /// Add entries to the manifest; install and activate install them
    pub fn precache(&self, entries: &[ManifestEntry]) -> WorkerResult<()> {
        self.add_entries(entries)
    }

    /// Download every manifest entry into the precache
    ///
    /// Entries are fetched one at a time. The work is registered with the
    /// event; any entry failing fails the whole install.
    pub fn install(self: &Arc<Self>, event: &Arc<ExtendableEvent>) -> LifecycleFuture<InstallResult> {
        let controller = Arc::clone(self);
        let install_event = Arc::clone(event);
        extend_lifetime(event, async move { controller.run_install(&install_event).await })
    }

    /// Delete precache entries no longer in the manifest
    pub fn activate(
        self: &Arc<Self>,
        event: &Arc<ExtendableEvent>,
    ) -> LifecycleFuture<ActivateResult> {
        let controller = Arc::clone(self);
        extend_lifetime(event, async move { controller.run_activate().await })
    }

    async fn run_install(&self, event: &Arc<ExtendableEvent>) -> WorkerResult<InstallResult> {
        let report = Arc::new(PrecacheInstallReportPlugin::new());
        let report_plugin: Arc<dyn StrategyPlugin> = report.clone();
        self.strategy.core().add_plugin(Arc::clone(&report_plugin));

        let outcome = self.install_entries(event).await;
        self.strategy.core().remove_plugin(&report_plugin);
        outcome?;

        let result = InstallResult {
            updated_urls: report.updated_urls(),
            not_updated_urls: report.not_updated_urls(),
        };
        tracing::info!(
            cache_name = self.cache_name(),
            updated = result.updated_urls.len(),
            not_updated = result.not_updated_urls.len(),
            "precaching finished"
        );
        Ok(result)
    }

    async fn install_entries(&self, event: &Arc<ExtendableEvent>) -> WorkerResult<()> {
        for (url, cache_key) in self.index.entries() {
            let integrity = self.index.integrity_for_cache_key(&cache_key);
            let cache_mode = self.index.cache_mode_for_url(&url).unwrap_or_default();
            let request = Request::get(&url)?
                .with_integrity(integrity)
                .with_cache(cache_mode)
                .with_credentials(Credentials::SameOrigin);

            let options = HandlerOptions::new(request, Arc::clone(event))
                .with_params(Some(json!({ "cacheKey": cache_key })));
            let HandleAll { response, done } = Arc::clone(&self.strategy).handle_all(options);
            let (response, done) = join(response, done).await;
            response?;
            done?;
        }
        Ok(())
    }

    async fn run_activate(&self) -> WorkerResult<ActivateResult> {
        let cache = self
            .scope
            .cache_storage()
            .open(self.cache_name())
            .await?;
        let currently_cached = cache.keys(None, CacheQueryOptions::default()).await?;
        let expected_cache_keys = self.index.cache_keys();

        let mut deleted_urls = Vec::new();
        for request in currently_cached {
            let url = request.url.to_string();
            if !expected_cache_keys.contains(&url) {
                cache.delete(&request, CacheQueryOptions::default()).await?;
                deleted_urls.push(url);
            }
        }

        if !deleted_urls.is_empty() {
            tracing::info!(
                cache_name = self.cache_name(),
                deleted = deleted_urls.len(),
                "removed outdated precache entries"
            );
        }
        Ok(ActivateResult { deleted_urls })
    }

    /// The cache key of a manifest URL, which may be relative
    pub fn get_cache_key_for_url(&self, url: &str) -> Option<String> {
        let url = self.scope.resolve_url(url).ok()?;
        self.index.cache_key_for_url(url.as_str())
    }

    pub fn get_integrity_for_cache_key(&self, cache_key: &str) -> Option<String> {
        self.index.integrity_for_cache_key(cache_key)
    }

    /// Every precached URL, in manifest order
    pub fn get_cached_urls(&self) -> Vec<String> {
        self.index.urls()
    }

    pub fn get_urls_to_cache_keys(&self) -> HashMap<String, String> {
        self.index.entries().into_iter().collect()
    }

    /// Look up a manifest URL in the precache
    pub async fn match_precache(&self, url: &str) -> WorkerResult<Option<Response>> {
        let Some(cache_key) = self.get_cache_key_for_url(url) else {
            return Ok(None);
        };
        self.match_cache_key(&cache_key).await
    }

    /// Look up a request's URL in the precache
    pub async fn match_precache_request(&self, request: &Request) -> WorkerResult<Option<Response>> {
        match self.index.cache_key_for_url(&request.cache_url()) {
            Some(cache_key) => self.match_cache_key(&cache_key).await,
            None => Ok(None),
        }
    }

    async fn match_cache_key(&self, cache_key: &str) -> WorkerResult<Option<Response>> {
        let request = Request::get(cache_key)?;
        let cache = self
            .scope
            .cache_storage()
            .open(self.cache_name())
            .await?;
        cache
            .match_request(&request, CacheQueryOptions::default())
            .await
    }

    /// A handler that answers every request with one precached URL
    ///
    /// Fails immediately when the URL is not in the manifest.
    pub fn create_handler_bound_to_url(&self, url: &str) -> WorkerResult<Arc<dyn RouteHandler>> {
        let Some(cache_key) = self.get_cache_key_for_url(url) else {
            return Err(WorkerError::NonPrecachedUrl(url.to_string()));
        };
        Ok(Arc::new(BoundPrecacheHandler {
            url: self.scope.resolve_url(url)?,
            cache_key,
            strategy: Arc::clone(&self.strategy),
        }))
    }
}

/// Serves one precached URL whatever the request
struct BoundPrecacheHandler {
    url: Url,
    cache_key: String,
    strategy: Arc<PrecacheStrategy>,
}

#[async_trait]
impl RouteHandler for BoundPrecacheHandler {
    async fn handle(self: Arc<Self>, options: RouteHandlerOptions) -> WorkerResult<Response> {
        let mut params = Map::new();
        params.insert("cacheKey".to_string(), Value::String(self.cache_key.clone()));
        if let Some(Value::Object(extra)) = options.params {
            params.extend(extra);
        }

        let handler_options = HandlerOptions {
            request: Request::new(self.url.clone()),
            event: options.event,
            url: Some(options.url),
            params: Some(Value::Object(params)),
        };
        Strategy::handle(Arc::clone(&self.strategy), handler_options).await
    }
}
