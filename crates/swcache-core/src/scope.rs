//! The worker context object
//!
//! A [`WorkerScope`] is built once when the worker starts and shared by every
//! component: it carries the worker's location, its cache storage, its network
//! fetcher, the quota-error callbacks and the cache naming scheme.

use crate::{
    config::{CacheNameConfig, HttpFetcherConfig},
    error::{WorkerError, WorkerResult},
    fetch::{Fetcher, HttpFetcher},
    quota::QuotaErrorCallbacks,
    traits::CacheStorage,
};
use std::sync::Arc;
use url::{Origin, Url};

/// Shared context of one worker
pub struct WorkerScope {
    location: Url,
    registration_scope: Url,
    cache_storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    quota_callbacks: QuotaErrorCallbacks,
    cache_names: CacheNameConfig,
}

impl std::fmt::Debug for WorkerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScope")
            .field("location", &self.location.as_str())
            .field("registration_scope", &self.registration_scope.as_str())
            .field("cache_names", &self.cache_names)
            .finish_non_exhaustive()
    }
}

impl WorkerScope {
    /// Create a scope for a worker script served from `location`
    ///
    /// The registration scope defaults to the script's directory, and cache
    /// names are suffixed with it.
    pub fn new(location: Url, cache_storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let registration_scope = location.join("./").unwrap_or_else(|_| location.clone());
        let cache_names = CacheNameConfig::default().with_suffix(registration_scope.as_str());
        Self {
            location,
            registration_scope,
            cache_storage,
            fetcher,
            quota_callbacks: QuotaErrorCallbacks::new(),
            cache_names,
        }
    }

    /// Create a scope that fetches over HTTP
    pub fn with_http(
        location: Url,
        cache_storage: Arc<dyn CacheStorage>,
        config: HttpFetcherConfig,
    ) -> WorkerResult<Self> {
        let fetcher = HttpFetcher::new(config)?.with_origin(location.origin());
        Ok(Self::new(location, cache_storage, Arc::new(fetcher)))
    }

    /// Override the registration scope; the cache-name suffix follows it
    pub fn with_registration_scope(mut self, scope: Url) -> Self {
        self.cache_names = self.cache_names.with_suffix(scope.as_str());
        self.registration_scope = scope;
        self
    }

    pub fn with_cache_names(mut self, cache_names: CacheNameConfig) -> WorkerResult<Self> {
        cache_names
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;
        self.cache_names = cache_names;
        Ok(self)
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn registration_scope(&self) -> &Url {
        &self.registration_scope
    }

    pub fn origin(&self) -> Origin {
        self.location.origin()
    }

    pub fn cache_storage(&self) -> &Arc<dyn CacheStorage> {
        &self.cache_storage
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn quota_callbacks(&self) -> &QuotaErrorCallbacks {
        &self.quota_callbacks
    }

    pub fn cache_names(&self) -> &CacheNameConfig {
        &self.cache_names
    }

    /// Resolve a possibly relative URL against the worker location
    pub fn resolve_url(&self, url: &str) -> WorkerResult<Url> {
        self.location
            .join(url)
            .map_err(|e| WorkerError::invalid_url(url, e))
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin()
    }

    /// Shorten same-origin URLs for log output
    pub fn get_friendly_url(&self, url: &Url) -> String {
        let origin = self.origin().ascii_serialization();
        match url.as_str().strip_prefix(origin.as_str()) {
            Some(path) if self.is_same_origin(url) => path.to_string(),
            _ => url.to_string(),
        }
    }
}
