//! In-memory cache storage
//!
//! This module provides a concurrent cache storage backed by `DashMap`:
//! - Entries keyed by their fragment-less request URL
//! - Insertion order tracked with an atomic sequence so `keys()` is stable
//! - A storage-wide byte quota shared by every cache

use crate::{
    config::MemoryCacheConfig,
    error::{WorkerError, WorkerResult},
    http::{Request, Response, strip_fragment},
    traits::{Cache, CacheQueryOptions, CacheStorage},
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::Method;
use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use url::Url;

#[derive(Debug)]
struct StoredEntry {
    request: Request,
    response: Response,
    size_bytes: usize,
    /// Insertion sequence, used to report keys in insertion order
    sequence: u64,
}

/// Byte accounting shared by every cache of one storage
#[derive(Debug)]
struct Quota {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl Quota {
    fn reserve(&self, add: usize, release: usize) -> WorkerResult<()> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(release).saturating_add(add);
            if let Some(limit) = self.limit
                && next > limit
                && add > release
            {
                return Err(WorkerError::QuotaExceeded);
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

fn url_without_search(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.into()
}

fn request_matches(stored: &Request, query: &Request, options: CacheQueryOptions) -> bool {
    if options.ignore_search {
        url_without_search(&stored.url) == url_without_search(&query.url)
    } else {
        strip_fragment(&stored.url) == strip_fragment(&query.url)
    }
}

/// A single in-memory cache
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: DashMap<String, Arc<StoredEntry>>,
    next_sequence: AtomicU64,
    quota: Arc<Quota>,
}

impl MemoryCache {
    fn new(name: &str, quota: Arc<Quota>) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            quota,
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matching_entries(&self, request: &Request, options: CacheQueryOptions) -> Vec<Arc<StoredEntry>> {
        if request.method != Method::GET && !options.ignore_method {
            return Vec::new();
        }

        let mut matches: Vec<Arc<StoredEntry>> = if options.ignore_search {
            self.entries
                .iter()
                .filter(|entry| request_matches(&entry.value().request, request, options))
                .map(|entry| Arc::clone(entry.value()))
                .collect()
        } else {
            self.entries
                .get(&request.cache_url())
                .map(|entry| vec![Arc::clone(entry.value())])
                .unwrap_or_default()
        };
        matches.sort_by_key(|entry| entry.sequence);
        matches
    }

    fn drop_entries(&self) -> usize {
        let freed: usize = self.entries.iter().map(|entry| entry.size_bytes).sum();
        self.entries.clear();
        freed
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &Request,
        options: CacheQueryOptions,
    ) -> WorkerResult<Option<Response>> {
        Ok(self
            .matching_entries(request, options)
            .first()
            .map(|entry| entry.response.clone()))
    }

    async fn put(&self, request: &Request, response: Response) -> WorkerResult<()> {
        if request.method != Method::GET {
            return Err(WorkerError::CacheStorage(format!(
                "cannot store a '{}' request",
                request.method
            )));
        }
        if response.status == 206 {
            return Err(WorkerError::CacheStorage(
                "cannot store a partial (206) response".to_string(),
            ));
        }

        let key = request.cache_url();
        let size_bytes = key.len() + response.size_bytes();
        tracing::trace!(cache = %self.name, url = %key, size_bytes, "storing entry");

        let entry = Arc::new(StoredEntry {
            request: request.clone(),
            response,
            size_bytes,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        });

        // The shard guard is held from the size lookup to the insert
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                self.quota.reserve(size_bytes, occupied.get().size_bytes)?;
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                self.quota.reserve(size_bytes, 0)?;
                vacant.insert(entry);
            }
        }
        Ok(())
    }

    async fn delete(&self, request: &Request, options: CacheQueryOptions) -> WorkerResult<bool> {
        let mut removed = false;
        for entry in self.matching_entries(request, options) {
            if let Some((_, stored)) = self.entries.remove(&entry.request.cache_url()) {
                self.quota.release(stored.size_bytes);
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn keys(
        &self,
        request: Option<&Request>,
        options: CacheQueryOptions,
    ) -> WorkerResult<Vec<Request>> {
        let mut entries: Vec<Arc<StoredEntry>> = match request {
            Some(request) => self.matching_entries(request, options),
            None => self
                .entries
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect(),
        };
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries.iter().map(|entry| entry.request.clone()).collect())
    }
}

/// In-memory implementation of the worker's cache storage
#[derive(Debug)]
pub struct MemoryCacheStorage {
    caches: DashMap<String, (u64, Arc<MemoryCache>)>,
    next_sequence: AtomicU64,
    quota: Arc<Quota>,
}

impl MemoryCacheStorage {
    pub fn new(config: MemoryCacheConfig) -> WorkerResult<Self> {
        config
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;

        Ok(Self {
            caches: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            quota: Arc::new(Quota {
                limit: config.quota_bytes,
                used: AtomicUsize::new(0),
            }),
        })
    }

    /// Storage without a quota
    pub fn unlimited() -> Self {
        Self {
            caches: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            quota: Arc::new(Quota {
                limit: None,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Bytes currently stored across all caches
    pub fn usage_bytes(&self) -> usize {
        self.quota.used.load(Ordering::Relaxed)
    }

    /// Open a cache with its concrete type, creating it if needed
    pub fn open_memory_cache(&self, cache_name: &str) -> Arc<MemoryCache> {
        let entry = self.caches.entry(cache_name.to_string()).or_insert_with(|| {
            (
                self.next_sequence.fetch_add(1, Ordering::Relaxed),
                Arc::new(MemoryCache::new(cache_name, Arc::clone(&self.quota))),
            )
        });
        Arc::clone(&entry.value().1)
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, cache_name: &str) -> WorkerResult<Arc<dyn Cache>> {
        Ok(self.open_memory_cache(cache_name))
    }

    async fn has(&self, cache_name: &str) -> WorkerResult<bool> {
        Ok(self.caches.contains_key(cache_name))
    }

    async fn delete(&self, cache_name: &str) -> WorkerResult<bool> {
        match self.caches.remove(cache_name) {
            Some((_, (_, cache))) => {
                self.quota.release(cache.drop_entries());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> WorkerResult<Vec<String>> {
        let mut names: Vec<(u64, String)> = self
            .caches
            .iter()
            .map(|entry| (entry.value().0, entry.key().clone()))
            .collect();
        names.sort_unstable();
        Ok(names.into_iter().map(|(_, name)| name).collect())
    }
}
