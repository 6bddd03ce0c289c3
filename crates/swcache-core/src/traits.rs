//! Core cache storage traits
//!
//! These traits model the platform's cache storage: a set of named caches,
//! each mapping requests to stored responses. Implementations must be
//! `Send + Sync`; every operation is async because real backends suspend on
//! I/O.

#![allow(missing_docs)]

use crate::{
    error::WorkerResult,
    http::{Request, Response},
};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Options controlling how a request is matched against stored entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheQueryOptions {
    /// Ignore the query string of both URLs
    pub ignore_search: bool,
    /// Match non-GET requests too
    pub ignore_method: bool,
    /// Ignore `Vary` headers on stored responses
    pub ignore_vary: bool,
}

impl CacheQueryOptions {
    pub fn with_ignore_search(mut self, ignore: bool) -> Self {
        self.ignore_search = ignore;
        self
    }
}

/// A single named cache
#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the first stored response matching the request.
    async fn match_request(
        &self,
        request: &Request,
        options: CacheQueryOptions,
    ) -> WorkerResult<Option<Response>>;

    /// Stores the response, replacing any entry with the same URL.
    async fn put(&self, request: &Request, response: Response) -> WorkerResult<()>;

    /// Returns true if an entry was removed.
    async fn delete(&self, request: &Request, options: CacheQueryOptions) -> WorkerResult<bool>;

    /// Stored requests in insertion order, optionally filtered by a request.
    async fn keys(
        &self,
        request: Option<&Request>,
        options: CacheQueryOptions,
    ) -> WorkerResult<Vec<Request>>;
}

/// The set of named caches available to the worker
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the named cache, creating it if needed.
    async fn open(&self, cache_name: &str) -> WorkerResult<Arc<dyn Cache>>;

    async fn has(&self, cache_name: &str) -> WorkerResult<bool>;

    /// Returns true if the cache existed.
    async fn delete(&self, cache_name: &str) -> WorkerResult<bool>;

    /// Cache names in creation order.
    async fn keys(&self) -> WorkerResult<Vec<String>>;

    /// Matches within `cache_name` when given (without creating it), else
    /// across every cache in creation order.
    async fn match_request(
        &self,
        request: &Request,
        cache_name: Option<&str>,
        options: CacheQueryOptions,
    ) -> WorkerResult<Option<Response>> {
        if let Some(name) = cache_name {
            if !self.has(name).await? {
                return Ok(None);
            }
            return self.open(name).await?.match_request(request, options).await;
        }

        for name in self.keys().await? {
            let cache = self.open(&name).await?;
            if let Some(response) = cache.match_request(request, options).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// Search parameter carrying an entry's revision in its cache key
pub const REVISION_SEARCH_PARAM: &str = "__WB_REVISION__";

/// Remove the named search parameters from a URL string
pub fn strip_params(url: &Url, params_to_strip: &[&str]) -> String {
    let mut stripped = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !params_to_strip.contains(&name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.len() == url.query_pairs().count() {
        return url.to_string();
    }
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped.to_string()
}

/// Match a request while ignoring the named search parameters
///
/// Used to find the previous version of a revisioned entry, whose stored URL
/// differs from the request only in its revision parameter.
pub async fn cache_match_ignore_params(
    cache: &dyn Cache,
    request: &Request,
    params_to_ignore: &[&str],
    options: CacheQueryOptions,
) -> WorkerResult<Option<Response>> {
    let stripped_request_url = strip_params(&request.url, params_to_ignore);
    if stripped_request_url == request.url.as_str() {
        return cache.match_request(request, options).await;
    }

    let keys_options = options.with_ignore_search(true);
    for cache_key in cache.keys(Some(request), keys_options).await? {
        if strip_params(&cache_key.url, params_to_ignore) == stripped_request_url {
            return cache.match_request(&cache_key, options).await;
        }
    }
    Ok(None)
}

#[cfg(test)]
#[allow(clippy::panic)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_params_removes_only_named() {
        let url = Url::parse("https://example.com/a.js?__WB_REVISION__=1&v=2").unwrap();
        assert_eq!(
            strip_params(&url, &[REVISION_SEARCH_PARAM]),
            "https://example.com/a.js?v=2"
        );
    }

    #[test]
    fn test_strip_params_drops_empty_query() {
        let url = Url::parse("https://example.com/a.js?__WB_REVISION__=1").unwrap();
        assert_eq!(
            strip_params(&url, &[REVISION_SEARCH_PARAM]),
            "https://example.com/a.js"
        );
    }

    #[test]
    fn test_strip_params_untouched_url() {
        let url = Url::parse("https://example.com/a.js?x=%20y").unwrap();
        assert_eq!(strip_params(&url, &["other"]), url.as_str());
    }
}
