//! Matching requests against the precache manifest
//!
//! A request rarely names a precached URL exactly: it may carry tracking
//! parameters, point at a directory, or omit the `.html` extension. The
//! precache route tries a fixed sequence of variations of the request URL
//! and matches on the first one the manifest knows.

use crate::controller::PrecacheIndex;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use swcache_core::RouteHandler;
use swcache_routing::{MatchContext, MatchResult, Route, RouteMatcher};
use url::Url;

/// Produces extra candidate URLs for a request URL
pub type UrlManipulation = Arc<dyn Fn(&Url) -> Vec<Url> + Send + Sync>;

/// How request URLs are varied before lookup
#[derive(Clone)]
pub struct UrlVariationOptions {
    /// Search parameters whose names match any pattern are dropped
    pub ignore_url_parameters_matching: Vec<Regex>,
    pub directory_index: Option<String>,
    pub clean_urls: bool,
    pub url_manipulation: Option<UrlManipulation>,
}

impl std::fmt::Debug for UrlVariationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlVariationOptions")
            .field(
                "ignore_url_parameters_matching",
                &self.ignore_url_parameters_matching,
            )
            .field("directory_index", &self.directory_index)
            .field("clean_urls", &self.clean_urls)
            .field("url_manipulation", &self.url_manipulation.is_some())
            .finish()
    }
}

impl Default for UrlVariationOptions {
    fn default() -> Self {
        Self {
            ignore_url_parameters_matching: [r"^utm_", r"^fbclid$"]
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            directory_index: Some("index.html".to_string()),
            clean_urls: true,
            url_manipulation: None,
        }
    }
}

impl UrlVariationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored_parameters(mut self, patterns: Vec<Regex>) -> Self {
        self.ignore_url_parameters_matching = patterns;
        self
    }

    pub fn with_directory_index(mut self, directory_index: Option<String>) -> Self {
        self.directory_index = directory_index;
        self
    }

    pub fn with_clean_urls(mut self, enabled: bool) -> Self {
        self.clean_urls = enabled;
        self
    }

    pub fn with_url_manipulation(
        mut self,
        manipulation: impl Fn(&Url) -> Vec<Url> + Send + Sync + 'static,
    ) -> Self {
        self.url_manipulation = Some(Arc::new(manipulation));
        self
    }
}

/// Drop search parameters whose names match any of the patterns
pub fn remove_ignored_search_params(url: &Url, patterns: &[Regex]) -> Url {
    let total = url.query_pairs().count();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !patterns.iter().any(|re| re.is_match(name)))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.len() == total {
        return stripped;
    }
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Candidate URLs for a request, in lookup order
///
/// 1. the URL without its fragment
/// 2. the same without ignored search parameters
/// 3. the directory index appended, for URLs ending in `/`
/// 4. `.html` appended to the path, when clean URLs are enabled
/// 5. anything the URL manipulation callback returns
pub fn generate_urls_to_check(url: &Url, options: &UrlVariationOptions) -> Vec<String> {
    let mut without_fragment = url.clone();
    without_fragment.set_fragment(None);

    let mut candidates = vec![without_fragment.to_string()];

    let stripped =
        remove_ignored_search_params(&without_fragment, &options.ignore_url_parameters_matching);
    candidates.push(stripped.to_string());

    if let Some(directory_index) = &options.directory_index
        && stripped.path().ends_with('/')
    {
        let mut directory = stripped.clone();
        directory.set_path(&format!("{}{directory_index}", stripped.path()));
        candidates.push(directory.to_string());
    }

    if options.clean_urls {
        let mut clean = stripped.clone();
        clean.set_path(&format!("{}.html", stripped.path()));
        candidates.push(clean.to_string());
    }

    if let Some(manipulation) = &options.url_manipulation {
        candidates.extend(manipulation(&without_fragment).iter().map(ToString::to_string));
    }

    candidates
}

/// Matches requests whose URL, or one of its variations, is precached
///
/// The match params are `{"cacheKey": ..., "integrity": ...}`, which the
/// precache strategy and its cache-key plugin read.
#[derive(Debug, Clone)]
pub struct PrecacheRoute {
    index: Arc<PrecacheIndex>,
    options: UrlVariationOptions,
}

impl PrecacheRoute {
    pub fn new(index: Arc<PrecacheIndex>, options: UrlVariationOptions) -> Self {
        Self { index, options }
    }

    /// A GET route serving matches with the given handler
    pub fn into_route(self, handler: Arc<dyn RouteHandler>) -> Route {
        Route::new(self, handler)
    }
}

impl RouteMatcher for PrecacheRoute {
    fn matches(&self, context: &MatchContext<'_>) -> MatchResult {
        for possible_url in generate_urls_to_check(context.url, &self.options) {
            if let Some(cache_key) = self.index.cache_key_for_url(&possible_url) {
                let integrity = self.index.integrity_for_cache_key(&cache_key);
                return MatchResult::MatchedWithParams(json!({
                    "cacheKey": cache_key,
                    "integrity": integrity,
                }));
            }
        }

        tracing::trace!(url = %context.url, "precaching did not find a match");
        MatchResult::NoMatch
    }
}
