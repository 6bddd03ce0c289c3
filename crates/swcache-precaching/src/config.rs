//! Precaching configuration

use crate::route::UrlVariationOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use swcache_core::{WorkerError, WorkerResult};

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).and_then(|value| match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

/// Settings for the precache controller and its route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// Overrides the scope's precache name
    pub cache_name: Option<String>,
    /// Fetch precache misses from the network outside of install
    pub fallback_to_network: bool,
    /// Search parameters matching any of these patterns are ignored when
    /// matching requests against the manifest
    pub ignore_url_parameters_matching: Vec<String>,
    /// Appended to URLs ending in `/`
    pub directory_index: Option<String>,
    /// Also try the URL with `.html` appended
    pub clean_urls: bool,
    /// Delete precaches left behind by older naming schemes on activate
    pub cleanup_outdated_caches: bool,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            cache_name: None,
            fallback_to_network: true,
            ignore_url_parameters_matching: vec!["^utm_".to_string(), "^fbclid$".to_string()],
            directory_index: Some("index.html".to_string()),
            clean_urls: true,
            cleanup_outdated_caches: false,
        }
    }
}

impl PrecacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = Some(cache_name.into());
        self
    }

    pub fn with_fallback_to_network(mut self, enabled: bool) -> Self {
        self.fallback_to_network = enabled;
        self
    }

    pub fn with_ignored_parameters(mut self, patterns: Vec<String>) -> Self {
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

    pub fn with_cleanup_outdated_caches(mut self, enabled: bool) -> Self {
        self.cleanup_outdated_caches = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cache_name.as_deref().is_some_and(str::is_empty) {
            return Err("cache_name must not be empty when set".to_string());
        }
        if self.directory_index.as_deref().is_some_and(str::is_empty) {
            return Err("directory_index must not be empty when set".to_string());
        }
        for pattern in &self.ignore_url_parameters_matching {
            Regex::new(pattern).map_err(|e| format!("invalid parameter pattern '{pattern}': {e}"))?;
        }
        Ok(())
    }

    /// URL variation options for the precache route
    pub fn url_variation_options(&self) -> WorkerResult<UrlVariationOptions> {
        let patterns = self
            .ignore_url_parameters_matching
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    WorkerError::InvalidConfiguration(format!(
                        "invalid parameter pattern '{pattern}': {e}"
                    ))
                })
            })
            .collect::<WorkerResult<Vec<_>>>()?;

        Ok(UrlVariationOptions::new()
            .with_ignored_parameters(patterns)
            .with_directory_index(self.directory_index.clone())
            .with_clean_urls(self.clean_urls))
    }

    /// Load from `SWCACHE_PRECACHE_*` environment variables
    ///
    /// `SWCACHE_PRECACHE_IGNORE_PARAMS` is a comma-separated list of patterns.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            cache_name: env_string("SWCACHE_PRECACHE_CACHE_NAME").or(defaults.cache_name),
            fallback_to_network: env_bool("SWCACHE_PRECACHE_FALLBACK_TO_NETWORK")
                .unwrap_or(defaults.fallback_to_network),
            ignore_url_parameters_matching: env_string("SWCACHE_PRECACHE_IGNORE_PARAMS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|pattern| !pattern.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.ignore_url_parameters_matching),
            directory_index: env_string("SWCACHE_PRECACHE_DIRECTORY_INDEX")
                .or(defaults.directory_index),
            clean_urls: env_bool("SWCACHE_PRECACHE_CLEAN_URLS").unwrap_or(defaults.clean_urls),
            cleanup_outdated_caches: env_bool("SWCACHE_PRECACHE_CLEANUP_OUTDATED")
                .unwrap_or(defaults.cleanup_outdated_caches),
        };
        config
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;
        Ok(config)
    }
}
