//! Configuration structures
//!
//! Each configurable component has its own structure with sensible defaults,
//! builder-style setters, validation, and an environment loader.

use crate::error::{WorkerError, WorkerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|value| value.parse().ok())
}

/// Naming scheme for the caches the worker creates
///
/// Names are built as `prefix-name-suffix`, skipping empty parts. The suffix
/// is normally the registration scope so that several workers on one origin
/// never share caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNameConfig {
    pub prefix: String,
    pub suffix: String,
    pub precache: String,
    pub runtime: String,
}

impl Default for CacheNameConfig {
    fn default() -> Self {
        Self {
            prefix: "swcache".to_string(),
            suffix: String::new(),
            precache: "precache-v2".to_string(),
            runtime: "runtime".to_string(),
        }
    }
}

impl CacheNameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scope suffix
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Full name for the given cache component
    pub fn cache_name(&self, name: &str) -> String {
        [self.prefix.as_str(), name, self.suffix.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Name of the precache, or of the override when one is given
    pub fn precache_name(&self, user_cache_name: Option<&str>) -> String {
        user_cache_name.map_or_else(|| self.cache_name(&self.precache), str::to_string)
    }

    /// Name of the default runtime cache, or of the override when one is given
    pub fn runtime_name(&self, user_cache_name: Option<&str>) -> String {
        user_cache_name.map_or_else(|| self.cache_name(&self.runtime), str::to_string)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.precache.is_empty() {
            return Err("precache name must not be empty".to_string());
        }
        if self.runtime.is_empty() {
            return Err("runtime name must not be empty".to_string());
        }
        if self.precache == self.runtime {
            return Err("precache and runtime names must differ".to_string());
        }
        Ok(())
    }

    /// Load from `SWCACHE_CACHE_PREFIX`, `SWCACHE_CACHE_SUFFIX`,
    /// `SWCACHE_PRECACHE_NAME` and `SWCACHE_RUNTIME_NAME`
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            prefix: env_string("SWCACHE_CACHE_PREFIX").unwrap_or(defaults.prefix),
            suffix: env_string("SWCACHE_CACHE_SUFFIX").unwrap_or(defaults.suffix),
            precache: env_string("SWCACHE_PRECACHE_NAME").unwrap_or(defaults.precache),
            runtime: env_string("SWCACHE_RUNTIME_NAME").unwrap_or(defaults.runtime),
        };
        config
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;
        Ok(config)
    }
}

/// In-memory cache storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Storage quota in bytes across every cache (None for unlimited)
    pub quota_bytes: Option<usize>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            quota_bytes: Some(256 * 1024 * 1024), // 256 MB
        }
    }
}

impl MemoryCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage quota
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Remove the storage quota
    pub fn unlimited(mut self) -> Self {
        self.quota_bytes = None;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(quota) = self.quota_bytes
            && quota == 0
        {
            return Err("quota_bytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Network fetcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFetcherConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            user_agent: concat!("swcache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpFetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Load from `SWCACHE_CONNECT_TIMEOUT` and `SWCACHE_REQUEST_TIMEOUT`
    /// (seconds) and `SWCACHE_USER_AGENT`
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            connect_timeout: env_parse("SWCACHE_CONNECT_TIMEOUT")
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: env_parse("SWCACHE_REQUEST_TIMEOUT")
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_agent: env_string("SWCACHE_USER_AGENT").unwrap_or(defaults.user_agent),
            ..defaults
        };
        config
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;
        Ok(config)
    }
}
