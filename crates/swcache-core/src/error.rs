//! Error types for service-worker caching operations

use thiserror::Error;

/// Errors raised by the cache, strategy, routing and precaching layers
///
/// The error is `Clone` because a single response outcome is observed both by
/// the caller of a strategy and by the strategy's completion bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// A manifest entry was empty or had no URL
    #[error("Invalid manifest entry: {0}")]
    InvalidManifestEntry(String),

    /// Two manifest entries claim the same URL with different cache keys
    #[error("Two of the entries passed to add_entries had the URL {first_entry} but different revision details ({second_entry})")]
    ConflictingEntries {
        first_entry: String,
        second_entry: String,
    },

    /// Two manifest entries share a cache key but disagree on integrity
    #[error("Two of the entries passed to add_entries had matching URLs but different integrity values for {url}")]
    ConflictingIntegrity { url: String },

    /// An install-time response failed the cacheability check
    #[error("The response for '{url}' returned a status code of '{status}' and won't be cached as a result")]
    BadPrecachingResponse { url: String, status: u16 },

    /// A precache miss reached the network fallback while it was disabled
    #[error("The precache '{cache_name}' has no entry for '{url}' and network fallback is disabled")]
    MissingPrecacheEntry { cache_name: String, url: String },

    /// A bound handler was requested for a URL that is not precached
    #[error("The URL '{0}' was not precached; precache it before binding a handler to it")]
    NonPrecachedUrl(String),

    /// A response from another origin was passed to `copy_response`
    #[error("Cannot copy a response from origin '{origin}'; only same-origin responses can be copied")]
    CrossOriginCopyResponse { origin: String },

    /// A request-will-fetch plugin callback failed
    #[error("A plugin's request_will_fetch callback failed: {0}")]
    PluginRequestWillFetch(String),

    /// A non-GET request was passed to the cache write path
    #[error("Unable to cache '{url}' because it is a '{method}' request; only 'GET' requests can be cached")]
    NonGetCacheAttempt { url: String, method: String },

    /// The cache write path was called without a response
    #[error("Attempted to cache '{0}' without a response")]
    MissingResponse(String),

    /// No routes are registered for the method
    #[error("No routes are registered for method '{0}'")]
    RouteMethodNotRegistered(String),

    /// The route instance is not registered with the router
    #[error("The route passed to unregister_route is not registered")]
    RouteNotRegistered,

    /// A strategy finished without a usable response
    #[error("The strategy could not generate a response for '{0}'")]
    NoResponse(String),

    /// The network layer failed to produce a response
    #[error("Network error: {0}")]
    Network(String),

    /// Cache storage rejected a write for lack of space
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// Cache storage backend error
    #[error("Cache storage error: {0}")]
    CacheStorage(String),

    /// A plugin callback failed
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// A URL could not be parsed
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A worker message had an unexpected shape
    #[error("Invalid message: {0}")]
    Message(String),
}

impl WorkerError {
    /// Stable kebab-case code identifying the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidManifestEntry(_) => "add-to-cache-list-unexpected-type",
            Self::ConflictingEntries { .. } => "add-to-cache-list-conflicting-entries",
            Self::ConflictingIntegrity { .. } => "add-to-cache-list-conflicting-integrities",
            Self::BadPrecachingResponse { .. } => "bad-precaching-response",
            Self::MissingPrecacheEntry { .. } => "missing-precache-entry",
            Self::NonPrecachedUrl(_) => "non-precached-url",
            Self::CrossOriginCopyResponse { .. } => "cross-origin-copy-response",
            Self::PluginRequestWillFetch(_) => "plugin-error-request-will-fetch",
            Self::NonGetCacheAttempt { .. } => "attempt-to-cache-non-get-request",
            Self::MissingResponse(_) => "cache-put-with-no-response",
            Self::RouteMethodNotRegistered(_) => "unregister-route-but-not-found-with-method",
            Self::RouteNotRegistered => "unregister-route-route-not-registered",
            Self::NoResponse(_) => "no-response",
            Self::Network(_) => "network-error",
            Self::QuotaExceeded => "quota-exceeded",
            Self::CacheStorage(_) => "cache-storage-error",
            Self::Plugin(_) => "plugin-error",
            Self::InvalidUrl { .. } => "invalid-url",
            Self::InvalidConfiguration(_) => "invalid-configuration",
            Self::Message(_) => "invalid-message",
        }
    }

    /// Build an `InvalidUrl` error from a parse failure
    pub fn invalid_url(url: impl Into<String>, err: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Message(err.to_string())
    }
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
#[allow(clippy::panic)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = WorkerError::ConflictingEntries {
            first_entry: "https://example.com/a.js?__WB_REVISION__=v1".to_string(),
            second_entry: "https://example.com/a.js?__WB_REVISION__=v2".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("__WB_REVISION__=v1"));
        assert!(message.contains("__WB_REVISION__=v2"));

        let err = WorkerError::BadPrecachingResponse {
            url: "https://example.com/missing.js".to_string(),
            status: 404,
        };
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let errors = [
            WorkerError::InvalidManifestEntry(String::new()),
            WorkerError::ConflictingIntegrity { url: String::new() },
            WorkerError::NonPrecachedUrl(String::new()),
            WorkerError::RouteMethodNotRegistered("GET".to_string()),
            WorkerError::RouteNotRegistered,
            WorkerError::QuotaExceeded,
            WorkerError::MissingResponse(String::new()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(WorkerError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_invalid_url_conversion() {
        let parse_err = url::Url::parse("not a url").expect_err("should fail to parse");
        let err = WorkerError::invalid_url("not a url", parse_err);
        assert_eq!(err.kind(), "invalid-url");
        assert!(err.to_string().contains("not a url"));
    }
}
