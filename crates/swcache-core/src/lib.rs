//! Platform model for service-worker caching
//!
//! This crate provides the pieces a service worker's caching layer talks to,
//! expressed as Rust types and traits so the strategy, routing and precaching
//! crates can run against real or in-memory backends:
//!
//! - **Requests and responses**: [`Request`] and [`Response`] with fully
//!   buffered bodies, plus [`copy_response`] for same-origin copies
//! - **Cache storage**: the [`Cache`] and [`CacheStorage`] traits and a
//!   concurrent in-memory implementation with an optional byte quota
//! - **Network**: the [`Fetcher`] trait and a reqwest-backed [`HttpFetcher`]
//!   that verifies Subresource Integrity metadata
//! - **Event lifetimes**: [`ExtendableEvent`] tracks work that must finish
//!   before the worker may be torn down
//! - **Context**: [`WorkerScope`] bundles the above with the cache naming
//!   scheme and the quota-error callbacks
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use swcache_core::{HttpFetcherConfig, MemoryCacheStorage, WorkerScope};
//! use url::Url;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let location = Url::parse("https://example.com/sw.js")?;
//! let scope = WorkerScope::with_http(
//!     location,
//!     Arc::new(MemoryCacheStorage::unlimited()),
//!     HttpFetcherConfig::default(),
//! )?;
//! assert_eq!(scope.registration_scope().as_str(), "https://example.com/");
//! # Ok(())
//! # }
//! ```

#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod handler;
pub mod http;
pub mod memory_cache;
pub mod quota;
pub mod scope;
pub mod traits;

// Re-export commonly used types
pub use config::{CacheNameConfig, HttpFetcherConfig, MemoryCacheConfig};
pub use error::{WorkerError, WorkerResult};
pub use event::{
    EventKind, ExtendableEvent, FetchEventData, LifetimeFuture, MessagePort, extend_lifetime,
};
pub use fetch::{Fetcher, HttpFetcher, verify_integrity};
pub use handler::{FnRouteHandler, RouteHandler, RouteHandlerOptions, handler_fn};
pub use http::{
    Credentials, FetchOptions, Request, RequestCache, RequestInit, RequestMode, Response,
    ResponseInit, ResponseType, copy_response,
};
pub use memory_cache::{MemoryCache, MemoryCacheStorage};
pub use quota::{QuotaErrorCallback, QuotaErrorCallbacks};
pub use scope::WorkerScope;
pub use traits::{
    Cache, CacheQueryOptions, CacheStorage, REVISION_SEARCH_PARAM, cache_match_ignore_params,
};

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits

    pub use crate::{
        config::{CacheNameConfig, HttpFetcherConfig, MemoryCacheConfig},
        error::{WorkerError, WorkerResult},
        event::{ExtendableEvent, MessagePort},
        fetch::{Fetcher, HttpFetcher},
        handler::{RouteHandler, RouteHandlerOptions, handler_fn},
        http::{Request, RequestMode, Response, ResponseType},
        memory_cache::MemoryCacheStorage,
        scope::WorkerScope,
        traits::{Cache, CacheQueryOptions, CacheStorage},
    };
}
