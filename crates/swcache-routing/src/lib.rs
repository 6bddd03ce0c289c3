//! Request routing for service workers
//!
//! A [`Router`] holds ordered [`Route`]s per HTTP method and dispatches each
//! intercepted request to the first route whose matcher accepts it:
//!
//! - **Matchers**: closures, [`RegexRoute`] for URL patterns and
//!   [`NavigationRoute`] for page navigations
//! - **Fallbacks**: a default handler per method for unmatched requests
//! - **Recovery**: a catch handler per route, then a global one
//! - **Window messages**: `CACHE_URLS` requests warm caches through the
//!   routes that would serve those URLs
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use regex::Regex;
//! use reqwest::Method;
//! use swcache_core::{handler_fn, HttpFetcherConfig, MemoryCacheStorage, Response, WorkerScope};
//! use swcache_routing::Router;
//! use url::Url;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = WorkerScope::with_http(
//!     Url::parse("https://example.com/sw.js")?,
//!     Arc::new(MemoryCacheStorage::unlimited()),
//!     HttpFetcherConfig::default(),
//! )?;
//! let router = Router::new(Arc::new(scope));
//! router.register_capture(
//!     Regex::new(r"\.css$")?,
//!     handler_fn(|_| async { Ok(Response::ok("body { }")) }),
//!     Method::GET,
//! )?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod route;
pub mod router;

pub use route::{MatchContext, MatchResult, NavigationRoute, RegexRoute, Route, RouteMatcher};
pub use router::{CACHE_URLS_MESSAGE_TYPE, RouteCapture, RouteMatch, Router};
