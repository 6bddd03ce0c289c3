//! Precaching for service workers
//!
//! This crate installs a manifest of versioned assets into a dedicated cache
//! when the worker installs, serves matching requests from it, and removes
//! entries that dropped out of the manifest when the worker activates:
//!
//! - **Cache keys**: entries with a revision are stored under their URL
//!   plus a reserved `__WB_REVISION__` search parameter
//! - **Controller**: [`PrecacheController`] owns the manifest and drives
//!   install and activate
//! - **Strategy**: [`PrecacheStrategy`] answers from the precache, fills it
//!   during install, and repairs missing entries from the network
//! - **Route**: [`PrecacheRoute`] matches requests against the manifest,
//!   trying common URL variations
//! - **Worker**: [`PrecacheWorker`] wires the above to a router and the
//!   worker's lifecycle events
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use swcache_core::{ExtendableEvent, HttpFetcherConfig, MemoryCacheStorage, WorkerScope};
//! use swcache_precaching::{PrecacheConfig, PrecacheWorker, parse_manifest};
//! use url::Url;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = WorkerScope::with_http(
//!     Url::parse("https://example.com/sw.js")?,
//!     Arc::new(MemoryCacheStorage::unlimited()),
//!     HttpFetcherConfig::default(),
//! )?;
//! let worker = PrecacheWorker::new(Arc::new(scope), PrecacheConfig::default())?;
//!
//! let manifest = parse_manifest(serde_json::json!([
//!     {"url": "/index.html", "revision": "4f1c"},
//!     "/assets/app.9b2e.js",
//! ]))?;
//! worker.precache_and_route(&manifest)?;
//!
//! // On install, register the download with the event
//! let install = Arc::new(ExtendableEvent::install());
//! let _result = worker.install(&install);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod cache_key;
pub mod config;
pub mod controller;
pub mod plugins;
pub mod route;
pub mod strategy;
pub mod worker;

pub use cache_key::{CacheKey, ManifestEntry, PrecacheEntry, create_cache_key, parse_manifest};
pub use config::PrecacheConfig;
pub use controller::{
    ActivateResult, InstallResult, LifecycleFuture, PrecacheController, PrecacheIndex,
};
pub use plugins::{PrecacheCacheKeyPlugin, PrecacheFallbackPlugin, PrecacheInstallReportPlugin};
pub use route::{
    PrecacheRoute, UrlManipulation, UrlVariationOptions, generate_urls_to_check,
    remove_ignored_search_params,
};
pub use strategy::PrecacheStrategy;
pub use worker::{PRECACHE_NAME_MARKER, PrecacheWorker, delete_outdated_caches};

pub mod prelude {
    //! Convenient re-exports of commonly used types

    pub use crate::{
        cache_key::{ManifestEntry, PrecacheEntry},
        config::PrecacheConfig,
        controller::{InstallResult, PrecacheController},
        strategy::PrecacheStrategy,
        worker::PrecacheWorker,
    };
}
