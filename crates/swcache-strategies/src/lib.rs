//! Caching strategies for service workers
//!
//! A [`Strategy`] decides how a request is answered: from the cache, from the
//! network, or a mix of both. Strategies are written against a
//! [`StrategyHandler`], which runs every fetch and cache operation through the
//! callbacks of the strategy's [plugins](plugin::StrategyPlugin).
//!
//! # Writing a strategy
//!
//! ```rust
//! use async_trait::async_trait;
//! use swcache_core::{Request, Response, WorkerResult};
//! use swcache_strategies::{Strategy, StrategyCore, StrategyHandler};
//!
//! struct CacheFirst {
//!     core: StrategyCore,
//! }
//!
//! #[async_trait]
//! impl Strategy for CacheFirst {
//!     fn core(&self) -> &StrategyCore {
//!         &self.core
//!     }
//!
//!     async fn handle_request(
//!         &self,
//!         request: Request,
//!         handler: &StrategyHandler,
//!     ) -> WorkerResult<Response> {
//!         if let Some(cached) = handler.cache_match(&request).await? {
//!             return Ok(cached);
//!         }
//!         handler.fetch_and_cache_put(request).await
//!     }
//! }
//! ```

#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod handler;
pub mod plugin;
pub mod strategy;

pub use handler::{Notification, StatefulCallback, StrategyHandler};
pub use plugin::{CacheKeyMode, CallbackSlot, PluginState, StrategyPlugin};
pub use strategy::{HandleAll, HandlerOptions, ResponseFuture, Strategy, StrategyCore};
