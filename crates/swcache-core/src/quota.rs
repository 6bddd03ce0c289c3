//! Storage-quota error callbacks
//!
//! Callbacks registered here run, in registration order, whenever a cache
//! write fails with [`WorkerError::QuotaExceeded`](crate::WorkerError). They
//! typically evict expired runtime entries to make room for later writes.

use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;

/// A callback run after a storage-quota failure
pub type QuotaErrorCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Ordered set of quota-error callbacks
#[derive(Default)]
pub struct QuotaErrorCallbacks {
    callbacks: RwLock<Vec<QuotaErrorCallback>>,
}

impl std::fmt::Debug for QuotaErrorCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaErrorCallbacks")
            .field("len", &self.len())
            .finish()
    }
}

impl QuotaErrorCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback; returns false if this exact callback is already registered
    pub fn register(&self, callback: QuotaErrorCallback) -> bool {
        let mut callbacks = self.callbacks.write();
        if callbacks.iter().any(|existing| Arc::ptr_eq(existing, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Run every callback one after another
    pub async fn execute(&self) {
        let callbacks: Vec<QuotaErrorCallback> = self.callbacks.read().clone();
        tracing::debug!(count = callbacks.len(), "running quota error callbacks");

        for callback in callbacks {
            callback().await;
        }

        tracing::debug!("finished running quota error callbacks");
    }
}
