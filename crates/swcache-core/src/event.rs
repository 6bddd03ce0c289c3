//! Worker lifecycle events and extend-lifetime bookkeeping
//!
//! The host keeps a worker alive while work registered through
//! [`ExtendableEvent::wait_until`] is outstanding. Futures are lazy, so the
//! event also owns the work: [`ExtendableEvent::settle`] drives everything
//! registered on it, including work registered while settling.

use crate::{
    error::{WorkerError, WorkerResult},
    http::{Request, Response},
};
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;

/// Lifetime-extending work registered on an event
pub type LifetimeFuture = Shared<BoxFuture<'static, WorkerResult<()>>>;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
}

/// Data carried by a fetch event
#[derive(Debug, Clone)]
pub struct FetchEventData {
    pub request: Request,
    pub client_id: Option<String>,
    /// Navigation preload response, if the host already has one
    pub preload_response: Option<Response>,
}

/// Reply channel of a message event
#[derive(Debug, Clone)]
pub struct MessagePort {
    sender: mpsc::UnboundedSender<Value>,
}

impl MessagePort {
    /// Create a port and the receiving end the sender listens on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn post_message(&self, message: Value) {
        if self.sender.send(message).is_err() {
            tracing::debug!("message port closed before reply was posted");
        }
    }
}

/// Data carried by a message event
#[derive(Debug, Clone)]
pub struct MessageEventData {
    pub data: Value,
    pub ports: Vec<MessagePort>,
}

#[derive(Debug, Clone)]
enum EventData {
    Lifecycle,
    Fetch(FetchEventData),
    Message(MessageEventData),
}

/// An event whose lifetime can be extended by registered work
pub struct ExtendableEvent {
    kind: EventKind,
    data: EventData,
    pending: Mutex<Vec<LifetimeFuture>>,
}

impl std::fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("data", &self.data)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl ExtendableEvent {
    pub fn install() -> Self {
        Self::lifecycle(EventKind::Install)
    }

    pub fn activate() -> Self {
        Self::lifecycle(EventKind::Activate)
    }

    fn lifecycle(kind: EventKind) -> Self {
        Self {
            kind,
            data: EventData::Lifecycle,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn fetch(request: Request) -> Self {
        Self::fetch_with(FetchEventData {
            request,
            client_id: None,
            preload_response: None,
        })
    }

    pub fn fetch_with(data: FetchEventData) -> Self {
        Self {
            kind: EventKind::Fetch,
            data: EventData::Fetch(data),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn message(data: Value, ports: Vec<MessagePort>) -> Self {
        Self {
            kind: EventKind::Message,
            data: EventData::Message(MessageEventData { data, ports }),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_install(&self) -> bool {
        self.kind == EventKind::Install
    }

    /// The intercepted request of a fetch event
    pub fn request(&self) -> Option<&Request> {
        match &self.data {
            EventData::Fetch(data) => Some(&data.request),
            _ => None,
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match &self.data {
            EventData::Fetch(data) => data.client_id.as_deref(),
            _ => None,
        }
    }

    pub fn preload_response(&self) -> Option<&Response> {
        match &self.data {
            EventData::Fetch(data) => data.preload_response.as_ref(),
            _ => None,
        }
    }

    pub fn message_data(&self) -> Option<&Value> {
        match &self.data {
            EventData::Message(data) => Some(&data.data),
            _ => None,
        }
    }

    pub fn ports(&self) -> &[MessagePort] {
        match &self.data {
            EventData::Message(data) => &data.ports,
            _ => &[],
        }
    }

    /// Register work the worker must not be terminated before
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = WorkerResult<()>> + Send + 'static,
    {
        self.wait_until_shared(work.boxed().shared());
    }

    /// Register already-shared work
    pub fn wait_until_shared(&self, work: LifetimeFuture) {
        self.pending.lock().push(work);
    }

    /// Number of registrations not yet drained by `settle`
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drive all registered work to completion
    ///
    /// Work is polled concurrently, since registered futures may depend on
    /// each other. Work registered while settling is picked up too. Returns
    /// the first failure after everything has finished.
    pub async fn settle(&self) -> WorkerResult<()> {
        let mut first_error: Option<WorkerError> = None;
        loop {
            let batch: Vec<LifetimeFuture> = std::mem::take(&mut *self.pending.lock());
            if batch.is_empty() {
                break;
            }
            for result in join_all(batch).await {
                if let Err(err) = result
                    && first_error.is_none()
                {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Register `work` with the event and return a handle to its result
///
/// The handle and the event share one execution of the work; awaiting
/// either drives it.
pub fn extend_lifetime<T, F>(event: &ExtendableEvent, work: F) -> Shared<BoxFuture<'static, WorkerResult<T>>>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = WorkerResult<T>> + Send + 'static,
{
    let shared = work.boxed().shared();
    let tracked = shared.clone();
    event.wait_until(async move { tracked.await.map(|_| ()) });
    shared
}
