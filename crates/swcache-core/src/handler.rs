//! Request handlers
//!
//! Anything that can answer an intercepted request implements
//! [`RouteHandler`]: strategies, bound precache handlers, default and catch
//! handlers registered on a router, and plain closures via [`handler_fn`].

use crate::{
    error::{WorkerError, WorkerResult},
    event::ExtendableEvent,
    http::{Request, Response},
};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use url::Url;

/// Arguments passed to a [`RouteHandler`]
#[derive(Debug, Clone)]
pub struct RouteHandlerOptions {
    pub url: Url,
    pub request: Request,
    pub event: Arc<ExtendableEvent>,
    /// Data produced by the route's matcher
    pub params: Option<Value>,
    /// Set when the handler is invoked as a catch handler
    pub error: Option<WorkerError>,
}

impl RouteHandlerOptions {
    pub fn new(request: Request, event: Arc<ExtendableEvent>) -> Self {
        Self {
            url: request.url.clone(),
            request,
            event,
            params: None,
            error: None,
        }
    }

    pub fn with_params(mut self, params: Option<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_error(mut self, error: WorkerError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Produces a response for a request
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn handle(self: Arc<Self>, options: RouteHandlerOptions) -> WorkerResult<Response>;
}

/// A [`RouteHandler`] backed by a closure
pub struct FnRouteHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> RouteHandler for FnRouteHandler<F>
where
    F: Fn(RouteHandlerOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkerResult<Response>> + Send + 'static,
{
    async fn handle(self: Arc<Self>, options: RouteHandlerOptions) -> WorkerResult<Response> {
        (self.handler)(options).await
    }
}

/// Wrap a closure returning a future as a shared handler
pub fn handler_fn<F, Fut>(handler: F) -> Arc<dyn RouteHandler>
where
    F: Fn(RouteHandlerOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkerResult<Response>> + Send + 'static,
{
    Arc::new(FnRouteHandler { handler })
}

#[cfg(test)]
#[allow(clippy::panic)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_fn_receives_options() {
        let handler = handler_fn(|options: RouteHandlerOptions| async move {
            let body = format!(
                "{} {}",
                options.url.path(),
                options.params.map(|p| p.to_string()).unwrap_or_default()
            );
            Ok(Response::ok(body))
        });

        let request = Request::get("https://example.com/page").unwrap();
        let event = Arc::new(ExtendableEvent::fetch(request.clone()));
        let options = RouteHandlerOptions::new(request, event)
            .with_params(Some(serde_json::json!({"id": 1})));

        let response = handler.handle(options).await.unwrap();
        assert_eq!(response.body, "/page {\"id\":1}");
    }
}
