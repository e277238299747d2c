//! Handlers for requests initiated by the other peer.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApplicationError;

/// Answers requests sent by the other peer.
///
/// Invocations are not serialized: the peer may run several at once.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the response payload for one request.
    async fn handle(&self, payload: Value) -> Result<Value, ApplicationError>;
}

/// Rejects every request with [`ApplicationError::unhandled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Unhandled;

#[async_trait]
impl RequestHandler for Unhandled {
    async fn handle(&self, _payload: Value) -> Result<Value, ApplicationError> {
        Err(ApplicationError::unhandled())
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApplicationError>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> Result<Value, ApplicationError> {
        (self.0)(payload).await
    }
}

/// Wrap an async closure as a [`RequestHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApplicationError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
