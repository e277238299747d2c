//! Worker side of a host/worker pair.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ChannelFailure, RpcResult};
use crate::handler::{RequestHandler, Unhandled};
use crate::peer::RpcPeer;
use crate::transport::{StdioTransport, Transport};

/// A worker's connection to the host that spawned it.
///
/// The handler is supplied at construction; there is no process-wide
/// registration.
#[derive(Debug)]
pub struct WorkerServer {
    peer: RpcPeer,
}

impl WorkerServer {
    /// Serve requests arriving over `transport` with `handler`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(transport: impl Transport, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            peer: RpcPeer::with_label(transport, handler, "worker"),
        }
    }

    /// A server with no handler: every request fails with
    /// "handler was not given".
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn without_handler(transport: impl Transport) -> Self {
        Self::new(transport, Arc::new(Unhandled))
    }

    /// Serve requests arriving on this process's stdin, answering on stdout.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn stdio(handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(StdioTransport::stdio(), handler)
    }

    /// Send a request to the host and wait for its response.
    ///
    /// # Errors
    ///
    /// See [`RpcPeer::call`].
    pub async fn request(&self, payload: Value) -> RpcResult<Value> {
        self.peer.call(payload).await
    }

    /// Serve until the host closes the channel, returning why it closed.
    pub async fn run(self) -> ChannelFailure {
        self.peer.closed().await
    }
}
