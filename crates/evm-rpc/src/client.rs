//! Host side of a host/worker pair.

use std::sync::Arc;

use serde_json::Value;
use tokio::process::Child;
use tokio::sync::mpsc;

use crate::error::{ChannelFailure, InvalidMessageError, RpcResult};
use crate::handler::{RequestHandler, Unhandled};
use crate::peer::RpcPeer;
use crate::transport::{StdioTransport, Transport};

/// The host's connection to one worker.
///
/// Requests the worker sends back to the host go to the injected handler;
/// without one they fail with "handler was not given".
#[derive(Debug)]
pub struct WorkerClient {
    peer: RpcPeer,
}

impl WorkerClient {
    /// Connect over `transport` without a handler for worker-initiated
    /// requests.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_handler(transport, Arc::new(Unhandled))
    }

    /// Connect over `transport`, answering worker-initiated requests with
    /// `handler`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_handler(transport: impl Transport, handler: Arc<dyn RequestHandler>) -> Self {
        Self::labelled(transport, handler, "host")
    }

    /// Connect over `transport` with a log label naming the worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn labelled(
        transport: impl Transport,
        handler: Arc<dyn RequestHandler>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            peer: RpcPeer::with_label(transport, handler, label),
        }
    }

    /// Connect to a spawned worker over its piped stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelFailure`] if the child's stdin or stdout is not
    /// piped.
    pub fn from_child(
        child: &mut Child,
        handler: Arc<dyn RequestHandler>,
        label: impl Into<String>,
    ) -> Result<Self, ChannelFailure> {
        let transport = StdioTransport::from_child(child)?;
        Ok(Self::labelled(transport, handler, label))
    }

    /// Send a request to the worker and wait for its response.
    ///
    /// # Errors
    ///
    /// See [`RpcPeer::call`].
    pub async fn request(&self, payload: Value) -> RpcResult<Value> {
        self.peer.call(payload).await
    }

    /// Number of requests waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.peer.pending_calls()
    }

    /// The failure that closed the channel, if it has closed.
    #[must_use]
    pub fn failure(&self) -> Option<ChannelFailure> {
        self.peer.failure()
    }

    /// Wait until the channel to the worker fails or is closed.
    pub async fn closed(&self) -> ChannelFailure {
        self.peer.closed().await
    }

    /// Close the channel; the worker sees end-of-stream on its input.
    pub fn close(&self) {
        self.peer.close();
    }

    /// Take the stream of protocol errors detected on this connection.
    pub fn take_protocol_errors(&mut self) -> Option<mpsc::Receiver<InvalidMessageError>> {
        self.peer.take_protocol_errors()
    }
}
