//! The correlation engine: one symmetric RPC peer over one transport.
//!
//! Outgoing calls are recorded in a pending table keyed by a fresh token and
//! removed exactly once, when the matching response arrives or when the
//! channel fails. Incoming requests are answered concurrently by the
//! peer's [`RequestHandler`].

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::error::{ApplicationError, ChannelFailure, InvalidMessageError, RpcError, RpcResult};
use crate::handler::RequestHandler;
use crate::message::Message;
use crate::transport::{MessageSink, MessageSource, Transport, TransportEvent};

/// Protocol errors buffered for [`RpcPeer::take_protocol_errors`] before new
/// ones are dropped (they are always logged).
const PROTOCOL_ERROR_BACKLOG: usize = 64;

type Settle = oneshot::Sender<RpcResult<Value>>;

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<String, Settle>,
    failure: Option<ChannelFailure>,
}

struct Shared {
    label: String,
    sink: Box<dyn MessageSink>,
    handler: Arc<dyn RequestHandler>,
    pending: Mutex<PendingCalls>,
    closed: watch::Sender<Option<ChannelFailure>>,
    protocol_errors: mpsc::Sender<InvalidMessageError>,
}

/// A symmetric RPC endpoint.
///
/// Any number of [`call`](Self::call)s may be in flight at once; each
/// settles independently of the others, matched strictly by token.
pub struct RpcPeer {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    protocol_errors: Option<mpsc::Receiver<InvalidMessageError>>,
}

impl RpcPeer {
    /// Start a peer over `transport`, answering inbound requests with
    /// `handler`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(transport: impl Transport, handler: Arc<dyn RequestHandler>) -> Self {
        Self::with_label(transport, handler, "peer")
    }

    /// Like [`new`](Self::new), with a label used in log records.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_label(
        transport: impl Transport,
        handler: Arc<dyn RequestHandler>,
        label: impl Into<String>,
    ) -> Self {
        let (sink, source) = transport.split();
        let (closed, _) = watch::channel(None);
        let (errors_tx, errors_rx) = mpsc::channel(PROTOCOL_ERROR_BACKLOG);
        let shared = Arc::new(Shared {
            label: label.into(),
            sink,
            handler,
            pending: Mutex::new(PendingCalls::default()),
            closed,
            protocol_errors: errors_tx,
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), source));
        Self {
            shared,
            reader,
            protocol_errors: Some(errors_rx),
        }
    }

    /// Send a request and wait for the matching response.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Application`] if the other peer's handler failed.
    /// - [`RpcError::ChannelFailed`] if the channel is or becomes unusable
    ///   before the response arrives.
    /// - [`RpcError::Protocol`] if the other peer answered with a malformed
    ///   frame carrying this call's token.
    pub async fn call(&self, payload: Value) -> RpcResult<Value> {
        let (tx, rx) = oneshot::channel();
        let token = self.shared.register(tx)?;

        let frame = Message::request(token.clone(), payload).into_value();
        if let Err(failure) = self.shared.sink.send(frame) {
            self.shared.lock_pending().calls.remove(&token);
            return Err(failure.into());
        }
        trace!(peer = %self.shared.label, %token, "request sent");

        rx.await
            .unwrap_or_else(|_| Err(ChannelFailure::engine_stopped().into()))
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.lock_pending().calls.len()
    }

    /// The failure that closed the channel, if it has closed.
    #[must_use]
    pub fn failure(&self) -> Option<ChannelFailure> {
        self.shared.lock_pending().failure.clone()
    }

    /// Whether the channel has failed or been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.failure().is_some()
    }

    /// Wait until the channel fails or is closed.
    pub async fn closed(&self) -> ChannelFailure {
        let mut rx = self.shared.closed.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(failure) => failure.clone().unwrap_or_else(ChannelFailure::engine_stopped),
            Err(_) => ChannelFailure::engine_stopped(),
        }
    }

    /// Close the channel from this side.
    ///
    /// Pending calls are rejected with [`ChannelFailure::closed_locally`] and
    /// the other peer observes end-of-stream.
    pub fn close(&self) {
        self.shared.sink.close();
        self.shared.fail_all(ChannelFailure::closed_locally());
    }

    /// Take the stream of protocol errors this peer detects.
    ///
    /// Returns `None` if already taken.
    pub fn take_protocol_errors(&mut self) -> Option<mpsc::Receiver<InvalidMessageError>> {
        self.protocol_errors.take()
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcPeer")
            .field("label", &self.shared.label)
            .field("pending_calls", &self.pending_calls())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn read_loop(shared: Arc<Shared>, mut source: Box<dyn MessageSource>) {
    loop {
        match source.next_event().await {
            TransportEvent::Message(frame) => shared.dispatch(&frame),
            TransportEvent::Failed(failure) => {
                shared.fail_all(failure);
                return;
            },
        }
    }
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new pending call under a token no other pending call uses.
    fn register(&self, settle: Settle) -> Result<String, ChannelFailure> {
        let mut pending = self.lock_pending();
        if let Some(failure) = &pending.failure {
            return Err(failure.clone());
        }
        let token = loop {
            let candidate = Uuid::new_v4().to_string();
            if !pending.calls.contains_key(&candidate) {
                break candidate;
            }
        };
        pending.calls.insert(token.clone(), settle);
        Ok(token)
    }

    fn dispatch(self: &Arc<Self>, frame: &Value) {
        match Message::from_value(frame) {
            Ok(Message::Request { token, payload }) => {
                trace!(peer = %self.label, %token, "request received");
                tokio::spawn(Arc::clone(self).answer(token, payload));
            },
            Ok(Message::Response { token, result }) => {
                trace!(peer = %self.label, %token, "response received");
                self.settle(token, result.map_err(RpcError::from));
            },
            Err(error) => {
                let token = frame.get("token").and_then(Value::as_str);
                self.protocol_violation(error, token);
            },
        }
    }

    async fn answer(self: Arc<Self>, token: String, payload: Value) {
        let outcome = AssertUnwindSafe(self.handler.handle(payload))
            .catch_unwind()
            .await;
        let result = outcome.unwrap_or_else(|_| {
            error!(peer = %self.label, %token, "request handler panicked");
            Err(ApplicationError::new("request handler panicked"))
        });
        if let Err(e) = &result {
            debug!(peer = %self.label, %token, error = %e, "request handler failed");
        }

        if let Err(failure) = self.sink.send(Message::response(token, result).into_value()) {
            debug!(peer = %self.label, %failure, "dropping response; channel is gone");
        }
    }

    fn settle(&self, token: String, result: RpcResult<Value>) {
        let entry = {
            let mut pending = self.lock_pending();
            pending
                .calls
                .remove(&token)
                .ok_or(pending.failure.is_some())
        };
        match entry {
            Ok(settle) => {
                if settle.send(result).is_err() {
                    debug!(peer = %self.label, %token, "caller stopped waiting before the response arrived");
                }
            },
            Err(true) => {
                debug!(peer = %self.label, %token, "ignoring response received after channel failure");
            },
            Err(false) => {
                self.protocol_violation(InvalidMessageError::InvalidToken { token }, None);
            },
        }
    }

    /// Log a protocol error, reject the call it belongs to (if any), and
    /// publish it.
    fn protocol_violation(&self, error: InvalidMessageError, token: Option<&str>) {
        error!(peer = %self.label, reason = error.reason(), %error, "invalid message received");

        if let Some(token) = token {
            let entry = self.lock_pending().calls.remove(token);
            if let Some(settle) = entry {
                let _ = settle.send(Err(RpcError::Protocol(error.clone())));
            }
        }
        if self.protocol_errors.try_send(error).is_err() {
            trace!(peer = %self.label, "protocol error backlog full or unobserved");
        }
    }

    /// Reject every pending call with `failure`. Only the first failure
    /// counts; later ones are ignored.
    fn fail_all(&self, failure: ChannelFailure) {
        let drained: Vec<Settle> = {
            let mut pending = self.lock_pending();
            if pending.failure.is_some() {
                return;
            }
            pending.failure = Some(failure.clone());
            pending.calls.drain().map(|(_, settle)| settle).collect()
        };
        self.closed.send_replace(Some(failure.clone()));

        if drained.is_empty() {
            debug!(peer = %self.label, %failure, "channel closed");
        } else {
            warn!(
                peer = %self.label,
                pending = drained.len(),
                %failure,
                "channel failed; rejecting pending calls"
            );
        }
        for settle in drained {
            let _ = settle.send(Err(RpcError::ChannelFailed(failure.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Barrier;

    use super::*;
    use crate::handler::{Unhandled, handler_fn};
    use crate::transport::ChannelTransport;

    /// The far end of a channel, driven by hand.
    struct RawEnd {
        sink: Box<dyn MessageSink>,
        source: Box<dyn MessageSource>,
    }

    impl RawEnd {
        async fn next_request(&mut self) -> (String, Value) {
            match self.source.next_event().await {
                TransportEvent::Message(frame) => match Message::from_value(&frame).unwrap() {
                    Message::Request { token, payload } => (token, payload),
                    other => panic!("expected a request, got {other:?}"),
                },
                TransportEvent::Failed(failure) => panic!("channel failed: {failure}"),
            }
        }

        fn respond(&self, token: &str, payload: Value) {
            self.sink
                .send(Message::response(token, Ok(payload)).into_value())
                .unwrap();
        }

        fn send_raw(&self, frame: Value) {
            self.sink.send(frame).unwrap();
        }
    }

    fn peer_with_raw_end() -> (RpcPeer, RawEnd) {
        let (ours, theirs) = ChannelTransport::pair();
        let peer = RpcPeer::with_label(ours, Arc::new(Unhandled), "test");
        let (sink, source) = theirs.split();
        (peer, RawEnd { sink, source })
    }

    fn echo_pair() -> (RpcPeer, RpcPeer) {
        let (a, b) = ChannelTransport::pair();
        let host = RpcPeer::with_label(a, Arc::new(Unhandled), "host");
        let worker = RpcPeer::with_label(
            b,
            handler_fn(|payload| async move { Ok(json!({ "echo": payload })) }),
            "worker",
        );
        (host, worker)
    }

    #[tokio::test]
    async fn call_resolves_with_the_handler_result() {
        let (host, _worker) = echo_pair();
        for payload in [
            json!(null),
            json!(42),
            json!("text"),
            json!([1, "two", {"three": 3}]),
            json!({"type": "install", "version": "1.2.3", "directory": "/opt/x"}),
        ] {
            let result = host.call(payload.clone()).await.unwrap();
            assert_eq!(result, json!({ "echo": payload }));
        }
        assert_eq!(host.pending_calls(), 0);
    }

    #[tokio::test]
    async fn responses_in_reverse_order_settle_the_right_calls() {
        let (peer, mut raw) = peer_with_raw_end();

        let calls = async {
            tokio::join!(
                peer.call(json!(1)),
                peer.call(json!(2)),
                peer.call(json!(3)),
            )
        };
        let responder = async {
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(raw.next_request().await);
            }
            for (token, payload) in requests.iter().rev() {
                raw.respond(token, json!({ "answer": payload }));
            }
        };

        let ((first, second, third), ()) = tokio::join!(calls, responder);
        assert_eq!(first.unwrap(), json!({"answer": 1}));
        assert_eq!(second.unwrap(), json!({"answer": 2}));
        assert_eq!(third.unwrap(), json!({"answer": 3}));
        assert_eq!(peer.pending_calls(), 0);
    }

    #[tokio::test]
    async fn channel_failure_rejects_every_pending_call() {
        let (peer, mut raw) = peer_with_raw_end();

        let calls = async {
            tokio::join!(
                peer.call(json!("a")),
                peer.call(json!("b")),
                peer.call(json!("c")),
            )
        };
        let killer = async move {
            for _ in 0..3 {
                raw.next_request().await;
            }
            drop(raw);
        };

        let ((a, b, c), ()) = tokio::join!(calls, killer);
        for result in [a, b, c] {
            assert_eq!(
                result,
                Err(RpcError::ChannelFailed(ChannelFailure::peer_closed()))
            );
        }
        assert_eq!(peer.pending_calls(), 0);
        assert!(peer.is_closed());

        let late = peer.call(json!("after")).await;
        assert!(matches!(late, Err(RpcError::ChannelFailed(_))));
        assert_eq!(peer.pending_calls(), 0);
    }

    #[tokio::test]
    async fn oversized_frame_rejects_every_pending_call() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        use crate::transport::StdioTransport;

        let (ours, theirs) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(ours);
        let transport = StdioTransport::new(read, write).with_max_frame_len(256);
        let peer = RpcPeer::with_label(transport, Arc::new(Unhandled), "test");
        let (their_read, mut their_write) = tokio::io::split(theirs);

        let flood = async move {
            let mut lines = BufReader::new(their_read).lines();
            for _ in 0..2 {
                lines.next_line().await.unwrap();
            }
            their_write.write_all(&[b'{'; 1024]).await.unwrap();
            their_write
        };

        let ((a, b), _their_write) =
            tokio::join!(async { tokio::join!(peer.call(json!(1)), peer.call(json!(2))) }, flood);
        for result in [a, b] {
            assert_eq!(
                result,
                Err(RpcError::ChannelFailed(ChannelFailure::frame_too_large(256)))
            );
        }
        assert_eq!(peer.pending_calls(), 0);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn responses_after_close_are_ignored() {
        let (mut peer, mut raw) = peer_with_raw_end();
        let mut errors = peer.take_protocol_errors().unwrap();

        let (call, token) = tokio::join!(peer.call(json!("slow")), async {
            let (token, _) = raw.next_request().await;
            peer.close();
            token
        });
        assert_eq!(
            call,
            Err(RpcError::ChannelFailed(ChannelFailure::closed_locally()))
        );

        raw.respond(&token, json!("too late"));
        raw.send_raw(json!({"token": "marker"}));

        assert_eq!(
            errors.recv().await,
            Some(InvalidMessageError::MemberMissing { name: "type" })
        );
        assert_eq!(peer.pending_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_token_is_a_protocol_error_that_spares_other_calls() {
        let (mut peer, mut raw) = peer_with_raw_end();
        let mut errors = peer.take_protocol_errors().unwrap();
        assert!(peer.take_protocol_errors().is_none());

        let responder = async {
            let (token, _) = raw.next_request().await;
            raw.respond("no-such-token", json!("stray"));
            let error = errors.recv().await.unwrap();
            assert_eq!(
                error,
                InvalidMessageError::InvalidToken {
                    token: "no-such-token".into(),
                }
            );
            assert_eq!(peer.pending_calls(), 1);
            raw.respond(&token, json!("ok"));
        };

        let (result, ()) = tokio::join!(peer.call(json!("real")), responder);
        assert_eq!(result.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn malformed_frame_rejects_only_the_call_it_names() {
        let (peer, mut raw) = peer_with_raw_end();

        let responder = async {
            let (bad, _) = raw.next_request().await;
            let (good, _) = raw.next_request().await;
            raw.send_raw(json!({"type": "reply", "token": bad}));
            raw.respond(&good, json!("fine"));
        };

        let ((bad, good), ()) = tokio::join!(
            async { tokio::join!(peer.call(json!(1)), peer.call(json!(2))) },
            responder
        );
        assert_eq!(
            bad,
            Err(RpcError::Protocol(InvalidMessageError::InvalidType {
                kind: "reply".into(),
            }))
        );
        assert_eq!(good.unwrap(), json!("fine"));
    }

    #[tokio::test]
    async fn unhandled_requests_reject_and_leave_no_pending_calls() {
        let (a, b) = ChannelTransport::pair();
        let host = RpcPeer::new(a, Arc::new(Unhandled));
        let _worker = RpcPeer::new(b, Arc::new(Unhandled));

        let result = host.call(json!({"type": "properties"})).await;
        assert_eq!(result, Err(RpcError::Application(ApplicationError::unhandled())));
        assert_eq!(host.pending_calls(), 0);
    }

    #[tokio::test]
    async fn handler_errors_reach_the_caller() {
        let (a, b) = ChannelTransport::pair();
        let host = RpcPeer::new(a, Arc::new(Unhandled));
        let _worker = RpcPeer::new(
            b,
            handler_fn(|_| async { Err(ApplicationError::new("no such version")) }),
        );

        let result = host.call(json!({})).await;
        assert_eq!(
            result,
            Err(RpcError::Application(ApplicationError::new("no such version")))
        );
    }

    #[tokio::test]
    async fn inbound_requests_are_handled_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let (a, b) = ChannelTransport::pair();
        let host = RpcPeer::new(a, Arc::new(Unhandled));
        let _worker = RpcPeer::new(
            b,
            handler_fn(move |payload| {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                    Ok(payload)
                }
            }),
        );

        let both = async { tokio::join!(host.call(json!(1)), host.call(json!(2))) };
        let (one, two) = tokio::time::timeout(Duration::from_secs(5), both)
            .await
            .expect("handlers were serialized");
        assert_eq!(one.unwrap(), json!(1));
        assert_eq!(two.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn either_side_can_initiate() {
        let (a, b) = ChannelTransport::pair();
        let left = RpcPeer::new(a, handler_fn(|_| async { Ok(json!("from left")) }));
        let right = RpcPeer::new(b, handler_fn(|_| async { Ok(json!("from right")) }));

        assert_eq!(left.call(json!(null)).await.unwrap(), json!("from right"));
        assert_eq!(right.call(json!(null)).await.unwrap(), json!("from left"));
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_application_error() {
        let (a, b) = ChannelTransport::pair();
        let host = RpcPeer::new(a, Arc::new(Unhandled));
        let _worker = RpcPeer::new(
            b,
            handler_fn(|payload| async move {
                if payload.is_null() {
                    panic!("handler bug");
                }
                Ok(payload)
            }),
        );

        let result = host.call(Value::Null).await;
        assert_eq!(
            result,
            Err(RpcError::Application(ApplicationError::new(
                "request handler panicked"
            )))
        );
        assert_eq!(host.call(json!(5)).await.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn failed_send_removes_the_pending_entry() {
        let (ours, theirs) = ChannelTransport::pair();
        let peer = RpcPeer::new(ours, Arc::new(Unhandled));
        let (_their_sink, their_source) = theirs.split();
        drop(their_source);

        let result = peer.call(json!("nobody listens")).await;
        assert_eq!(
            result,
            Err(RpcError::ChannelFailed(ChannelFailure::peer_closed()))
        );
        assert_eq!(peer.pending_calls(), 0);
        assert!(!peer.is_closed());
    }

    #[tokio::test]
    async fn closed_resolves_when_the_other_peer_goes_away() {
        let (host, worker) = echo_pair();
        drop(host);
        let failure = tokio::time::timeout(Duration::from_secs(5), worker.closed())
            .await
            .unwrap();
        assert_eq!(failure, ChannelFailure::peer_closed());
        assert!(worker.is_closed());
    }
}
