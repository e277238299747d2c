//! EVM RPC - symmetric request/response messaging over an untyped channel.
//!
//! Every frame is a JSON object `{"type": "request"|"response", "token", "payload"}`.
//! An [`RpcPeer`] assigns a fresh token to each outgoing request, matches
//! incoming responses to the waiting caller, and answers incoming requests
//! through a [`RequestHandler`]. Both ends of a host/worker pair are peers:
//!
//! - [`WorkerClient`] runs in the host and wraps a spawned worker.
//! - [`WorkerServer`] runs inside the worker and answers the host.
//!
//! # Example
//!
//! ```rust,no_run
//! use evm_rpc::{ChannelTransport, WorkerClient, WorkerServer, handler_fn};
//! use serde_json::json;
//!
//! # async fn demo() -> evm_rpc::RpcResult<()> {
//! let (host_end, worker_end) = ChannelTransport::pair();
//! let _server = WorkerServer::new(worker_end, handler_fn(|payload| async move { Ok(payload) }));
//! let client = WorkerClient::new(host_end);
//!
//! let echoed = client.request(json!({"ping": 1})).await?;
//! assert_eq!(echoed, json!({"ping": 1}));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod client;
mod error;
mod handler;
mod message;
mod peer;
mod server;
pub mod transport;

pub use client::WorkerClient;
pub use error::{ApplicationError, ChannelFailure, InvalidMessageError, RpcError, RpcResult};
pub use handler::{RequestHandler, Unhandled, handler_fn};
pub use message::Message;
pub use peer::RpcPeer;
pub use server::WorkerServer;
pub use transport::{ChannelTransport, StdioTransport, Transport};
