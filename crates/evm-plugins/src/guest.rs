//! Worker-side plugin SDK.
//!
//! A plugin executable implements [`Plugin`] and hands it to
//! [`serve_stdio`]:
//!
//! ```no_run
//! use evm_plugins::guest::{self, Plugin};
//! use evm_plugins::PluginProperties;
//! use evm_rpc::ApplicationError;
//!
//! struct Node;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Node {
//!     async fn properties(&self) -> Result<PluginProperties, ApplicationError> {
//!         Ok(PluginProperties { target: "linux-x64".into() })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     guest::serve_stdio(Node).await;
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use evm_core::PathSafeString;
use evm_rpc::{ApplicationError, ChannelFailure, RequestHandler, Transport, WorkerServer};
use serde_json::Value;
use tracing::debug;

use crate::protocol::{InstallArtifacts, PluginProperties, PluginRequest};

/// Operations a plugin provides. Unimplemented operations reject.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Describe the plugin.
    async fn properties(&self) -> Result<PluginProperties, ApplicationError> {
        Err(ApplicationError::new("plugin does not provide properties"))
    }

    /// Install `version` into `directory`, returning the installed
    /// executables.
    async fn install(
        &self,
        version: PathSafeString,
        directory: PathBuf,
    ) -> Result<InstallArtifacts, ApplicationError> {
        let _ = (version, directory);
        Err(ApplicationError::new("plugin does not provide install"))
    }
}

/// Adapts a [`Plugin`] to a [`RequestHandler`], validating each payload.
#[derive(Debug)]
pub struct PluginDispatcher<P> {
    plugin: P,
}

impl<P: Plugin> PluginDispatcher<P> {
    /// Dispatch requests to `plugin`.
    pub fn new(plugin: P) -> Self {
        Self { plugin }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, ApplicationError> {
    serde_json::to_value(value).map_err(|e| ApplicationError::new(format!("failed to encode response: {e}")))
}

#[async_trait]
impl<P: Plugin> RequestHandler for PluginDispatcher<P> {
    async fn handle(&self, payload: Value) -> Result<Value, ApplicationError> {
        let request = PluginRequest::from_payload(&payload)?;
        debug!(operation = request.operation(), "Handling plugin request");
        match request {
            PluginRequest::Properties => encode(&self.plugin.properties().await?),
            PluginRequest::Install { version, directory } => {
                encode(&self.plugin.install(version, directory).await?)
            },
        }
    }
}

/// Serve `plugin` over `transport`. Keep the returned server alive for as
/// long as requests should be answered.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn serve<P: Plugin>(transport: impl Transport, plugin: P) -> WorkerServer {
    WorkerServer::new(transport, Arc::new(PluginDispatcher::new(plugin)))
}

/// Serve `plugin` over this process's stdio until the host closes the
/// channel.
///
/// Logs must go to stderr; stdout carries the protocol frames.
pub async fn serve_stdio<P: Plugin>(plugin: P) -> ChannelFailure {
    let failure = WorkerServer::stdio(Arc::new(PluginDispatcher::new(plugin))).run().await;
    debug!(reason = failure.reason(), "Host channel closed");
    failure
}
