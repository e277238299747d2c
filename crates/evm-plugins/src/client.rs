//! Typed host-side facade over one plugin worker.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use evm_core::PathSafeString;
use evm_rpc::{ChannelFailure, WorkerClient};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::protocol::{InstallArtifacts, PluginProperties, PluginRequest};

struct ClientInner {
    name: String,
    rpc: WorkerClient,
    timeout: Option<Duration>,
}

/// Sends `properties` and `install` requests to one plugin and validates the
/// responses.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct PluginClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("name", &self.inner.name)
            .field("timeout", &self.inner.timeout)
            .field("pending_requests", &self.inner.rpc.pending_requests())
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    /// Wrap a connected [`WorkerClient`]. `timeout` bounds each request;
    /// `None` waits indefinitely.
    #[must_use]
    pub fn new(name: impl Into<String>, rpc: WorkerClient, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                name: name.into(),
                rpc,
                timeout,
            }),
        }
    }

    /// Ask the plugin to describe itself.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidResponse`] if the response lacks a string
    /// `target`, or the underlying RPC / timeout error.
    pub async fn properties(&self) -> PluginResult<PluginProperties> {
        let response = self.send(&PluginRequest::Properties).await?;
        PluginProperties::from_response(response)
    }

    /// Ask the plugin to install `version` into `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidResponse`] if the response is not a
    /// name-to-path mapping, or the underlying RPC / timeout error.
    pub async fn install(&self, version: &PathSafeString, directory: &Path) -> PluginResult<InstallArtifacts> {
        let request = PluginRequest::Install {
            version: version.clone(),
            directory: directory.to_path_buf(),
        };
        let response = self.send(&request).await?;
        InstallArtifacts::from_response(response)
    }

    async fn send(&self, request: &PluginRequest) -> PluginResult<Value> {
        let operation = request.operation();
        let payload = serde_json::to_value(request)?;
        debug!(plugin = %self.inner.name, operation, "Sending plugin request");

        let call = self.inner.rpc.request(payload);
        let Some(timeout) = self.inner.timeout else {
            return Ok(call.await?);
        };
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(
                    plugin = %self.inner.name,
                    operation,
                    timeout_ms = timeout.as_millis(),
                    "Plugin request timed out"
                );
                Err(PluginError::Timeout { operation, timeout })
            },
        }
    }

    /// The plugin's name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of requests waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.rpc.pending_requests()
    }

    /// Whether the channel to the plugin has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.rpc.failure().is_some()
    }

    /// The failure that closed the channel, if it has closed.
    #[must_use]
    pub fn failure(&self) -> Option<ChannelFailure> {
        self.inner.rpc.failure()
    }

    /// Wait until the channel to the plugin fails or is closed.
    pub async fn closed(&self) -> ChannelFailure {
        self.inner.rpc.closed().await
    }

    /// Close the channel; the plugin sees end-of-stream on its input.
    pub fn close(&self) {
        self.inner.rpc.close();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use evm_rpc::{ApplicationError, ChannelTransport, RpcError, WorkerServer, handler_fn};
    use serde_json::json;

    use super::*;
    use crate::guest::{self, Plugin};

    struct NodePlugin;

    #[async_trait]
    impl Plugin for NodePlugin {
        async fn properties(&self) -> Result<PluginProperties, ApplicationError> {
            Ok(PluginProperties {
                target: "linux-x64".into(),
            })
        }

        async fn install(
            &self,
            _version: PathSafeString,
            directory: PathBuf,
        ) -> Result<InstallArtifacts, ApplicationError> {
            let mut artifacts = InstallArtifacts::new();
            artifacts.insert("node", directory.join("bin").join("node"));
            Ok(artifacts)
        }
    }

    fn connect(server_end: impl FnOnce(ChannelTransport) -> WorkerServer) -> (PluginClient, WorkerServer) {
        let (host_end, worker_end) = ChannelTransport::pair();
        let server = server_end(worker_end);
        let client = PluginClient::new("node", WorkerClient::new(host_end), None);
        (client, server)
    }

    #[tokio::test]
    async fn properties_round_trip() {
        let (client, _server) = connect(|t| guest::serve(t, NodePlugin));
        let properties = client.properties().await.unwrap();
        assert_eq!(properties.target, "linux-x64");
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn install_round_trip() {
        let (client, _server) = connect(|t| guest::serve(t, NodePlugin));
        let version = PathSafeString::new("1.2.3").unwrap();
        let artifacts = client.install(&version, Path::new("/opt/x")).await.unwrap();
        assert_eq!(artifacts.get("node"), Some(Path::new("/opt/x/bin/node")));
    }

    #[tokio::test]
    async fn malformed_properties_response_names_field() {
        let (client, _server) = connect(|t| WorkerServer::new(t, handler_fn(|_| async { Ok(json!({"platform": "x"})) })));
        let err = client.properties().await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidResponse(_)));
        assert!(err.to_string().contains("`target`"));
    }

    #[tokio::test]
    async fn malformed_install_response_is_rejected() {
        let (client, _server) = connect(|t| WorkerServer::new(t, handler_fn(|_| async { Ok(json!(["node"])) })));
        let version = PathSafeString::new("1.2.3").unwrap();
        let err = client.install(&version, Path::new("/opt/x")).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unhandled_worker_rejects_and_leaves_table_empty() {
        let (client, _server) = connect(WorkerServer::without_handler);
        let err = client.properties().await.unwrap_err();
        let app = match err {
            PluginError::Rpc(RpcError::Application(app)) => app,
            other => panic!("expected application error, got {other:?}"),
        };
        assert!(app.message().contains("unhandled request"));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn default_plugin_methods_reject() {
        struct Empty;
        impl Plugin for Empty {}

        let (client, _server) = connect(|t| guest::serve(t, Empty));
        let err = client.properties().await.unwrap_err();
        assert!(err.to_string().contains("plugin does not provide properties"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_pending_entry() {
        let (host_end, worker_end) = ChannelTransport::pair();
        let _server = WorkerServer::new(
            worker_end,
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!({"target": "late"}))
            }),
        );
        let client = PluginClient::new("slow", WorkerClient::new(host_end), Some(Duration::from_secs(1)));

        let err = client.properties().await.unwrap_err();
        assert!(matches!(err, PluginError::Timeout { operation: "properties", .. }));
        assert_eq!(client.pending_requests(), 1);
    }

    #[tokio::test]
    async fn channel_failure_surfaces_as_rpc_error() {
        let (host_end, worker_end) = ChannelTransport::pair();
        drop(worker_end);
        let client = PluginClient::new("gone", WorkerClient::new(host_end), None);
        let err = client.properties().await.unwrap_err();
        assert!(matches!(err, PluginError::Rpc(RpcError::ChannelFailed(_))));
        client.closed().await;
        assert!(client.is_closed());
    }
}
