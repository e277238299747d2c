//! Plugin error types.

use std::time::Duration;

use evm_rpc::RpcError;

/// Errors from plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A plugin locator could not be parsed.
    #[error("invalid plugin locator {locator:?}: {message}")]
    InvalidLocator {
        /// The locator as given.
        locator: String,
        /// Parse error message.
        message: String,
    },

    /// The locator names something that cannot be run as a local process.
    #[error("plugin locator {0} cannot be spawned: only paths and file: URLs are supported")]
    UnsupportedLocator(String),

    /// A capability grant is malformed.
    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    /// A worker for this locator is already running.
    #[error("plugin already running: {0}")]
    AlreadyRunning(String),

    /// No worker is running for this locator.
    #[error("plugin not running: {0}")]
    NotRunning(String),

    /// The worker process could not be started.
    #[error("failed to spawn plugin {locator}: {message}")]
    SpawnFailed {
        /// The plugin locator.
        locator: String,
        /// Failure reason.
        message: String,
    },

    /// The OS sandbox could not be configured.
    #[error("sandbox error: {0}")]
    SandboxError(String),

    /// The plugin answered with a payload of the wrong shape.
    #[error("plugin responded with invalid message: {0}")]
    InvalidResponse(String),

    /// The plugin did not answer within the configured deadline.
    #[error("plugin {operation} request timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The RPC call failed (protocol error, channel failure, or an error
    /// reported by the plugin).
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A request could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
