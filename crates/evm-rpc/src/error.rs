//! Error types for the RPC layer.

use serde_json::Value;
use thiserror::Error;

/// A malformed frame, or a response nobody is waiting for.
///
/// Always a defect in one of the two peers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMessageError {
    /// A required member is absent or `null`.
    #[error("message member `{name}` is missing")]
    MemberMissing {
        /// Member name.
        name: &'static str,
    },

    /// A member that must be a string has another JSON type.
    #[error("message member `{name}` is not a string: {value}")]
    MemberNotString {
        /// Member name.
        name: &'static str,
        /// The value found instead.
        value: Value,
    },

    /// `type` is neither `request` nor `response`.
    #[error("message type {kind:?} is neither `request` nor `response`")]
    InvalidType {
        /// The type found.
        kind: String,
    },

    /// A response token that matches no pending request.
    #[error("no request has the token {token:?}")]
    InvalidToken {
        /// The unmatched token.
        token: String,
    },
}

impl InvalidMessageError {
    /// Short machine-readable reason, used as a log field.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MemberMissing { .. } => "member_missing",
            Self::MemberNotString { .. } => "member_not_string",
            Self::InvalidType { .. } => "invalid_type",
            Self::InvalidToken { .. } => "invalid_token",
        }
    }
}

/// The channel to the peer is permanently unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ChannelFailure {
    reason: String,
}

impl ChannelFailure {
    /// A failure with a free-form reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The peer closed its end of the channel.
    #[must_use]
    pub fn peer_closed() -> Self {
        Self::new("peer closed the channel")
    }

    /// This side closed the channel.
    #[must_use]
    pub fn closed_locally() -> Self {
        Self::new("channel closed locally")
    }

    /// The peer sent a frame longer than `max` bytes.
    #[must_use]
    pub fn frame_too_large(max: usize) -> Self {
        Self::new(format!("inbound frame exceeds {max} bytes"))
    }

    /// The peer's message loop is no longer running.
    #[must_use]
    pub fn engine_stopped() -> Self {
        Self::new("rpc message loop stopped")
    }

    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A failure reported by the handler on the other side of a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApplicationError {
    message: String,
}

impl ApplicationError {
    /// An application error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error every request gets when the peer has no handler.
    #[must_use]
    pub fn unhandled() -> Self {
        Self::new("unhandled request; handler was not given")
    }

    /// The message as sent over the wire.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned from an RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The peer sent a malformed frame for this call.
    #[error("protocol error: {0}")]
    Protocol(#[from] InvalidMessageError),

    /// The channel failed before the call settled.
    #[error("channel failed: {0}")]
    ChannelFailed(#[from] ChannelFailure),

    /// The peer's handler rejected the request.
    #[error("{0}")]
    Application(#[from] ApplicationError),
}

/// Result type for RPC calls.
pub type RpcResult<T> = Result<T, RpcError>;
