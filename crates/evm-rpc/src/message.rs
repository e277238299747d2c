//! Wire frames exchanged between peers.

use serde_json::{Map, Value, json};

use crate::error::{ApplicationError, InvalidMessageError};

const TYPE: &str = "type";
const TOKEN: &str = "token";
const PAYLOAD: &str = "payload";
const ERROR: &str = "error";

/// A validated frame.
///
/// Responses carry either a `payload` or, when the handler failed, an
/// `error` string.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call from the other peer.
    Request {
        /// Correlation token chosen by the caller.
        token: String,
        /// Request body.
        payload: Value,
    },
    /// The answer to one of our calls.
    Response {
        /// Token of the request being answered.
        token: String,
        /// Handler result, or the handler's failure.
        result: Result<Value, ApplicationError>,
    },
}

impl Message {
    /// A request frame.
    #[must_use]
    pub fn request(token: impl Into<String>, payload: Value) -> Self {
        Self::Request {
            token: token.into(),
            payload,
        }
    }

    /// A response frame.
    #[must_use]
    pub fn response(token: impl Into<String>, result: Result<Value, ApplicationError>) -> Self {
        Self::Response {
            token: token.into(),
            result,
        }
    }

    /// The correlation token.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Request { token, .. } | Self::Response { token, .. } => token,
        }
    }

    /// Validate a raw frame.
    ///
    /// `type` is checked before `token`, and both before anything else.
    ///
    /// # Errors
    ///
    /// Returns an [`InvalidMessageError`] describing the first violation.
    pub fn from_value(value: &Value) -> Result<Self, InvalidMessageError> {
        let kind = string_member(value, TYPE)?;
        let token = string_member(value, TOKEN)?;
        let payload = value.get(PAYLOAD).cloned().unwrap_or(Value::Null);

        match kind {
            "request" => Ok(Self::request(token, payload)),
            "response" => {
                let result = match value.get(ERROR) {
                    None | Some(Value::Null) => Ok(payload),
                    Some(Value::String(message)) => Err(ApplicationError::new(message.clone())),
                    Some(other) => {
                        return Err(InvalidMessageError::MemberNotString {
                            name: ERROR,
                            value: other.clone(),
                        });
                    },
                };
                Ok(Self::response(token, result))
            },
            other => Err(InvalidMessageError::InvalidType {
                kind: other.to_string(),
            }),
        }
    }

    /// Encode as a raw frame.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Request { token, payload } => json!({
                TYPE: "request",
                TOKEN: token,
                PAYLOAD: payload,
            }),
            Self::Response { token, result } => {
                let mut frame = Map::new();
                frame.insert(TYPE.into(), Value::from("response"));
                frame.insert(TOKEN.into(), Value::from(token));
                match result {
                    Ok(payload) => {
                        frame.insert(PAYLOAD.into(), payload);
                    },
                    Err(error) => {
                        frame.insert(PAYLOAD.into(), Value::Null);
                        frame.insert(ERROR.into(), Value::from(error.message()));
                    },
                }
                Value::Object(frame)
            },
        }
    }
}

fn string_member<'a>(value: &'a Value, name: &'static str) -> Result<&'a str, InvalidMessageError> {
    match value.get(name) {
        None | Some(Value::Null) => Err(InvalidMessageError::MemberMissing { name }),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(InvalidMessageError::MemberNotString {
            name,
            value: other.clone(),
        }),
    }
}
