//! Plugin request and response shapes.
//!
//! | Request payload | Response payload |
//! |---|---|
//! | `{"type": "properties"}` | `{"target": string}` |
//! | `{"type": "install", "version": string, "directory": string}` | `{name: path, ...}` |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use evm_core::PathSafeString;
use evm_rpc::ApplicationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PluginError, PluginResult};

/// A request the host sends to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginRequest {
    /// Ask the plugin to describe itself.
    Properties,
    /// Install `version` into `directory`.
    Install {
        /// Version to install.
        version: PathSafeString,
        /// Target directory; the plugin writes nothing outside it.
        directory: PathBuf,
    },
}

impl PluginRequest {
    /// Name used in logs and errors.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::Install { .. } => "install",
        }
    }

    /// Parse a request payload received by a plugin.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplicationError`] naming the first problem, including
    /// `unrecognized type` for request types this protocol does not define.
    pub fn from_payload(payload: &Value) -> Result<Self, ApplicationError> {
        let object = payload
            .as_object()
            .ok_or_else(|| invalid_request(format!("message is not an object: {payload}")))?;
        match string_property(object, "type")? {
            "properties" => Ok(Self::Properties),
            "install" => {
                let version = string_property(object, "version")?;
                let version = PathSafeString::new(version)
                    .map_err(|e| invalid_request(format!("property \"version\" is invalid: {e}")))?;
                let directory = string_property(object, "directory")?;
                Ok(Self::Install {
                    version,
                    directory: PathBuf::from(directory),
                })
            },
            other => Err(invalid_request(format!("unrecognized type \"{other}\""))),
        }
    }
}

fn invalid_request(detail: impl std::fmt::Display) -> ApplicationError {
    ApplicationError::new(format!("invalid request; {detail}"))
}

fn string_property<'a>(object: &'a Map<String, Value>, name: &str) -> Result<&'a str, ApplicationError> {
    match object.get(name) {
        None | Some(Value::Null) => Err(invalid_request(format!("property \"{name}\" is missing"))),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(invalid_request(format!(
            "property \"{name}\" is not a string: {other}"
        ))),
    }
}

/// A plugin's self-description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginProperties {
    /// The platform or tool the plugin installs for (e.g. `linux-x64`).
    pub target: String,
}

impl PluginProperties {
    /// Validate a `properties` response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidResponse`] naming the missing or
    /// malformed field.
    pub fn from_response(value: Value) -> PluginResult<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(PluginError::InvalidResponse(format!(
                    "properties response is not an object: {other}"
                )));
            },
        };
        match object.remove("target") {
            Some(Value::String(target)) => Ok(Self { target }),
            None | Some(Value::Null) => Err(PluginError::InvalidResponse(
                "properties response is missing field `target`".into(),
            )),
            Some(other) => Err(PluginError::InvalidResponse(format!(
                "properties field `target` is not a string: {other}"
            ))),
        }
    }
}

/// Executables produced by an install: name to installed path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallArtifacts(BTreeMap<String, PathBuf>);

impl InstallArtifacts {
    /// An empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one installed executable.
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.0.insert(name.into(), path.into());
    }

    /// Path of the named executable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.0.get(name).map(PathBuf::as_path)
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.0.iter().map(|(name, path)| (name.as_str(), path.as_path()))
    }

    /// Number of executables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate an `install` response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidResponse`] if the response is not an
    /// object or an entry's path is not a string.
    pub fn from_response(value: Value) -> PluginResult<Self> {
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(PluginError::InvalidResponse(format!(
                    "install response is not an object: {other}"
                )));
            },
        };
        object
            .into_iter()
            .map(|(name, path)| match path {
                Value::String(path) => Ok((name, PathBuf::from(path))),
                other => Err(PluginError::InvalidResponse(format!(
                    "install entry `{name}` is not a path string: {other}"
                ))),
            })
            .collect::<PluginResult<BTreeMap<_, _>>>()
            .map(Self)
    }
}

impl<N: Into<String>, P: Into<PathBuf>> FromIterator<(N, P)> for InstallArtifacts {
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, path)| (name.into(), path.into()))
                .collect(),
        )
    }
}
