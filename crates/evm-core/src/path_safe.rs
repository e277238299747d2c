//! Validated strings for identifiers, versions, and location names.

use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a string is rejected as a [`PathSafeString`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathSafeError {
    /// The string is empty.
    #[error("value must not be empty")]
    Empty,

    /// The string starts with `-` and could be mistaken for a flag.
    #[error("{0:?} must not start with -")]
    LeadingHyphen(String),

    /// The string contains a character outside `[A-Za-z0-9_.\- ]`.
    #[error("{value:?} must not contain {character:?}; only A-Z, a-z, 0-9, '_', '.', '-' and ' ' are allowed")]
    InvalidCharacter {
        /// The rejected value.
        value: String,
        /// The first offending character.
        character: char,
    },

    /// The string is `.` or `..`.
    #[error("{0:?} refers to a directory, not a name")]
    DotSegment(String),
}

/// A non-empty string that is safe to use as a single path segment or a
/// command-line argument value.
///
/// Accepted strings do not start with `-`, are not `.` or `..`, and contain
/// only ASCII letters, digits, `_`, `.`, `-`, and space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PathSafeString(String);

impl<'de> Deserialize<'de> for PathSafeString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PathSafeString {
    /// Validate and wrap a string.
    ///
    /// # Errors
    ///
    /// Returns the first rule the value violates.
    pub fn new(value: impl Into<String>) -> Result<Self, PathSafeError> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Check a string without allocating a `PathSafeString`.
    #[must_use]
    pub fn is_path_safe(value: &str) -> bool {
        Self::validate(value).is_ok()
    }

    /// The validated string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    fn validate(value: &str) -> Result<(), PathSafeError> {
        if value.is_empty() {
            return Err(PathSafeError::Empty);
        }
        if value.starts_with('-') {
            return Err(PathSafeError::LeadingHyphen(value.to_string()));
        }
        if let Some(character) = value.chars().find(|c| !is_allowed(*c)) {
            return Err(PathSafeError::InvalidCharacter {
                value: value.to_string(),
                character,
            });
        }
        if value == "." || value == ".." {
            return Err(PathSafeError::DotSegment(value.to_string()));
        }
        Ok(())
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ')
}

impl FromStr for PathSafeString {
    type Err = PathSafeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PathSafeString {
    type Error = PathSafeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for PathSafeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for PathSafeString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PathSafeString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for PathSafeString {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}
