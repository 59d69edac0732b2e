//! Identifier newtypes.

use derive_more::{Deref, Display};
use serde::{Deserialize, Serialize};

/// The address of a validator.
///
/// Addresses compare case-insensitively, so the inner value is normalized to lowercase
/// (and trimmed) on every construction path, including deserialization.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deref, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub struct ValidatorAddress(String);

impl ValidatorAddress {
    /// Returns the normalized address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ValidatorAddress {
    fn from(value: String) -> Self {
        Self(value.trim().to_ascii_lowercase())
    }
}

impl From<&str> for ValidatorAddress {
    fn from(value: &str) -> Self {
        Self(value.trim().to_ascii_lowercase())
    }
}

impl From<ValidatorAddress> for String {
    fn from(value: ValidatorAddress) -> Self {
        value.0
    }
}

/// The external identity id of an operator.
///
/// Unlike [`ValidatorAddress`], identity ids are compared verbatim.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deref, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    /// Creates a new [`OperatorId`].
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperatorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
