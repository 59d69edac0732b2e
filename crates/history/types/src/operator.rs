//! Operator records.

use crate::OperatorId;
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};

/// A social platform an operator can link a handle for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    /// Discord.
    #[display("discord")]
    Discord,
    /// Twitter / X.
    #[display("twitter")]
    Twitter,
    /// Telegram.
    #[display("telegram")]
    Telegram,
}

impl SocialPlatform {
    /// The record attribute holding the handle for this platform.
    pub const fn attribute(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Twitter => "twitter",
            Self::Telegram => "telegram",
        }
    }
}

/// An operator record, keyed by its external identity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    /// The unique identity id.
    pub id: OperatorId,
    /// Wallet / contact address, lowercased. Unique when present.
    #[serde(
        default,
        deserialize_with = "deserialize_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub address: Option<String>,
    /// Display handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Discord handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
    /// Twitter handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    /// Telegram handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    /// Whether the operator has been approved.
    #[serde(default)]
    pub approved: bool,
    /// Whether the operator was ever penalized.
    #[serde(default)]
    pub penalized: bool,
    /// Unix time (seconds) of creation.
    pub created_at: u64,
    /// Unix time (seconds) of the last update.
    pub updated_at: u64,
}

impl Operator {
    /// Creates a new operator with no address or handles.
    pub const fn new(id: OperatorId, now: u64) -> Self {
        Self {
            id,
            address: None,
            handle: None,
            discord: None,
            twitter: None,
            telegram: None,
            approved: false,
            penalized: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the wallet address, lowercased.
    pub fn with_address(mut self, address: impl AsRef<str>) -> Self {
        self.address = Some(normalize_address(address.as_ref()));
        self
    }

    /// Returns the operator with its wallet address normalized.
    pub fn normalized(mut self) -> Self {
        self.address = self.address.as_deref().map(normalize_address);
        self
    }

    /// Sets the handle for a social platform.
    pub fn with_social(mut self, platform: SocialPlatform, handle: impl Into<String>) -> Self {
        let handle = Some(handle.into());
        match platform {
            SocialPlatform::Discord => self.discord = handle,
            SocialPlatform::Twitter => self.twitter = handle,
            SocialPlatform::Telegram => self.telegram = handle,
        }
        self
    }
}

/// Normalizes a wallet address for storage and lookup. Wallet addresses compare
/// case-insensitively.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

fn deserialize_address<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.as_deref().map(normalize_address))
}

/// The settable fields of an [`Operator`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorPatch {
    /// New wallet address.
    pub address: Option<String>,
    /// New display handle.
    pub handle: Option<String>,
    /// New Discord handle.
    pub discord: Option<String>,
    /// New Twitter handle.
    pub twitter: Option<String>,
    /// New Telegram handle.
    pub telegram: Option<String>,
    /// New approval flag.
    pub approved: Option<bool>,
    /// New penalized flag.
    pub penalized: Option<bool>,
}
