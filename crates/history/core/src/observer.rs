//! The chain observer collaborator.

use crate::ObserverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use valwatch_types::{PeerInfo, SlotOutcome, ValidatorAddress};

/// What the chain observer saw for one validator during one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOutcomes {
    /// The validator.
    pub address: ValidatorAddress,
    /// Canonical `(slot, status)` outcomes.
    #[serde(default)]
    pub outcomes: Vec<SlotOutcome>,
    /// Set when a reorg replaced recorded history: everything from this slot onwards
    /// must be replaced by `outcomes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorg_from: Option<u64>,
    /// Peer-network id of the node running the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    /// Peer details, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerInfo>,
}

impl ValidatorOutcomes {
    /// Creates outcomes for `address` without reorg or peer information.
    pub fn new(address: impl Into<ValidatorAddress>, outcomes: Vec<SlotOutcome>) -> Self {
        Self { address: address.into(), outcomes, reorg_from: None, peer_id: None, peer: None }
    }

    /// Marks the outcomes as replacing history from `slot` onwards.
    pub const fn with_reorg_from(mut self, slot: u64) -> Self {
        self.reorg_from = Some(slot);
        self
    }

    /// Attaches peer details.
    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// Everything the chain observer saw during one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochReport {
    /// The epoch number.
    pub epoch: u64,
    /// Per-validator outcomes.
    #[serde(default)]
    pub validators: Vec<ValidatorOutcomes>,
}

impl EpochReport {
    /// Returns the highest slot reported for any validator.
    pub fn last_slot(&self) -> Option<u64> {
        self.validators
            .iter()
            .flat_map(|validator| validator.outcomes.iter().map(|outcome| outcome.slot))
            .max()
    }
}

/// Source of canonical validator outcomes, per epoch.
#[async_trait]
pub trait ChainObserver: Debug + Send + Sync {
    /// Returns the most recent epoch the observer can report on.
    async fn latest_epoch(&self) -> Result<u64, ObserverError>;

    /// Returns the report for `epoch`.
    async fn epoch_report(&self, epoch: u64) -> Result<EpochReport, ObserverError>;
}
