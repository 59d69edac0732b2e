//! Per-slot history entries.

use crate::ValidatorAddress;
use serde::{Deserialize, Serialize};

/// The outcome of a validator's duty at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// The validator attested in this slot.
    Attested,
    /// The validator proposed the block for this slot.
    Proposed,
    /// The validator missed its attestation.
    Missed,
    /// The validator was the proposer but no block was produced.
    MissedProposal,
}

/// A `(slot, status)` pair as reported by the chain observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotOutcome {
    /// The slot number.
    pub slot: u64,
    /// The outcome at that slot.
    pub status: SlotStatus,
}

impl SlotOutcome {
    /// Creates a new [`SlotOutcome`].
    pub const fn new(slot: u64, status: SlotStatus) -> Self {
        Self { slot, status }
    }
}

/// A stored history entry, identified by `(validator, slot)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The validator the entry belongs to.
    pub validator: ValidatorAddress,
    /// The slot number.
    pub slot: u64,
    /// The recorded outcome.
    pub status: SlotStatus,
    /// Unix time (seconds) at which the entry was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_at: Option<u64>,
}

impl HistoryEntry {
    /// Builds an entry for `validator` from an observed outcome.
    pub fn from_outcome(
        validator: ValidatorAddress,
        outcome: SlotOutcome,
        inserted_at: Option<u64>,
    ) -> Self {
        Self { validator, slot: outcome.slot, status: outcome.status, inserted_at }
    }

    /// Returns the `(slot, status)` pair of this entry.
    pub const fn outcome(&self) -> SlotOutcome {
        SlotOutcome { slot: self.slot, status: self.status }
    }
}
