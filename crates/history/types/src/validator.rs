//! Validator records and their partial-update patch.

use crate::{OperatorId, SlotOutcome, ValidatorAddress};
use serde::{Deserialize, Serialize};

/// Network-level information about the peer running a validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Country the peer geolocates to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// City the peer geolocates to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Internet service provider of the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    /// Client software name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Client software version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    /// Whether the peer reported itself as synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced: Option<bool>,
}

/// A validator record, keyed by its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// The unique validator address.
    pub address: ValidatorAddress,
    /// The owning operator. `None` means the validator is unclaimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<OperatorId>,
    /// Unix time (seconds) of creation.
    pub created_at: u64,
    /// Unix time (seconds) of the last update.
    pub updated_at: u64,
    /// Peer-network id of the node running this validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    // --- Performance, refreshed once per epoch ---
    /// Most recent slot with a successful attestation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attested_slot: Option<u64>,
    /// Most recent slot with a successful proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_proposed_slot: Option<u64>,
    /// Number of missed attestations observed.
    #[serde(default)]
    pub missed_attestations: u64,
    /// Number of missed proposals observed.
    #[serde(default)]
    pub missed_proposals: u64,
    /// Number of slots observed in total.
    #[serde(default)]
    pub total_slots: u64,
    /// The last epoch whose outcomes were reconciled into this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_epoch: Option<u64>,
    /// The highest slot whose outcome is included in the counters above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_counted_slot: Option<u64>,

    /// Peer / network details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerInfo>,
}

impl Validator {
    /// Creates a fresh, unclaimed validator with no performance data.
    pub const fn new(address: ValidatorAddress, now: u64) -> Self {
        Self {
            address,
            operator_id: None,
            created_at: now,
            updated_at: now,
            peer_id: None,
            last_attested_slot: None,
            last_proposed_slot: None,
            missed_attestations: 0,
            missed_proposals: 0,
            total_slots: 0,
            last_synced_epoch: None,
            last_counted_slot: None,
            peer: None,
        }
    }

    /// Returns `true` if an operator owns this validator.
    pub const fn is_claimed(&self) -> bool {
        self.operator_id.is_some()
    }
}

/// The settable performance and peer fields of a [`Validator`].
///
/// Only fields set to `Some` are written; everything else is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorPatch {
    /// New peer-network id.
    pub peer_id: Option<String>,
    /// New last attested slot.
    pub last_attested_slot: Option<u64>,
    /// New last proposed slot.
    pub last_proposed_slot: Option<u64>,
    /// New missed attestation count.
    pub missed_attestations: Option<u64>,
    /// New missed proposal count.
    pub missed_proposals: Option<u64>,
    /// New total observed slot count.
    pub total_slots: Option<u64>,
    /// New last synced epoch.
    pub last_synced_epoch: Option<u64>,
    /// New highest counted slot.
    pub last_counted_slot: Option<u64>,
    /// New peer details, replacing the previous ones as a whole.
    pub peer: Option<PeerInfo>,
}

/// A stats refresh for one validator.
///
/// The `history` payload is never stored on the validator record itself; it is routed to
/// the history store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorStatsUpdate {
    /// Fields to write on the validator record.
    pub patch: ValidatorPatch,
    /// History outcomes to append for the validator.
    pub history: Vec<SlotOutcome>,
}
