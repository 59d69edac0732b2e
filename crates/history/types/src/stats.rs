//! Network-wide stats snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count of validators per label (country, client, ISP, ...).
pub type Distribution = BTreeMap<String, u64>;

/// Aggregate network stats computed once per epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatsSnapshot {
    /// The network the snapshot belongs to.
    pub network: String,
    /// The epoch the snapshot was computed at.
    pub epoch: u64,
    /// Number of known validators.
    pub total_validators: u64,
    /// Number of validators owned by an operator.
    pub claimed_validators: u64,
    /// Number of validators whose peer reported as synced.
    pub synced_peers: u64,
    /// Validators per country.
    #[serde(default)]
    pub countries: Distribution,
    /// Validators per client software.
    #[serde(default)]
    pub clients: Distribution,
    /// Validators per ISP.
    #[serde(default)]
    pub isps: Distribution,
    /// The last slot synced into history when the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_slot: Option<u64>,
    /// Unix time (seconds) of creation.
    pub created_at: u64,
    /// Unix time (seconds) after which the backend may reclaim the snapshot.
    pub expires_at: u64,
}
