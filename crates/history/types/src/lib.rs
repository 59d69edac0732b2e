#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod address;
pub use address::{OperatorId, ValidatorAddress};

mod cursor;
pub use cursor::{Cursor, Page};

mod history;
pub use history::{HistoryEntry, SlotOutcome, SlotStatus};

mod operator;
pub use operator::{Operator, OperatorPatch, SocialPlatform, normalize_address};

mod stats;
pub use stats::{Distribution, NetworkStatsSnapshot};

mod validator;
pub use validator::{PeerInfo, Validator, ValidatorPatch, ValidatorStatsUpdate};

/// Returns the current unix time in seconds.
///
/// Falls back to `0` if the system clock is set before the unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
