//! Table layouts used by the repositories.

use crate::{IndexSchema, TableSchema};
use valwatch_types::SocialPlatform;

/// Index of validators by owning operator.
pub const VALIDATORS_BY_OPERATOR: &str = "by_operator";

/// Index of operators by wallet address.
pub const OPERATORS_BY_ADDRESS: &str = "by_address";

/// Validator records, keyed by address.
pub const VALIDATORS: TableSchema = TableSchema {
    name: "validators",
    partition_key: "address",
    sort_key: None,
    indexes: &[IndexSchema { name: VALIDATORS_BY_OPERATOR, partition_key: "operator_id" }],
    ttl: None,
};

/// Operator records, keyed by identity id.
pub const OPERATORS: TableSchema = TableSchema {
    name: "operators",
    partition_key: "id",
    sort_key: None,
    indexes: &[
        IndexSchema { name: OPERATORS_BY_ADDRESS, partition_key: "address" },
        IndexSchema { name: "by_discord", partition_key: "discord" },
        IndexSchema { name: "by_twitter", partition_key: "twitter" },
        IndexSchema { name: "by_telegram", partition_key: "telegram" },
    ],
    ttl: None,
};

/// History entries, keyed by `(validator, slot)`.
pub const HISTORY: TableSchema = TableSchema {
    name: "validator_history",
    partition_key: "validator",
    sort_key: Some("slot"),
    indexes: &[],
    ttl: None,
};

/// Network stats snapshots, keyed by `(network, epoch)`.
pub const NETWORK_STATS: TableSchema = TableSchema {
    name: "network_stats",
    partition_key: "network",
    sort_key: Some("epoch"),
    indexes: &[],
    ttl: Some("expires_at"),
};

/// Returns the operator index for handles on `platform`.
pub const fn social_index(platform: SocialPlatform) -> &'static str {
    match platform {
        SocialPlatform::Discord => "by_discord",
        SocialPlatform::Twitter => "by_twitter",
        SocialPlatform::Telegram => "by_telegram",
    }
}
