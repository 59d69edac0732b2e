//! Engine configuration.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use valwatch_storage::StorageConfig;

/// Configuration of the reconciliation engine.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the observed network. Network stats are stored under it.
    pub network: String,
    /// Epoch to start from when no epoch has been reconciled yet.
    pub start_epoch: u64,
    /// How long the sync service idles once it has caught up with the observer.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Storage tunables.
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            start_epoch: 0,
            poll_interval: Duration::from_secs(12),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Parses a configuration from TOML.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads and parses the TOML configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
network = "holesky"
poll_interval_ms = 500

[storage]
page_size = 50
stats_retention_secs = 3600

[storage.batch]
max_chunk_size = 10
base_backoff_ms = 20

[storage.fan_out]
concurrency = 4
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network, "holesky");
        assert_eq!(config.start_epoch, 0);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.storage.page_size, 50);
        assert_eq!(config.storage.stats_retention, Duration::from_secs(3600));
        assert_eq!(config.storage.batch.max_chunk_size, 10);
        assert_eq!(config.storage.batch.base_backoff, Duration::from_millis(20));
        assert_eq!(config.storage.batch.max_retries, 5);
        assert_eq!(config.storage.fan_out.concurrency, 4);
        assert_eq!(config.storage.fan_out.group_pause, Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_types_are_rejected() {
        let err = Config::from_toml("poll_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
