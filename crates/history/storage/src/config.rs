//! Tunables for batching, fan-out and pagination.

use crate::MAX_BATCH_WRITE_ITEMS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the [`BatchWriter`](crate::BatchWriter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per batch request. Clamped to [`MAX_BATCH_WRITE_ITEMS`].
    pub max_chunk_size: usize,
    /// Pause between consecutive chunks, even on success.
    #[serde(rename = "chunk_pause_ms", with = "duration_ms")]
    pub chunk_pause: Duration,
    /// First backoff delay after a throttled chunk. Doubles on every retry.
    #[serde(rename = "base_backoff_ms", with = "duration_ms")]
    pub base_backoff: Duration,
    /// Upper bound for a single backoff delay.
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Retries of a throttled chunk before giving up.
    pub max_retries: usize,
    /// Consecutive chunks that apply nothing before the batch gives up on the items the
    /// backend keeps leaving unprocessed.
    pub max_redrives: usize,
    /// Batches larger than this use smaller chunks and longer pauses.
    pub large_batch_threshold: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_BATCH_WRITE_ITEMS,
            chunk_pause: Duration::from_millis(50),
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_retries: 5,
            max_redrives: 10,
            large_batch_threshold: 500,
        }
    }
}

impl BatchConfig {
    /// Returns the configuration to use for a batch of `total` writes.
    ///
    /// Up to the threshold the configured values are used. Up to four times the threshold
    /// the chunk size is halved and the pause doubled; beyond that the chunk size is
    /// quartered and the pause quadrupled.
    pub fn scaled_for(&self, total: usize) -> Self {
        let threshold = self.large_batch_threshold.max(1);
        let shift = if total <= threshold {
            0
        } else if total <= threshold.saturating_mul(4) {
            1
        } else {
            2
        };
        let chunk = self.max_chunk_size.clamp(1, MAX_BATCH_WRITE_ITEMS);
        Self {
            max_chunk_size: (chunk >> shift).max(1),
            chunk_pause: self.chunk_pause * (1u32 << shift),
            ..self.clone()
        }
    }
}

/// Configuration of the [`FanOut`](crate::FanOut).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Maximum number of operations in flight at once.
    pub concurrency: usize,
    /// Pause between consecutive groups of operations.
    #[serde(rename = "group_pause_ms", with = "duration_ms")]
    pub group_pause: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self { concurrency: 10, group_pause: Duration::from_millis(100) }
    }
}

/// Storage layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Batch writer settings.
    pub batch: BatchConfig,
    /// Fan-out settings.
    pub fan_out: FanOutConfig,
    /// Page size for full scans and paginated queries.
    pub page_size: usize,
    /// How long network stats snapshots are retained.
    #[serde(rename = "stats_retention_secs", with = "duration_secs")]
    pub stats_retention: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            fan_out: FanOutConfig::default(),
            page_size: 100,
            stats_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
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

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::small(10, 25, 50)]
    #[case::at_threshold(500, 25, 50)]
    #[case::large(1_000, 12, 100)]
    #[case::huge(5_000, 6, 200)]
    fn test_scaled_for(#[case] total: usize, #[case] chunk: usize, #[case] pause_ms: u64) {
        let scaled = BatchConfig::default().scaled_for(total);
        assert_eq!(scaled.max_chunk_size, chunk);
        assert_eq!(scaled.chunk_pause, Duration::from_millis(pause_ms));
        assert_eq!(scaled.max_retries, 5);
    }

    #[test]
    fn test_chunk_size_clamped_to_backend_limit() {
        let config = BatchConfig { max_chunk_size: 100, ..Default::default() };
        assert_eq!(config.scaled_for(1).max_chunk_size, MAX_BATCH_WRITE_ITEMS);

        let config = BatchConfig { max_chunk_size: 0, ..Default::default() };
        assert_eq!(config.scaled_for(1).max_chunk_size, 1);
    }

    #[test]
    fn test_storage_config_from_json() {
        let config: StorageConfig = serde_json::from_str(
            r#"{ "page_size": 50, "batch": { "chunk_pause_ms": 10 }, "stats_retention_secs": 60 }"#,
        )
        .unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.batch.chunk_pause, Duration::from_millis(10));
        assert_eq!(config.batch.max_chunk_size, MAX_BATCH_WRITE_ITEMS);
        assert_eq!(config.stats_retention, Duration::from_secs(60));
        assert_eq!(config.fan_out, FanOutConfig::default());
    }
}
