//! Metrics for the storage layer.

use std::time::Duration;

/// Container for the storage layer's metric names and helpers.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of batch chunks submitted.
    pub const BATCH_CHUNKS_TOTAL: &'static str = "valwatch_storage_batch_chunks_total";
    /// Identifier for the counter of throttled batch chunks.
    pub const BATCH_THROTTLED_TOTAL: &'static str = "valwatch_storage_batch_throttled_total";
    /// Identifier for the histogram of backoff delays.
    pub const BATCH_BACKOFF_SECONDS: &'static str = "valwatch_storage_batch_backoff_seconds";
    /// Identifier for the counter of items re-queued after being left unprocessed.
    pub const BATCH_REDRIVEN_ITEMS_TOTAL: &'static str =
        "valwatch_storage_batch_redriven_items_total";
    /// Identifier for the counter of failed fan-out operations.
    pub const FAN_OUT_FAILURES_TOTAL: &'static str = "valwatch_storage_fan_out_failures_total";

    /// Describes and zeroes the storage metrics.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        ::metrics::describe_counter!(
            Self::BATCH_CHUNKS_TOTAL,
            ::metrics::Unit::Count,
            "Total number of batch write chunks submitted",
        );
        ::metrics::describe_counter!(
            Self::BATCH_THROTTLED_TOTAL,
            ::metrics::Unit::Count,
            "Total number of batch write chunks throttled by the backend",
        );
        ::metrics::describe_histogram!(
            Self::BATCH_BACKOFF_SECONDS,
            ::metrics::Unit::Seconds,
            "Backoff delay applied after a throttled batch write",
        );
        ::metrics::describe_counter!(
            Self::BATCH_REDRIVEN_ITEMS_TOTAL,
            ::metrics::Unit::Count,
            "Total number of unprocessed batch items re-queued",
        );
        ::metrics::describe_counter!(
            Self::FAN_OUT_FAILURES_TOTAL,
            ::metrics::Unit::Count,
            "Total number of per-entity fan-out operations that failed",
        );
    }

    fn zero() {
        ::metrics::counter!(Self::BATCH_CHUNKS_TOTAL).increment(0);
        ::metrics::counter!(Self::BATCH_THROTTLED_TOTAL).increment(0);
        ::metrics::counter!(Self::BATCH_REDRIVEN_ITEMS_TOTAL).increment(0);
        ::metrics::counter!(Self::FAN_OUT_FAILURES_TOTAL).increment(0);
        ::metrics::histogram!(Self::BATCH_BACKOFF_SECONDS).record(0.0);
    }

    pub(crate) fn record_chunk(table: &'static str) {
        ::metrics::counter!(Self::BATCH_CHUNKS_TOTAL, "table" => table).increment(1);
    }

    pub(crate) fn record_throttle(table: &'static str, delay: Duration) {
        ::metrics::counter!(Self::BATCH_THROTTLED_TOTAL, "table" => table).increment(1);
        ::metrics::histogram!(Self::BATCH_BACKOFF_SECONDS, "table" => table)
            .record(delay.as_secs_f64());
    }

    pub(crate) fn record_redrive(table: &'static str, items: usize) {
        ::metrics::counter!(Self::BATCH_REDRIVEN_ITEMS_TOTAL, "table" => table)
            .increment(items as u64);
    }

    pub(crate) fn record_fan_out_failure() {
        ::metrics::counter!(Self::FAN_OUT_FAILURES_TOTAL).increment(1);
    }
}
