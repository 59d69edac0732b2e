//! Metrics for the reconciliation engine.

use std::time::Duration;

/// Container for the reconciliation metric names and helpers.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of reconciled epochs.
    pub const EPOCHS_RECONCILED_TOTAL: &'static str = "valwatch_reconcile_epochs_total";
    /// Identifier for the counter of validators that failed to reconcile.
    pub const VALIDATORS_FAILED_TOTAL: &'static str = "valwatch_reconcile_validators_failed_total";
    /// Identifier for the counter of reorg repairs.
    pub const REORG_REPAIRS_TOTAL: &'static str = "valwatch_reconcile_reorg_repairs_total";
    /// Identifier for the histogram of epoch reconciliation latency.
    pub const EPOCH_DURATION_SECONDS: &'static str = "valwatch_reconcile_epoch_duration_seconds";
    /// Identifier for the gauge of the last reconciled epoch.
    pub const LAST_EPOCH: &'static str = "valwatch_reconcile_last_epoch";

    /// Describes and zeroes the reconciliation metrics, then the storage ones.
    pub fn init() {
        Self::describe();
        Self::zero();
        valwatch_storage::Metrics::init();
    }

    fn describe() {
        ::metrics::describe_counter!(
            Self::EPOCHS_RECONCILED_TOTAL,
            ::metrics::Unit::Count,
            "Total number of epochs reconciled into history",
        );
        ::metrics::describe_counter!(
            Self::VALIDATORS_FAILED_TOTAL,
            ::metrics::Unit::Count,
            "Total number of validators whose epoch outcomes failed to reconcile",
        );
        ::metrics::describe_counter!(
            Self::REORG_REPAIRS_TOTAL,
            ::metrics::Unit::Count,
            "Total number of validator histories repaired after a reorg",
        );
        ::metrics::describe_histogram!(
            Self::EPOCH_DURATION_SECONDS,
            ::metrics::Unit::Seconds,
            "Latency for reconciling a single epoch",
        );
        ::metrics::describe_gauge!(
            Self::LAST_EPOCH,
            ::metrics::Unit::Count,
            "The last epoch reconciled into history",
        );
    }

    fn zero() {
        ::metrics::counter!(Self::EPOCHS_RECONCILED_TOTAL).increment(0);
        ::metrics::counter!(Self::VALIDATORS_FAILED_TOTAL).increment(0);
        ::metrics::counter!(Self::REORG_REPAIRS_TOTAL).increment(0);
        ::metrics::histogram!(Self::EPOCH_DURATION_SECONDS).record(0.0);
        ::metrics::gauge!(Self::LAST_EPOCH).set(0.0);
    }

    pub(crate) fn record_epoch(epoch: u64, failed: usize, repaired: usize, elapsed: Duration) {
        ::metrics::counter!(Self::EPOCHS_RECONCILED_TOTAL).increment(1);
        ::metrics::counter!(Self::VALIDATORS_FAILED_TOTAL).increment(failed as u64);
        ::metrics::counter!(Self::REORG_REPAIRS_TOTAL).increment(repaired as u64);
        ::metrics::histogram!(Self::EPOCH_DURATION_SECONDS).record(elapsed.as_secs_f64());
        ::metrics::gauge!(Self::LAST_EPOCH).set(epoch as f64);
    }
}
