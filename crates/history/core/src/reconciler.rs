//! Applies one epoch of observer outcomes to storage.

use crate::{EpochReport, Metrics, ReconcileError, ValidatorOutcomes};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info, warn};
use valwatch_storage::{
    Backend, FanOut, NetworkStatsRepository, StorageConfig, StorageError, ValidatorRepository,
};
use valwatch_types::{
    SlotOutcome, SlotStatus, Validator, ValidatorAddress, ValidatorPatch, ValidatorStatsUpdate,
    unix_now,
};

/// Outcome of reconciling one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochSummary {
    /// The reconciled epoch.
    pub epoch: u64,
    /// Number of distinct validators in the report.
    pub validators: usize,
    /// Validators seen for the first time and registered as unclaimed.
    pub created: usize,
    /// Validators whose new outcomes were appended.
    pub updated: usize,
    /// Validators whose history was repaired after a reorg.
    pub repaired: usize,
    /// Validators already reconciled for this epoch.
    pub skipped: usize,
    /// History entries written.
    pub inserted: usize,
    /// Validators that failed, ordered by address. Their `last_synced_epoch` did not
    /// move, so reconciling the epoch again retries them.
    pub failed: Vec<ValidatorAddress>,
    /// The last slot of the epoch's network stats snapshot.
    pub last_slot: Option<u64>,
}

impl EpochSummary {
    /// Returns `true` if no validator failed, in which case the network stats snapshot
    /// was stored for the epoch.
    pub const fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What happened to a single validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Updated { inserted: usize },
    Repaired { inserted: usize },
}

/// Per-validator input of the apply phase.
#[derive(Debug)]
struct Work<'a> {
    validator: Validator,
    report: &'a ValidatorOutcomes,
    latest_slot: Option<u64>,
}

/// Reconciles [`EpochReport`]s into validator records, their history and the network
/// stats snapshot.
///
/// Reconciling an epoch twice is harmless: validators whose `last_synced_epoch` already
/// covers the epoch are skipped, and counters only include slots past the validator's
/// `last_counted_slot`. A validator's `last_synced_epoch` is written after its history,
/// so it marks the epoch as committed for that validator. Two reconcilers working on the
/// same validator at the same time are not excluded from each other.
#[derive(Debug, Clone)]
pub struct HistoryReconciler {
    validators: ValidatorRepository,
    stats: NetworkStatsRepository,
    fan_out: FanOut,
}

impl HistoryReconciler {
    /// Creates a new [`HistoryReconciler`] for `network`.
    pub fn new(
        backend: Arc<dyn Backend>,
        network: impl Into<String>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            validators: ValidatorRepository::new(backend.clone(), config),
            stats: NetworkStatsRepository::new(backend, network, config),
            fan_out: FanOut::new(config.fan_out.clone()),
        }
    }

    /// Returns the validator repository.
    pub const fn validators(&self) -> &ValidatorRepository {
        &self.validators
    }

    /// Returns the network stats repository.
    pub const fn stats(&self) -> &NetworkStatsRepository {
        &self.stats
    }

    /// Reconciles `report`.
    ///
    /// Per-validator failures are collected in [`EpochSummary::failed`], and the network
    /// stats snapshot is only stored once every validator went through. A validator whose
    /// history position cannot be read counts as failed. Only a failure to store the
    /// snapshot aborts the epoch.
    pub async fn reconcile_epoch(
        &self,
        report: &EpochReport,
    ) -> Result<EpochSummary, ReconcileError> {
        let started = Instant::now();
        let epoch = report.epoch;

        let mut reports: HashMap<ValidatorAddress, &ValidatorOutcomes> = HashMap::new();
        for outcomes in &report.validators {
            if reports.insert(outcomes.address.clone(), outcomes).is_some() {
                warn!(
                    target: "reconciler",
                    epoch,
                    validator = %outcomes.address,
                    "Duplicate validator in report, keeping the last one"
                );
            }
        }
        let mut summary = EpochSummary { epoch, validators: reports.len(), ..Default::default() };

        // Load every validator, registering the ones seen for the first time.
        let loaded = self
            .fan_out
            .run(reports.keys().cloned().collect(), |address| self.load_or_register(address))
            .await;

        let mut pending = Vec::new();
        for (address, loaded) in loaded {
            let Some((validator, created)) = loaded else {
                summary.failed.push(address);
                continue;
            };
            summary.created += usize::from(created);
            if validator.last_synced_epoch.is_some_and(|synced| synced >= epoch) {
                debug!(target: "reconciler", epoch, validator = %address, "Already reconciled");
                summary.skipped += 1;
            } else {
                pending.push(validator);
            }
        }

        // Resolve where each validator's history currently ends.
        let addresses: Vec<ValidatorAddress> =
            pending.iter().map(|validator| validator.address.clone()).collect();
        let latest = self.validators.history().batch_latest_slot(&addresses).await;

        let mut work: HashMap<ValidatorAddress, Work<'_>> = HashMap::new();
        for validator in pending {
            let address = validator.address.clone();
            let Some(latest_slot) = latest.get(&address).copied().flatten() else {
                warn!(
                    target: "reconciler",
                    epoch,
                    validator = %address,
                    "History position unknown, deferring validator"
                );
                summary.failed.push(address);
                continue;
            };
            if let Some(report) = reports.get(&address).copied() {
                work.insert(address, Work { validator, report, latest_slot });
            }
        }

        let applied = self
            .fan_out
            .run(work.keys().cloned().collect(), |address| {
                let work = &work[&address];
                async move { self.apply(epoch, work).await }
            })
            .await;

        for (address, applied) in applied {
            match applied {
                Some(Applied::Updated { inserted }) => {
                    summary.updated += 1;
                    summary.inserted += inserted;
                }
                Some(Applied::Repaired { inserted }) => {
                    summary.repaired += 1;
                    summary.inserted += inserted;
                }
                None => summary.failed.push(address),
            }
        }
        summary.failed.sort();

        summary.last_slot = match report.last_slot() {
            Some(slot) => Some(slot),
            None => self.stats.current().await?.and_then(|snapshot| snapshot.last_synced_slot),
        };
        if summary.is_complete() {
            let snapshot = self.stats.compute(epoch, summary.last_slot).await?;
            self.stats.upsert(&snapshot).await?;
        } else {
            warn!(
                target: "reconciler",
                epoch,
                failed = summary.failed.len(),
                "Epoch incomplete, network stats snapshot not advanced"
            );
        }

        Metrics::record_epoch(epoch, summary.failed.len(), summary.repaired, started.elapsed());
        info!(
            target: "reconciler",
            epoch,
            validators = summary.validators,
            created = summary.created,
            updated = summary.updated,
            repaired = summary.repaired,
            skipped = summary.skipped,
            inserted = summary.inserted,
            "Reconciled epoch"
        );
        Ok(summary)
    }

    /// Reads a validator, creating it as unclaimed if it is not known yet.
    ///
    /// Returns the validator and whether it was created by this call.
    async fn load_or_register(
        &self,
        address: ValidatorAddress,
    ) -> Result<(Validator, bool), StorageError> {
        if let Some(validator) = self.validators.get(&address).await? {
            return Ok((validator, false));
        }

        let validator = Validator::new(address, unix_now());
        if self.validators.create(&validator).await? {
            debug!(target: "reconciler", validator = %validator.address, "Registered validator");
            return Ok((validator, true));
        }

        // Registered concurrently since the read above.
        self.validators
            .get(&validator.address)
            .await?
            .map(|validator| (validator, false))
            .ok_or(StorageError::PreconditionFailed)
    }

    async fn apply(&self, epoch: u64, work: &Work<'_>) -> Result<Applied, StorageError> {
        let address = &work.validator.address;
        let fresh = newer_outcomes(&work.report.outcomes, work.latest_slot);
        let counted = newer_outcomes(&work.report.outcomes, work.validator.last_counted_slot);
        let patch = stats_patch(&work.validator, work.report, &counted, epoch);

        let Some(from_slot) = work.report.reorg_from else {
            let inserted = fresh.len();
            self.update_stats(address, ValidatorStatsUpdate { patch, history: fresh }).await?;
            return Ok(Applied::Updated { inserted });
        };

        let repair = self
            .validators
            .history()
            .overwrite_from_slot(address, from_slot, &work.report.outcomes)
            .await?;
        let before_reorg: Vec<SlotOutcome> =
            fresh.into_iter().filter(|outcome| outcome.slot < from_slot).collect();
        let inserted = repair.inserted + before_reorg.len();
        self.update_stats(address, ValidatorStatsUpdate { patch, history: before_reorg }).await?;

        info!(
            target: "reconciler",
            epoch,
            validator = %address,
            from_slot,
            deleted = repair.deleted,
            inserted,
            "Repaired validator history"
        );
        Ok(Applied::Repaired { inserted })
    }

    async fn update_stats(
        &self,
        address: &ValidatorAddress,
        update: ValidatorStatsUpdate,
    ) -> Result<(), StorageError> {
        if self.validators.update_stats(address, &update).await? {
            Ok(())
        } else {
            Err(StorageError::PreconditionFailed)
        }
    }
}

/// Outcomes strictly after `latest_slot`, one per slot (the last one reported wins),
/// in slot order.
fn newer_outcomes(outcomes: &[SlotOutcome], latest_slot: Option<u64>) -> Vec<SlotOutcome> {
    outcomes
        .iter()
        .filter(|outcome| latest_slot.is_none_or(|latest| outcome.slot > latest))
        .map(|outcome| (outcome.slot, outcome.status))
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(slot, status)| SlotOutcome::new(slot, status))
        .collect()
}

/// Builds the stats patch for `validator` after counting `fresh` outcomes in `epoch`.
///
/// `fresh` must only hold slots past the validator's `last_counted_slot`. Counters are
/// cumulative; slots replaced by a reorg are not subtracted.
fn stats_patch(
    validator: &Validator,
    report: &ValidatorOutcomes,
    fresh: &[SlotOutcome],
    epoch: u64,
) -> ValidatorPatch {
    let last_with = |status: SlotStatus, previous: Option<u64>| {
        fresh
            .iter()
            .filter(|outcome| outcome.status == status)
            .map(|outcome| outcome.slot)
            .max()
            .map(|slot| previous.map_or(slot, |previous| previous.max(slot)))
    };
    let count = |status: SlotStatus| {
        fresh.iter().filter(|outcome| outcome.status == status).count() as u64
    };

    ValidatorPatch {
        peer_id: report.peer_id.clone(),
        last_attested_slot: last_with(SlotStatus::Attested, validator.last_attested_slot),
        last_proposed_slot: last_with(SlotStatus::Proposed, validator.last_proposed_slot),
        missed_attestations: Some(validator.missed_attestations + count(SlotStatus::Missed)),
        missed_proposals: Some(validator.missed_proposals + count(SlotStatus::MissedProposal)),
        total_slots: Some(validator.total_slots + fresh.len() as u64),
        last_synced_epoch: Some(epoch),
        last_counted_slot: fresh
            .iter()
            .map(|outcome| outcome.slot)
            .max()
            .max(validator.last_counted_slot),
        peer: report.peer.clone(),
    }
}
