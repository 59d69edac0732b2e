//! Catch-up loop driving the reconciler.

use crate::{
    ChainObserver, Config, EpochSummary, HistoryReconciler, ObserverError, ReconcileError,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Follows a [`ChainObserver`], reconciling every epoch it reports.
///
/// Progress is not kept in memory: the service resumes after the epoch of the current
/// network stats snapshot, which the reconciler only writes once every validator of the
/// epoch went through.
#[derive(Debug)]
pub struct SyncService {
    observer: Arc<dyn ChainObserver>,
    reconciler: HistoryReconciler,
    start_epoch: u64,
    poll_interval: Duration,
}

impl SyncService {
    /// Creates a new [`SyncService`].
    pub const fn new(
        observer: Arc<dyn ChainObserver>,
        reconciler: HistoryReconciler,
        start_epoch: u64,
        poll_interval: Duration,
    ) -> Self {
        Self { observer, reconciler, start_epoch, poll_interval }
    }

    /// Creates a new [`SyncService`] from the engine [`Config`].
    pub fn from_config(
        observer: Arc<dyn ChainObserver>,
        reconciler: HistoryReconciler,
        config: &Config,
    ) -> Self {
        Self::new(observer, reconciler, config.start_epoch, config.poll_interval)
    }

    /// Returns the reconciler.
    pub const fn reconciler(&self) -> &HistoryReconciler {
        &self.reconciler
    }

    /// Returns the first epoch that has not been reconciled yet.
    pub async fn next_epoch(&self) -> Result<u64, ReconcileError> {
        let current = self.reconciler.stats().current().await?;
        Ok(current.map_or(self.start_epoch, |snapshot| {
            snapshot.epoch.saturating_add(1).max(self.start_epoch)
        }))
    }

    /// Reconciles every epoch from [`SyncService::next_epoch`] up to the observer's latest
    /// epoch, in order.
    ///
    /// Stops at the first epoch that cannot be fetched or reconciled, and after the first
    /// epoch with failed validators, whose summary is the last one returned. The next pass
    /// resumes from that epoch and retries the failed validators.
    pub async fn sync_to_head(&self) -> Result<Vec<EpochSummary>, ReconcileError> {
        let head = self.observer.latest_epoch().await?;
        let mut epoch = self.next_epoch().await?;
        let mut summaries = Vec::new();

        while epoch <= head {
            let report = self.observer.epoch_report(epoch).await.inspect_err(|err| {
                warn!(target: "sync_service", epoch, %err, "Failed to fetch epoch report");
            })?;
            if report.epoch != epoch {
                return Err(ObserverError::Unavailable(format!(
                    "requested epoch {epoch}, got a report for epoch {}",
                    report.epoch
                ))
                .into());
            }

            let summary = self.reconciler.reconcile_epoch(&report).await?;
            let complete = summary.is_complete();
            summaries.push(summary);
            if !complete {
                warn!(target: "sync_service", epoch, "Epoch incomplete, stopping the pass");
                break;
            }
            epoch += 1;
        }

        debug!(target: "sync_service", head, reconciled = summaries.len(), "Caught up");
        Ok(summaries)
    }

    /// Runs catch-up passes until `cancel` is triggered, idling for the poll interval
    /// between passes.
    ///
    /// A failed pass is logged and retried after the poll interval. Cancellation drops the
    /// pass in flight; writes it already issued stay applied.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            target: "sync_service",
            network = self.reconciler.stats().network(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Started sync service"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_to_head() => match result {
                    Ok(summaries) if !summaries.is_empty() => {
                        let last = summaries.last().map(|summary| summary.epoch);
                        info!(
                            target: "sync_service",
                            epochs = summaries.len(),
                            ?last,
                            "Synced epochs"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(target: "sync_service", %err, "Sync pass failed"),
                },
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(target: "sync_service", "Stopped sync service");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EpochReport, ValidatorOutcomes};
    use async_trait::async_trait;
    use mockall::{mock, predicate::eq};
    use valwatch_storage::{Backend, MemoryBackend, StorageConfig, test_utils::ScriptedBackend};
    use valwatch_types::{SlotOutcome, SlotStatus, ValidatorAddress};

    mock! {
        #[derive(Debug)]
        pub Observer {}

        #[async_trait]
        impl ChainObserver for Observer {
            async fn latest_epoch(&self) -> Result<u64, ObserverError>;
            async fn epoch_report(&self, epoch: u64) -> Result<EpochReport, ObserverError>;
        }
    }

    fn report(epoch: u64) -> EpochReport {
        let slot = epoch * 32;
        EpochReport {
            epoch,
            validators: vec![ValidatorOutcomes::new(
                "0xa",
                vec![SlotOutcome::new(slot, SlotStatus::Attested)],
            )],
        }
    }

    fn service(observer: MockObserver, start_epoch: u64) -> SyncService {
        service_on(Arc::new(MemoryBackend::new()), observer, start_epoch)
    }

    fn service_on(
        backend: Arc<dyn Backend>,
        observer: MockObserver,
        start_epoch: u64,
    ) -> SyncService {
        let mut config = StorageConfig::default();
        config.fan_out.group_pause = Duration::ZERO;
        config.batch.chunk_pause = Duration::ZERO;
        let reconciler = HistoryReconciler::new(backend, "mainnet", &config);
        SyncService::new(Arc::new(observer), reconciler, start_epoch, Duration::from_secs(12))
    }

    #[tokio::test]
    async fn test_sync_to_head_resumes_after_last_epoch() {
        let mut observer = MockObserver::new();
        observer.expect_latest_epoch().times(2).returning(|| Ok(3));
        observer.expect_epoch_report().times(4).returning(|epoch| Ok(report(epoch)));
        let service = service(observer, 0);

        let summaries = service.sync_to_head().await.unwrap();
        assert_eq!(summaries.iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(service.next_epoch().await.unwrap(), 4);

        assert!(service.sync_to_head().await.unwrap().is_empty());

        let validator =
            service.reconciler().validators().get(&"0xa".into()).await.unwrap().unwrap();
        assert_eq!(validator.total_slots, 4);
        assert_eq!(validator.last_synced_epoch, Some(3));
    }

    #[tokio::test]
    async fn test_failed_validator_is_repaired_by_the_next_pass() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_queries_for("0xb");
        let mut observer = MockObserver::new();
        observer.expect_latest_epoch().times(2).returning(|| Ok(1));
        observer.expect_epoch_report().with(eq(0)).times(2).returning(|epoch| {
            let mut report = report(epoch);
            report.validators.push(ValidatorOutcomes::new(
                "0xb",
                vec![SlotOutcome::new(epoch * 32, SlotStatus::Missed)],
            ));
            Ok(report)
        });
        observer.expect_epoch_report().with(eq(1)).times(1).returning(|epoch| {
            let mut report = report(epoch);
            report.validators.push(ValidatorOutcomes::new(
                "0xb",
                vec![SlotOutcome::new(epoch * 32, SlotStatus::Missed)],
            ));
            Ok(report)
        });
        let service = service_on(backend.clone(), observer, 0);

        let summaries = service.sync_to_head().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].failed, vec![ValidatorAddress::from("0xb")]);
        assert_eq!(service.next_epoch().await.unwrap(), 0);
        let validators = service.reconciler().validators();
        assert_eq!(validators.get(&"0xb".into()).await.unwrap().unwrap().last_synced_epoch, None);

        backend.recover();
        let summaries = service.sync_to_head().await.unwrap();
        assert_eq!(summaries.iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![0, 1]);
        assert!(summaries.iter().all(EpochSummary::is_complete));
        assert_eq!(summaries[0].skipped, 1);
        assert_eq!(service.next_epoch().await.unwrap(), 2);

        let a = validators.get(&"0xa".into()).await.unwrap().unwrap();
        assert_eq!(a.total_slots, 2);
        let b = validators.get(&"0xb".into()).await.unwrap().unwrap();
        assert_eq!(b.total_slots, 2);
        assert_eq!(b.missed_attestations, 2);
        assert_eq!(b.last_synced_epoch, Some(1));
        let history = validators.history().get_history(&"0xb".into(), 10, None).await.unwrap();
        assert_eq!(history.items.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_starts_at_configured_epoch() {
        let mut observer = MockObserver::new();
        observer.expect_latest_epoch().returning(|| Ok(10));
        observer
            .expect_epoch_report()
            .with(eq(10))
            .times(1)
            .returning(|epoch| Ok(report(epoch)));
        let service = service(observer, 10);

        let summaries = service.sync_to_head().await.unwrap();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_observer_failure_stops_the_pass() {
        let mut observer = MockObserver::new();
        observer.expect_latest_epoch().returning(|| Ok(5));
        observer.expect_epoch_report().with(eq(0)).returning(|epoch| Ok(report(epoch)));
        observer
            .expect_epoch_report()
            .with(eq(1))
            .returning(|epoch| Err(ObserverError::EpochNotFound(epoch)));
        let service = service(observer, 0);

        let err = service.sync_to_head().await.unwrap_err();
        assert!(matches!(err, ReconcileError::Observer(ObserverError::EpochNotFound(1))));
        assert_eq!(service.next_epoch().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_report_is_rejected() {
        let mut observer = MockObserver::new();
        observer.expect_latest_epoch().returning(|| Ok(0));
        observer.expect_epoch_report().returning(|_| Ok(report(7)));
        let service = service(observer, 0);

        let err = service.sync_to_head().await.unwrap_err();
        assert!(matches!(err, ReconcileError::Observer(ObserverError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        let mut observer = MockObserver::new();
        observer.expect_latest_epoch().returning(|| Ok(1));
        observer.expect_epoch_report().times(2).returning(|epoch| Ok(report(epoch)));
        let service = Arc::new(service(observer, 0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        // Two poll intervals: the first pass syncs both epochs, later passes find nothing.
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(service.next_epoch().await.unwrap(), 2);
    }
}
