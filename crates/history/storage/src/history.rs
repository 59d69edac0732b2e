//! Per-validator slot history.

use crate::{
    Backend, BatchReport, BatchWriter, FanOut, Key, Precondition, QueryRequest, Record,
    RecordStore, SortCondition, StorageConfig, StorageError, TableSchema, tables,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, info};
use valwatch_types::{
    Cursor, HistoryEntry, Page, SlotOutcome, SlotStatus, ValidatorAddress, unix_now,
};

impl Record for HistoryEntry {
    const TABLE: TableSchema = tables::HISTORY;

    fn key(&self) -> Key {
        Key::with_sort(self.validator.as_str(), self.slot)
    }
}

/// Result of [`HistoryStore::overwrite_from_slot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverwriteReport {
    /// Number of entries removed from the replaced suffix.
    pub deleted: usize,
    /// Number of entries written in their place.
    pub inserted: usize,
}

/// Append-only time series of [`HistoryEntry`] per validator, keyed by
/// `(validator, slot)`.
///
/// Reads always return entries newest first. The only way to change a recorded slot is
/// [`HistoryStore::overwrite_from_slot`], which deletes and re-inserts a suffix. The
/// overwrite is not atomic: an error between the two phases leaves a gap that the next
/// resync fills.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    records: RecordStore<HistoryEntry>,
    writer: BatchWriter,
    fan_out: FanOut,
    page_size: usize,
}

impl HistoryStore {
    /// Creates a new [`HistoryStore`].
    pub fn new(backend: Arc<dyn Backend>, config: &StorageConfig) -> Self {
        Self {
            records: RecordStore::new(backend.clone()),
            writer: BatchWriter::new(backend, config.batch.clone()),
            fan_out: FanOut::new(config.fan_out.clone()),
            page_size: config.page_size.max(1),
        }
    }

    /// Returns a page of `validator`'s history, newest first.
    pub async fn get_history(
        &self,
        validator: &ValidatorAddress,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page<HistoryEntry>, StorageError> {
        self.records
            .query(
                QueryRequest::partition(validator.as_str())
                    .descending()
                    .limit(limit)
                    .cursor(cursor),
            )
            .await
    }

    /// Writes `outcomes` for `validator` through the batch writer.
    ///
    /// This is an unconditional upsert: a slot that is already recorded is overwritten.
    /// Within one call, the last outcome for a slot wins.
    pub async fn add_entries(
        &self,
        validator: &ValidatorAddress,
        outcomes: &[SlotOutcome],
    ) -> Result<BatchReport, StorageError> {
        let by_slot: BTreeMap<u64, SlotStatus> =
            outcomes.iter().map(|outcome| (outcome.slot, outcome.status)).collect();
        let now = unix_now();
        let entries: Vec<HistoryEntry> = by_slot
            .into_iter()
            .map(|(slot, status)| {
                HistoryEntry::from_outcome(
                    validator.clone(),
                    SlotOutcome::new(slot, status),
                    Some(now),
                )
            })
            .collect();

        debug!(target: "history_store", %validator, entries = entries.len(), "Adding entries");
        self.writer.put_all(&entries).await
    }

    /// Records a single slot. Returns `false` if the slot is already recorded.
    pub async fn add_single_entry(
        &self,
        validator: &ValidatorAddress,
        slot: u64,
        status: SlotStatus,
    ) -> Result<bool, StorageError> {
        let entry = HistoryEntry::from_outcome(
            validator.clone(),
            SlotOutcome::new(slot, status),
            Some(unix_now()),
        );
        let outcome = self.records.put(&entry, Some(Precondition::NotExists)).await?;
        if !outcome.is_applied() {
            debug!(target: "history_store", %validator, slot, "Slot already recorded");
        }
        Ok(outcome.is_applied())
    }

    /// Returns the most recent entry of `validator`.
    pub async fn latest_entry(
        &self,
        validator: &ValidatorAddress,
    ) -> Result<Option<HistoryEntry>, StorageError> {
        let page = self.get_history(validator, 1, None).await?;
        Ok(page.items.into_iter().next())
    }

    /// Returns the highest recorded slot of every validator.
    ///
    /// A validator without history maps to `Some(None)`. A validator whose lookup failed
    /// maps to `None`: its latest slot is unknown. The failure is logged and counted, and
    /// never affects the other validators.
    pub async fn batch_latest_slot(
        &self,
        validators: &[ValidatorAddress],
    ) -> HashMap<ValidatorAddress, Option<Option<u64>>> {
        self.fan_out
            .run(validators.to_vec(), |validator| async move {
                let latest = self.latest_entry(&validator).await?;
                Ok::<_, StorageError>(latest.map(|entry| entry.slot))
            })
            .await
    }

    /// Returns up to `limit` most recent entries of every validator.
    ///
    /// A validator whose lookup failed maps to `None`.
    pub async fn batch_history(
        &self,
        validators: &[ValidatorAddress],
        limit: usize,
    ) -> HashMap<ValidatorAddress, Option<Vec<HistoryEntry>>> {
        self.fan_out
            .run(validators.to_vec(), |validator| async move {
                let page = self.get_history(&validator, limit, None).await?;
                Ok::<_, StorageError>(page.items)
            })
            .await
    }

    /// Deletes every entry of `validator` at or after `from_slot`, returning how many were
    /// removed.
    ///
    /// All matching keys are collected page by page before any delete is issued, so the
    /// deletion set can be arbitrarily large.
    pub async fn delete_from_slot(
        &self,
        validator: &ValidatorAddress,
        from_slot: u64,
    ) -> Result<usize, StorageError> {
        let doomed = self
            .records
            .query_all(
                QueryRequest::partition(validator.as_str())
                    .sort(SortCondition::AtLeast(from_slot))
                    .limit(self.page_size),
            )
            .await?;
        if doomed.is_empty() {
            return Ok(0);
        }

        let keys: Vec<Key> = doomed.iter().map(Record::key).collect();
        let report = self.writer.delete_all::<HistoryEntry>(keys).await?;
        debug!(
            target: "history_store",
            %validator,
            from_slot,
            deleted = report.written,
            "Deleted history suffix"
        );
        Ok(report.written)
    }

    /// Replaces `validator`'s history from `from_slot` onwards with `outcomes`.
    ///
    /// Outcomes before `from_slot` are ignored.
    pub async fn overwrite_from_slot(
        &self,
        validator: &ValidatorAddress,
        from_slot: u64,
        outcomes: &[SlotOutcome],
    ) -> Result<OverwriteReport, StorageError> {
        let replacement: Vec<SlotOutcome> =
            outcomes.iter().filter(|outcome| outcome.slot >= from_slot).copied().collect();

        let deleted = self.delete_from_slot(validator, from_slot).await?;
        let inserted = self.add_entries(validator, &replacement).await?.written;

        info!(
            target: "history_store",
            %validator,
            from_slot,
            deleted,
            inserted,
            "Repaired history after reorg"
        );
        Ok(OverwriteReport { deleted, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BatchConfig, FanOutConfig, MemoryBackend, test_utils::ScriptedBackend};
    use std::time::Duration;

    fn config() -> StorageConfig {
        StorageConfig {
            batch: BatchConfig { chunk_pause: Duration::ZERO, ..Default::default() },
            fan_out: FanOutConfig { concurrency: 10, group_pause: Duration::ZERO },
            page_size: 100,
            ..Default::default()
        }
    }

    fn store() -> HistoryStore {
        HistoryStore::new(Arc::new(MemoryBackend::new()), &config())
    }

    fn outcomes(slots: impl IntoIterator<Item = u64>, status: SlotStatus) -> Vec<SlotOutcome> {
        slots.into_iter().map(|slot| SlotOutcome::new(slot, status)).collect()
    }

    async fn slots(store: &HistoryStore, validator: &ValidatorAddress) -> Vec<u64> {
        store
            .get_history(validator, 1_000, None)
            .await
            .unwrap()
            .items
            .iter()
            .map(|entry| entry.slot)
            .collect()
    }

    #[tokio::test]
    async fn test_single_entry_is_idempotent() {
        let store = store();
        let v = ValidatorAddress::from("0xAA");

        assert!(store.add_single_entry(&v, 5, SlotStatus::Attested).await.unwrap());
        assert!(!store.add_single_entry(&v, 5, SlotStatus::Missed).await.unwrap());

        let history = store.get_history(&v, 10, None).await.unwrap();
        assert_eq!(history.items.len(), 1);
        assert_eq!(history.items[0].status, SlotStatus::Attested);
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let store = store();
        let v = ValidatorAddress::from("0xaa");
        store.add_entries(&v, &outcomes([3, 7, 2, 9], SlotStatus::Attested)).await.unwrap();

        assert_eq!(slots(&store, &v).await, vec![9, 7, 3, 2]);
        assert_eq!(store.latest_entry(&v).await.unwrap().map(|e| e.slot), Some(9));
    }

    #[tokio::test]
    async fn test_history_pages_resume_from_cursor() {
        let store = store();
        let v = ValidatorAddress::from("0xaa");
        store.add_entries(&v, &outcomes(1..=5, SlotStatus::Attested)).await.unwrap();

        let first = store.get_history(&v, 3, None).await.unwrap();
        assert_eq!(first.items.iter().map(|e| e.slot).collect::<Vec<_>>(), vec![5, 4, 3]);
        let second = store.get_history(&v, 3, first.next).await.unwrap();
        assert_eq!(second.items.iter().map(|e| e.slot).collect::<Vec<_>>(), vec![2, 1]);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_bulk_insert_overwrites_existing_slot() {
        let store = store();
        let v = ValidatorAddress::from("0xaa");
        store.add_entries(&v, &outcomes([1, 2], SlotStatus::Attested)).await.unwrap();
        store.add_entries(&v, &outcomes([2], SlotStatus::Missed)).await.unwrap();

        let history = store.get_history(&v, 10, None).await.unwrap();
        assert_eq!(history.items.len(), 2);
        assert_eq!(history.items[0].status, SlotStatus::Missed);
    }

    #[tokio::test]
    async fn test_reorg_round_trip() {
        let store = store();
        let v = ValidatorAddress::from("0xaa");
        store.add_entries(&v, &outcomes(1..=10, SlotStatus::Attested)).await.unwrap();

        let report = store
            .overwrite_from_slot(&v, 6, &outcomes(4..=10, SlotStatus::Missed))
            .await
            .unwrap();
        assert_eq!(report, OverwriteReport { deleted: 5, inserted: 5 });

        let history = store.get_history(&v, 100, None).await.unwrap().items;
        assert_eq!(history.len(), 10);
        for entry in history {
            let expected =
                if entry.slot >= 6 { SlotStatus::Missed } else { SlotStatus::Attested };
            assert_eq!(entry.status, expected, "slot {}", entry.slot);
        }
    }

    #[tokio::test]
    async fn test_reorg_may_shorten_history() {
        let store = store();
        let v = ValidatorAddress::from("0xaa");
        store.add_entries(&v, &outcomes(1..=10, SlotStatus::Attested)).await.unwrap();

        store.overwrite_from_slot(&v, 6, &outcomes([6, 7], SlotStatus::Proposed)).await.unwrap();
        assert_eq!(slots(&store, &v).await, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_delete_from_slot_spans_many_pages() {
        let store = store();
        let v = ValidatorAddress::from("0xaa");
        let other = ValidatorAddress::from("0xbb");
        store.add_entries(&v, &outcomes(0..1_000, SlotStatus::Attested)).await.unwrap();
        store.add_entries(&other, &outcomes(0..10, SlotStatus::Attested)).await.unwrap();

        let deleted = store.delete_from_slot(&v, 250).await.unwrap();
        assert_eq!(deleted, 750);
        assert_eq!(slots(&store, &v).await.len(), 250);
        assert_eq!(slots(&store, &other).await.len(), 10);
        assert_eq!(store.delete_from_slot(&v, 250).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_latest_slot_isolates_failures() {
        let backend = Arc::new(ScriptedBackend::new());
        let store = HistoryStore::new(backend.clone(), &config());
        let (a, b, c) = (
            ValidatorAddress::from("0xa"),
            ValidatorAddress::from("0xb"),
            ValidatorAddress::from("0xc"),
        );
        store.add_entries(&a, &outcomes([4, 8], SlotStatus::Attested)).await.unwrap();
        store.add_entries(&b, &outcomes([3], SlotStatus::Attested)).await.unwrap();
        backend.fail_reads_for(b.as_str());

        let latest = store.batch_latest_slot(&[a.clone(), b.clone(), c.clone()]).await;
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[&a], Some(Some(8)));
        assert_eq!(latest[&b], None);
        assert_eq!(latest[&c], Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_latest_slot_bounds_backend_concurrency() {
        let backend = Arc::new(ScriptedBackend::new().with_latency(Duration::from_millis(20)));
        let store = HistoryStore::new(backend.clone(), &config());
        let validators: Vec<ValidatorAddress> =
            (0..100).map(|n| ValidatorAddress::from(format!("0x{n:02}"))).collect();
        for validator in validators.iter().step_by(3) {
            store.add_single_entry(validator, 7, SlotStatus::Attested).await.unwrap();
        }

        let latest = store.batch_latest_slot(&validators).await;
        assert_eq!(latest.len(), 100);
        assert_eq!(latest[&validators[0]], Some(Some(7)));
        assert_eq!(latest[&validators[1]], Some(None));
        assert_eq!(backend.max_in_flight(), 10);
    }

    #[tokio::test]
    async fn test_batch_history_limits_each_validator() {
        let store = store();
        let a = ValidatorAddress::from("0xa");
        let b = ValidatorAddress::from("0xb");
        store.add_entries(&a, &outcomes(1..=5, SlotStatus::Attested)).await.unwrap();

        let history = store.batch_history(&[a.clone(), b.clone()], 2).await;
        let slots: Vec<u64> =
            history[&a].as_ref().unwrap().iter().map(|entry| entry.slot).collect();
        assert_eq!(slots, vec![5, 4]);
        assert_eq!(history[&b], Some(Vec::new()));
    }
}
