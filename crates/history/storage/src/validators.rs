//! Validator records.

use crate::{
    Backend, HistoryStore, Key, Precondition, QueryRequest, Record, RecordStore, ScanRequest,
    StorageConfig, StorageError, TableSchema, UpdateExpression, tables,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use valwatch_types::{
    Cursor, HistoryEntry, OperatorId, Page, Validator, ValidatorAddress, ValidatorPatch,
    ValidatorStatsUpdate, unix_now,
};

impl Record for Validator {
    const TABLE: TableSchema = tables::VALIDATORS;

    fn key(&self) -> Key {
        Key::partition(self.address.as_str())
    }
}

/// A validator together with a slice of its most recent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorWithHistory {
    /// The validator record.
    pub validator: Validator,
    /// Most recent entries first.
    pub history: Vec<HistoryEntry>,
}

/// CRUD over [`Validator`] records, keyed by address.
///
/// History is never stored on the validator record. It is read from and written to the
/// [`HistoryStore`] the repository wraps.
#[derive(Debug, Clone)]
pub struct ValidatorRepository {
    records: RecordStore<Validator>,
    history: HistoryStore,
    page_size: usize,
}

impl ValidatorRepository {
    /// Creates a new [`ValidatorRepository`].
    pub fn new(backend: Arc<dyn Backend>, config: &StorageConfig) -> Self {
        Self {
            records: RecordStore::new(backend.clone()),
            history: HistoryStore::new(backend, config),
            page_size: config.page_size.max(1),
        }
    }

    /// Returns the history store used for history payloads.
    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Creates `validator`. Returns `false` if the address is already known.
    pub async fn create(&self, validator: &Validator) -> Result<bool, StorageError> {
        let outcome = self.records.put(validator, Some(Precondition::NotExists)).await?;
        if outcome.is_applied() {
            debug!(target: "validator_repo", validator = %validator.address, "Created validator");
        }
        Ok(outcome.is_applied())
    }

    /// Reads a validator.
    pub async fn get(&self, address: &ValidatorAddress) -> Result<Option<Validator>, StorageError> {
        self.records.get(&Key::partition(address.as_str())).await
    }

    /// Reads a validator together with its `limit` most recent history entries.
    pub async fn get_with_history(
        &self,
        address: &ValidatorAddress,
        limit: usize,
    ) -> Result<Option<ValidatorWithHistory>, StorageError> {
        let Some(validator) = self.get(address).await? else {
            return Ok(None);
        };
        let history = self.history.get_history(address, limit, None).await?.items;
        Ok(Some(ValidatorWithHistory { validator, history }))
    }

    /// Attaches the `limit` most recent history entries to each validator.
    ///
    /// A validator whose history could not be read gets an empty slice.
    pub async fn attach_history(
        &self,
        validators: Vec<Validator>,
        limit: usize,
    ) -> Vec<ValidatorWithHistory> {
        let addresses: Vec<ValidatorAddress> =
            validators.iter().map(|validator| validator.address.clone()).collect();
        let mut histories = self.history.batch_history(&addresses, limit).await;

        validators
            .into_iter()
            .map(|validator| {
                let history =
                    histories.remove(&validator.address).flatten().unwrap_or_default();
                ValidatorWithHistory { validator, history }
            })
            .collect()
    }

    /// Returns every validator owned by `operator`.
    pub async fn find_by_operator(
        &self,
        operator: &OperatorId,
    ) -> Result<Vec<Validator>, StorageError> {
        self.records
            .query_all(
                QueryRequest::index(tables::VALIDATORS_BY_OPERATOR, operator.as_str())
                    .limit(self.page_size),
            )
            .await
    }

    /// Claims the validator for `operator`, or releases it when `operator` is `None`.
    ///
    /// Returns `false` if the validator does not exist.
    pub async fn set_operator(
        &self,
        address: &ValidatorAddress,
        operator: Option<&OperatorId>,
    ) -> Result<bool, StorageError> {
        let mut update = UpdateExpression::new();
        update.set("updated_at", unix_now());
        match operator {
            Some(operator) => update.set("operator_id", operator.as_str()),
            None => update.remove("operator_id"),
        };

        let outcome = self
            .records
            .update(&Key::partition(address.as_str()), update, Some(Precondition::Exists))
            .await?;
        if outcome.is_applied() {
            info!(
                target: "validator_repo",
                validator = %address,
                operator = ?operator.map(OperatorId::as_str),
                "Updated validator owner"
            );
        }
        Ok(outcome.is_applied())
    }

    /// Applies a stats refresh.
    ///
    /// The history payload is appended through the [`HistoryStore`] first, and the record
    /// patch is written last: fields such as `last_synced_epoch` only move once the
    /// history they describe is stored. A failed history write leaves the record as it
    /// was. Only the fields set in the patch are written.
    ///
    /// Returns `false`, writing nothing, if the validator does not exist.
    pub async fn update_stats(
        &self,
        address: &ValidatorAddress,
        update: &ValidatorStatsUpdate,
    ) -> Result<bool, StorageError> {
        let key = Key::partition(address.as_str());
        let expression = patch_expression(&update.patch, unix_now())?;
        if self.records.get(&key).await?.is_none() {
            warn!(
                target: "validator_repo",
                validator = %address,
                "Stats update for unknown validator"
            );
            return Ok(false);
        }

        if !update.history.is_empty() {
            self.history.add_entries(address, &update.history).await?;
        }

        let outcome = self.records.update(&key, expression, Some(Precondition::Exists)).await?;
        if !outcome.is_applied() {
            warn!(
                target: "validator_repo",
                validator = %address,
                "Validator removed while its stats were updated"
            );
        }
        Ok(outcome.is_applied())
    }

    /// Deletes a validator. Returns `false` if it does not exist.
    pub async fn delete(&self, address: &ValidatorAddress) -> Result<bool, StorageError> {
        let outcome = self
            .records
            .delete(&Key::partition(address.as_str()), Some(Precondition::Exists))
            .await?;
        Ok(outcome.is_applied())
    }

    /// Counts every validator.
    pub async fn count_all(&self) -> Result<usize, StorageError> {
        self.records.count_all(self.page_size).await
    }

    /// Returns one page of validators.
    pub async fn find_all(
        &self,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page<Validator>, StorageError> {
        self.records.scan(ScanRequest { cursor, limit: Some(limit), ..Default::default() }).await
    }

    /// Returns every validator, ordered by address.
    pub async fn list_all(&self) -> Result<Vec<Validator>, StorageError> {
        let mut validators: Vec<Validator> =
            self.records.scan_all(None, self.page_size).await?.into_values().collect();
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(validators)
    }
}

/// Builds the update expression for `patch`, touching `updated_at` and nothing that is
/// unset.
fn patch_expression(patch: &ValidatorPatch, now: u64) -> Result<UpdateExpression, StorageError> {
    let mut update = UpdateExpression::new();
    update.set("updated_at", now);

    if let Some(peer_id) = &patch.peer_id {
        update.set("peer_id", peer_id.as_str());
    }
    if let Some(slot) = patch.last_attested_slot {
        update.set("last_attested_slot", slot);
    }
    if let Some(slot) = patch.last_proposed_slot {
        update.set("last_proposed_slot", slot);
    }
    if let Some(count) = patch.missed_attestations {
        update.set("missed_attestations", count);
    }
    if let Some(count) = patch.missed_proposals {
        update.set("missed_proposals", count);
    }
    if let Some(count) = patch.total_slots {
        update.set("total_slots", count);
    }
    if let Some(epoch) = patch.last_synced_epoch {
        update.set("last_synced_epoch", epoch);
    }
    if let Some(slot) = patch.last_counted_slot {
        update.set("last_counted_slot", slot);
    }
    if let Some(peer) = &patch.peer {
        update.set_serialized("peer", peer)?;
    }
    Ok(update)
}
