//! Operator records and operator/validator aggregates.

use crate::{
    Backend, Filter, Key, Precondition, QueryRequest, Record, RecordStore, ScanRequest,
    StorageConfig, StorageError, TableSchema, UpdateExpression, tables,
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};
use valwatch_types::{
    Cursor, Operator, OperatorId, OperatorPatch, Page, SocialPlatform, Validator,
    normalize_address, unix_now,
};

impl Record for Operator {
    const TABLE: TableSchema = tables::OPERATORS;

    fn key(&self) -> Key {
        Key::partition(self.id.as_str())
    }
}

/// CRUD over [`Operator`] records, keyed by identity id, plus aggregates joining
/// operators with the validators they own.
///
/// There is no index spanning both collections, so every aggregate materializes both
/// sides through full paginated scans before joining them.
#[derive(Debug, Clone)]
pub struct OperatorRepository {
    records: RecordStore<Operator>,
    validators: RecordStore<Validator>,
    page_size: usize,
}

impl OperatorRepository {
    /// Creates a new [`OperatorRepository`].
    pub fn new(backend: Arc<dyn Backend>, config: &StorageConfig) -> Self {
        Self {
            records: RecordStore::new(backend.clone()),
            validators: RecordStore::new(backend),
            page_size: config.page_size.max(1),
        }
    }

    /// Creates `operator`.
    ///
    /// Returns `false` if the identity id or the wallet address is already taken. The
    /// address check and the insert are two separate requests.
    pub async fn create(&self, operator: &Operator) -> Result<bool, StorageError> {
        let operator = operator.clone().normalized();
        if let Some(address) = &operator.address &&
            let Some(owner) = self.find_by_address(address).await?
        {
            warn!(
                target: "operator_repo",
                operator = %operator.id,
                owner = %owner.id,
                "Wallet address already registered"
            );
            return Ok(false);
        }

        let outcome = self.records.put(&operator, Some(Precondition::NotExists)).await?;
        if outcome.is_applied() {
            debug!(target: "operator_repo", operator = %operator.id, "Created operator");
        }
        Ok(outcome.is_applied())
    }

    /// Reads an operator.
    pub async fn get(&self, id: &OperatorId) -> Result<Option<Operator>, StorageError> {
        self.records.get(&Key::partition(id.as_str())).await
    }

    /// Looks an operator up by wallet address.
    pub async fn find_by_address(&self, address: &str) -> Result<Option<Operator>, StorageError> {
        let address = normalize_address(address);
        self.find_one(QueryRequest::index(tables::OPERATORS_BY_ADDRESS, address)).await
    }

    /// Looks an operator up by its handle on `platform`.
    pub async fn find_by_social(
        &self,
        platform: SocialPlatform,
        handle: &str,
    ) -> Result<Option<Operator>, StorageError> {
        self.find_one(QueryRequest::index(tables::social_index(platform), handle)).await
    }

    async fn find_one(&self, request: QueryRequest) -> Result<Option<Operator>, StorageError> {
        Ok(self.records.query(request.limit(1)).await?.items.into_iter().next())
    }

    /// Applies `patch`. Returns `false` if the operator does not exist or the new wallet
    /// address belongs to another operator.
    pub async fn update(
        &self,
        id: &OperatorId,
        patch: &OperatorPatch,
    ) -> Result<bool, StorageError> {
        let mut patch = patch.clone();
        if let Some(address) = &mut patch.address {
            *address = normalize_address(address);
            if let Some(owner) = self.find_by_address(address).await? &&
                owner.id != *id
            {
                warn!(
                    target: "operator_repo",
                    operator = %id,
                    owner = %owner.id,
                    "Wallet address already registered"
                );
                return Ok(false);
            }
        }

        let outcome = self
            .records
            .update(
                &Key::partition(id.as_str()),
                patch_expression(&patch, unix_now()),
                Some(Precondition::Exists),
            )
            .await?;
        Ok(outcome.is_applied())
    }

    /// Deletes an operator. Returns `false` if it does not exist.
    pub async fn delete(&self, id: &OperatorId) -> Result<bool, StorageError> {
        let outcome =
            self.records.delete(&Key::partition(id.as_str()), Some(Precondition::Exists)).await?;
        Ok(outcome.is_applied())
    }

    /// Counts every operator.
    pub async fn count_all(&self) -> Result<usize, StorageError> {
        self.records.count_all(self.page_size).await
    }

    /// Returns one page of operators.
    pub async fn find_all(
        &self,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page<Operator>, StorageError> {
        self.records.scan(ScanRequest { cursor, limit: Some(limit), ..Default::default() }).await
    }

    /// Returns every operator that owns no validator, ordered by id.
    pub async fn operators_without_validators(&self) -> Result<Vec<Operator>, StorageError> {
        let owned = self.validator_counts().await?;
        self.operators_where(|operator| !owned.contains_key(&operator.id)).await
    }

    /// Counts the operators that own no validator.
    pub async fn count_all_operators_without_validators(&self) -> Result<usize, StorageError> {
        Ok(self.operators_without_validators().await?.len())
    }

    /// Returns every operator that owns more than one validator, ordered by id.
    pub async fn operators_with_multiple_validators(&self) -> Result<Vec<Operator>, StorageError> {
        let owned = self.validator_counts().await?;
        self.operators_where(|operator| owned.get(&operator.id).is_some_and(|count| *count > 1))
            .await
    }

    /// Counts the operators that own more than one validator.
    pub async fn count_operators_with_multiple_validators(&self) -> Result<usize, StorageError> {
        Ok(self.operators_with_multiple_validators().await?.len())
    }

    /// Number of validators owned per operator, over the whole validator corpus.
    async fn validator_counts(&self) -> Result<HashMap<OperatorId, usize>, StorageError> {
        let claimed =
            self.validators.scan_all(Some(Filter::Exists("operator_id")), self.page_size).await?;

        let mut counts = HashMap::new();
        for operator in claimed.into_values().filter_map(|validator| validator.operator_id) {
            *counts.entry(operator).or_insert(0) += 1;
        }
        debug!(target: "operator_repo", owners = counts.len(), "Counted validators per operator");
        Ok(counts)
    }

    async fn operators_where(
        &self,
        predicate: impl Fn(&Operator) -> bool,
    ) -> Result<Vec<Operator>, StorageError> {
        let mut operators: Vec<Operator> = self
            .records
            .scan_all(None, self.page_size)
            .await?
            .into_values()
            .filter(|operator| predicate(operator))
            .collect();
        operators.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(operators)
    }
}

/// Builds the update expression for `patch`, touching `updated_at` and nothing that is
/// unset.
fn patch_expression(patch: &OperatorPatch, now: u64) -> UpdateExpression {
    let mut update = UpdateExpression::new();
    update.set("updated_at", now);

    let strings = [
        ("address", &patch.address),
        ("handle", &patch.handle),
        (SocialPlatform::Discord.attribute(), &patch.discord),
        (SocialPlatform::Twitter.attribute(), &patch.twitter),
        (SocialPlatform::Telegram.attribute(), &patch.telegram),
    ];
    for (attribute, value) in strings {
        if let Some(value) = value {
            update.set(attribute, value.as_str());
        }
    }
    if let Some(approved) = patch.approved {
        update.set("approved", approved);
    }
    if let Some(penalized) = patch.penalized {
        update.set("penalized", penalized);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, ValidatorRepository};
    use rstest::rstest;
    use valwatch_types::ValidatorAddress;

    fn config() -> StorageConfig {
        // Small pages so the aggregates have to follow cursors.
        StorageConfig { page_size: 2, ..Default::default() }
    }

    fn repos() -> (OperatorRepository, ValidatorRepository) {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        (
            OperatorRepository::new(backend.clone(), &config()),
            ValidatorRepository::new(backend, &config()),
        )
    }

    async fn seed_ownership(
        operators: &OperatorRepository,
        validators: &ValidatorRepository,
        owned: &[(&str, usize)],
    ) {
        for (id, count) in owned {
            let id = OperatorId::new(*id);
            assert!(operators.create(&Operator::new(id.clone(), 1)).await.unwrap());
            for n in 0..*count {
                let address = ValidatorAddress::from(format!("0x{id}{n}"));
                validators.create(&Validator::new(address.clone(), 1)).await.unwrap();
                assert!(validators.set_operator(&address, Some(&id)).await.unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_aggregates() {
        let (operators, validators) = repos();
        seed_ownership(&operators, &validators, &[("o1", 0), ("o2", 1), ("o3", 3)]).await;
        validators.create(&Validator::new("0xfree".into(), 1)).await.unwrap();

        assert_eq!(operators.count_operators_with_multiple_validators().await.unwrap(), 1);
        assert_eq!(operators.count_all_operators_without_validators().await.unwrap(), 1);

        let idle = operators.operators_without_validators().await.unwrap();
        assert_eq!(idle[0].id, OperatorId::new("o1"));
        let busy = operators.operators_with_multiple_validators().await.unwrap();
        assert_eq!(busy[0].id, OperatorId::new("o3"));
    }

    #[tokio::test]
    async fn test_aggregates_ignore_validators_of_unknown_operators() {
        let (operators, validators) = repos();
        seed_ownership(&operators, &validators, &[("o1", 0)]).await;
        let orphan = OperatorId::new("gone");
        for address in ["0xa", "0xb"] {
            validators.create(&Validator::new(address.into(), 1)).await.unwrap();
            validators.set_operator(&address.into(), Some(&orphan)).await.unwrap();
        }

        assert_eq!(operators.count_operators_with_multiple_validators().await.unwrap(), 0);
        assert_eq!(operators.count_all_operators_without_validators().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_taken_id_and_address() {
        let (operators, _) = repos();
        let first = Operator::new("id-1".into(), 1).with_address("0xWALLET");

        assert!(operators.create(&first).await.unwrap());
        assert!(!operators.create(&Operator::new("id-1".into(), 2)).await.unwrap());
        assert!(
            !operators
                .create(&Operator::new("id-2".into(), 2).with_address("0xwallet"))
                .await
                .unwrap()
        );
        assert_eq!(operators.count_all().await.unwrap(), 1);
        assert_eq!(
            operators.find_by_address(" 0xWallet ").await.unwrap().map(|o| o.id),
            Some(OperatorId::new("id-1"))
        );
    }

    #[tokio::test]
    async fn test_create_normalizes_raw_address() {
        let (operators, _) = repos();
        let raw =
            Operator { address: Some("0xWALLET".to_string()), ..Operator::new("id-1".into(), 1) };

        assert!(operators.create(&raw).await.unwrap());
        assert!(
            !operators
                .create(&Operator::new("id-2".into(), 2).with_address("0xwallet"))
                .await
                .unwrap()
        );

        let stored = operators.get(&OperatorId::new("id-1")).await.unwrap().unwrap();
        assert_eq!(stored.address.as_deref(), Some("0xwallet"));
        assert_eq!(operators.count_all().await.unwrap(), 1);
    }

    #[rstest]
    #[case::discord(SocialPlatform::Discord)]
    #[case::twitter(SocialPlatform::Twitter)]
    #[case::telegram(SocialPlatform::Telegram)]
    #[tokio::test]
    async fn test_find_by_social(#[case] platform: SocialPlatform) {
        let (operators, _) = repos();
        let operator = Operator::new("id-1".into(), 1).with_social(platform, "alice");
        operators.create(&operator).await.unwrap();

        let found = operators.find_by_social(platform, "alice").await.unwrap();
        assert_eq!(found, Some(operator));
        assert!(operators.find_by_social(platform, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (operators, _) = repos();
        let id = OperatorId::new("id-1");
        operators.create(&Operator::new(id.clone(), 1).with_address("0xaaa")).await.unwrap();
        operators.create(&Operator::new("id-2".into(), 1).with_address("0xbbb")).await.unwrap();

        let patch = OperatorPatch { approved: Some(true), ..Default::default() };
        assert!(operators.update(&id, &patch).await.unwrap());
        let stored = operators.get(&id).await.unwrap().unwrap();
        assert!(stored.approved);
        assert_eq!(stored.address.as_deref(), Some("0xaaa"));

        let steal = OperatorPatch { address: Some("0xBBB".into()), ..Default::default() };
        assert!(!operators.update(&id, &steal).await.unwrap());
        assert!(!operators.update(&"missing".into(), &patch).await.unwrap());

        assert!(operators.delete(&id).await.unwrap());
        assert!(!operators.delete(&id).await.unwrap());
        assert!(operators.get(&id).await.unwrap().is_none());
    }
}
