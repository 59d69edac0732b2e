//! Typed access to a single table.

use crate::{
    Backend, BackendError, Item, Key, Precondition, QueryRequest, ScanRequest, StorageError,
    TableSchema, UpdateExpression,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt, marker::PhantomData, sync::Arc};
use tracing::{debug, error};
use valwatch_types::Page;

/// A type stored as one item of a table.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// The table holding records of this type.
    const TABLE: TableSchema;

    /// Returns the primary key of the record.
    fn key(&self) -> Key;
}

/// The result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Applied,
    /// The precondition did not hold; nothing was written.
    PreconditionFailed,
}

impl WriteOutcome {
    /// Returns `true` if the write was applied.
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Typed get / put / update / delete / scan / query over the table of `R`.
///
/// This is the only component that calls the [`Backend`] directly, apart from the
/// [`BatchWriter`](crate::BatchWriter).
pub struct RecordStore<R> {
    backend: Arc<dyn Backend>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for RecordStore<R> {
    fn clone(&self) -> Self {
        Self { backend: self.backend.clone(), _record: PhantomData }
    }
}

impl<R: Record> fmt::Debug for RecordStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore").field("table", &R::TABLE.name).finish_non_exhaustive()
    }
}

impl<R: Record> RecordStore<R> {
    /// Creates a new [`RecordStore`] over `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend, _record: PhantomData }
    }

    /// Returns the backend handle.
    pub const fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Converts a record into its stored item.
    pub fn encode(record: &R) -> Result<Item, StorageError> {
        match serde_json::to_value(record)? {
            Value::Object(item) => Ok(item),
            other => Err(StorageError::InvalidRecord(format!(
                "{} record serialized to a non-object value: {other}",
                R::TABLE.name
            ))),
        }
    }

    /// Converts a stored item back into a record.
    pub fn decode(item: Item) -> Result<R, StorageError> {
        Ok(serde_json::from_value(Value::Object(item))?)
    }

    /// Reads the record stored under `key`.
    pub async fn get(&self, key: &Key) -> Result<Option<R>, StorageError> {
        debug!(target: "record_store", table = R::TABLE.name, ?key, "Fetching record");
        let item = self.backend.get(&R::TABLE, key).await.inspect_err(|err| {
            error!(
                target: "record_store",
                table = R::TABLE.name,
                ?key,
                %err,
                "Failed to read record"
            );
        })?;
        item.map(Self::decode).transpose()
    }

    /// Writes `record`, subject to `precondition`.
    pub async fn put(
        &self,
        record: &R,
        precondition: Option<Precondition>,
    ) -> Result<WriteOutcome, StorageError> {
        let item = Self::encode(record)?;
        debug!(
            target: "record_store",
            table = R::TABLE.name,
            key = ?record.key(),
            ?precondition,
            "Writing record"
        );
        outcome(self.backend.put(&R::TABLE, item, precondition).await)
    }

    /// Applies `update` to the record under `key`, subject to `precondition`.
    pub async fn update(
        &self,
        key: &Key,
        update: UpdateExpression,
        precondition: Option<Precondition>,
    ) -> Result<WriteOutcome, StorageError> {
        debug!(
            target: "record_store",
            table = R::TABLE.name,
            ?key,
            set = update.set.len(),
            remove = update.remove.len(),
            "Updating record"
        );
        outcome(self.backend.update(&R::TABLE, key, update, precondition).await)
    }

    /// Deletes the record under `key`, subject to `precondition`.
    pub async fn delete(
        &self,
        key: &Key,
        precondition: Option<Precondition>,
    ) -> Result<WriteOutcome, StorageError> {
        debug!(target: "record_store", table = R::TABLE.name, ?key, "Deleting record");
        outcome(self.backend.delete(&R::TABLE, key, precondition).await)
    }

    /// Reads one page of the whole table.
    pub async fn scan(&self, request: ScanRequest) -> Result<Page<R>, StorageError> {
        let page = self.backend.scan(&R::TABLE, request).await?;
        let items = page.items.into_iter().map(Self::decode).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page.cursor))
    }

    /// Reads one page of a partition of the table or of one of its indexes.
    pub async fn query(&self, request: QueryRequest) -> Result<Page<R>, StorageError> {
        let page = self.backend.query(&R::TABLE, request).await?;
        let items = page.items.into_iter().map(Self::decode).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page.cursor))
    }
}

fn outcome(result: Result<(), BackendError>) -> Result<WriteOutcome, StorageError> {
    match result {
        Ok(()) => Ok(WriteOutcome::Applied),
        Err(BackendError::ConditionFailed) => Ok(WriteOutcome::PreconditionFailed),
        Err(err) => {
            error!(target: "record_store", %err, "Write failed");
            Err(err.into())
        }
    }
}
