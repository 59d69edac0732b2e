//! Backend abstraction for the partitioned key-value store.
//!
//! This module defines the [`Backend`] trait, the only seam through which the storage
//! layer reaches the underlying store, together with the request and response types it
//! speaks. The contract mirrors a managed, throughput-provisioned key-value service:
//!
//! - Items are addressed by a partition key plus an optional numeric sort key.
//! - Writes accept an optional [`Precondition`] evaluated atomically per item.
//! - Batch writes accept at most [`MAX_BATCH_WRITE_ITEMS`] requests and may hand back a
//!   subset of them as unprocessed without failing the call.
//! - Scans and queries are paginated through an opaque [`Cursor`].
//! - Exceeding provisioned throughput yields [`BackendError::Throttled`].
//!
//! [`MemoryBackend`] implements the contract in-process.

mod memory;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use thiserror::Error;
use valwatch_types::Cursor;

/// Maximum number of requests accepted by a single [`Backend::batch_write`] call.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// A stored item: a flat map of attribute names to values.
pub type Item = serde_json::Map<String, Value>;

/// The primary key of an item.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Constructor,
)]
pub struct Key {
    /// Partition key value.
    pub partition: String,
    /// Sort key value, for tables that have one.
    pub sort: Option<u64>,
}

impl Key {
    /// Creates a key for a table without a sort key.
    pub fn partition(partition: impl Into<String>) -> Self {
        Self { partition: partition.into(), sort: None }
    }

    /// Creates a key for a table with a sort key.
    pub fn with_sort(partition: impl Into<String>, sort: u64) -> Self {
        Self { partition: partition.into(), sort: Some(sort) }
    }
}

/// A secondary index over a string attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name, as passed in [`QueryRequest::index`].
    pub name: &'static str,
    /// The attribute the index is partitioned by.
    pub partition_key: &'static str,
}

/// Static description of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: &'static str,
    /// Attribute holding the (string) partition key.
    pub partition_key: &'static str,
    /// Attribute holding the (numeric) sort key, if any.
    pub sort_key: Option<&'static str>,
    /// Secondary indexes.
    pub indexes: &'static [IndexSchema],
    /// Attribute holding an expiry unix timestamp (seconds), if any.
    pub ttl: Option<&'static str>,
}

impl TableSchema {
    /// Looks up a secondary index by name.
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Extracts the primary key from an item.
    pub fn key_of(&self, item: &Item) -> Result<Key, BackendError> {
        let partition = item
            .get(self.partition_key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BackendError::Other(format!(
                    "item in {} is missing string attribute {}",
                    self.name, self.partition_key
                ))
            })?
            .to_string();

        let sort = match self.sort_key {
            Some(attribute) => Some(item.get(attribute).and_then(Value::as_u64).ok_or_else(
                || {
                    BackendError::Other(format!(
                        "item in {} is missing numeric attribute {attribute}",
                        self.name
                    ))
                },
            )?),
            None => None,
        };

        Ok(Key { partition, sort })
    }

    /// Builds the key attributes of an item from a [`Key`].
    pub fn key_item(&self, key: &Key) -> Item {
        let mut item = Item::new();
        item.insert(self.partition_key.to_string(), Value::String(key.partition.clone()));
        if let (Some(attribute), Some(sort)) = (self.sort_key, key.sort) {
            item.insert(attribute.to_string(), Value::from(sort));
        }
        item
    }
}

/// A precondition on the current state of the target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The key must already exist.
    Exists,
    /// The key must not exist yet.
    NotExists,
}

/// A partial update: attributes to set and attributes to remove.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    /// Attributes to set.
    pub set: Item,
    /// Attributes to remove.
    pub remove: Vec<String>,
}

impl UpdateExpression {
    /// Creates an empty [`UpdateExpression`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `attribute` to `value`.
    pub fn set(&mut self, attribute: &str, value: impl Into<Value>) -> &mut Self {
        self.set.insert(attribute.to_string(), value.into());
        self
    }

    /// Sets `attribute` to the serialized form of `value`.
    pub fn set_serialized<T: Serialize>(
        &mut self,
        attribute: &str,
        value: &T,
    ) -> Result<&mut Self, serde_json::Error> {
        self.set.insert(attribute.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Removes `attribute`.
    pub fn remove(&mut self, attribute: &str) -> &mut Self {
        self.remove.push(attribute.to_string());
        self
    }
}

/// A single request inside a [`Backend::batch_write`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Unconditionally write an item.
    Put(Item),
    /// Unconditionally delete a key.
    Delete(Key),
}

/// A scan filter, evaluated after the page limit has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The attribute is present and not null.
    Exists(&'static str),
    /// The attribute is absent or null.
    NotExists(&'static str),
    /// The attribute equals the given value.
    Equals(&'static str, Value),
}

impl Filter {
    /// Returns `true` if `item` passes the filter.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::Exists(attribute) => item.get(*attribute).is_some_and(|v| !v.is_null()),
            Self::NotExists(attribute) => item.get(*attribute).is_none_or(Value::is_null),
            Self::Equals(attribute, value) => item.get(*attribute) == Some(value),
        }
    }
}

/// A full-table scan request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    /// Optional filter applied to examined items.
    pub filter: Option<Filter>,
    /// Continuation cursor from a previous page.
    pub cursor: Option<Cursor>,
    /// Maximum number of items examined for this page.
    pub limit: Option<usize>,
}

/// A condition on the sort key of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortCondition {
    /// Every sort key.
    #[default]
    All,
    /// Sort key equal to the value.
    Eq(u64),
    /// Sort key greater than or equal to the value.
    AtLeast(u64),
    /// Sort key less than or equal to the value.
    AtMost(u64),
    /// Sort key within the inclusive range.
    Between(u64, u64),
}

impl SortCondition {
    /// Returns `true` if `sort` satisfies the condition. Keys without a sort component only
    /// satisfy [`SortCondition::All`].
    pub fn matches(&self, sort: Option<u64>) -> bool {
        match (self, sort) {
            (Self::All, _) => true,
            (_, None) => false,
            (Self::Eq(v), Some(s)) => s == *v,
            (Self::AtLeast(v), Some(s)) => s >= *v,
            (Self::AtMost(v), Some(s)) => s <= *v,
            (Self::Between(lo, hi), Some(s)) => (*lo..=*hi).contains(&s),
        }
    }
}

/// A query over a single partition of the table or of a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    /// Secondary index to query, or the primary key when `None`.
    pub index: Option<&'static str>,
    /// Partition key value to match.
    pub partition: String,
    /// Condition on the primary sort key.
    pub sort: SortCondition,
    /// Return items in descending sort key order.
    pub descending: bool,
    /// Continuation cursor from a previous page.
    pub cursor: Option<Cursor>,
    /// Maximum number of items returned for this page.
    pub limit: Option<usize>,
}

impl QueryRequest {
    /// Creates a query over `partition` of the primary key.
    pub fn partition(partition: impl Into<String>) -> Self {
        Self { partition: partition.into(), ..Default::default() }
    }

    /// Creates a query over `partition` of the secondary index `index`.
    pub fn index(index: &'static str, partition: impl Into<String>) -> Self {
        Self { index: Some(index), partition: partition.into(), ..Default::default() }
    }

    /// Restricts the sort key.
    pub const fn sort(mut self, sort: SortCondition) -> Self {
        self.sort = sort;
        self
    }

    /// Returns items newest (highest sort key) first.
    pub const fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Sets the page size.
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resumes from a previous page.
    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// A page of raw items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    /// Items in this page.
    pub items: Vec<Item>,
    /// Cursor for the next page, `None` on the final page.
    pub cursor: Option<Cursor>,
}

/// Errors reported by a [`Backend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// A write precondition did not hold.
    #[error("conditional check failed")]
    ConditionFailed,

    /// Provisioned throughput was exceeded. Retryable.
    #[error("provisioned throughput exceeded")]
    Throttled,

    /// Any other error. Not retryable.
    #[error("{0}")]
    Other(String),
}

/// A partitioned key-value store.
///
/// Implementations must be safe to share between tasks; every repository holds the same
/// `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Debug + Send + Sync {
    /// Reads a single item.
    async fn get(&self, table: &TableSchema, key: &Key) -> Result<Option<Item>, BackendError>;

    /// Writes an item, replacing any existing item with the same key.
    async fn put(
        &self,
        table: &TableSchema,
        item: Item,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError>;

    /// Applies a partial update to an item, creating it if absent and no precondition
    /// forbids it.
    async fn update(
        &self,
        table: &TableSchema,
        key: &Key,
        update: UpdateExpression,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError>;

    /// Deletes an item.
    async fn delete(
        &self,
        table: &TableSchema,
        key: &Key,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError>;

    /// Reads a page of the whole table in key order.
    async fn scan(&self, table: &TableSchema, request: ScanRequest)
    -> Result<ItemPage, BackendError>;

    /// Reads a page of a single partition.
    async fn query(
        &self,
        table: &TableSchema,
        request: QueryRequest,
    ) -> Result<ItemPage, BackendError>;

    /// Applies up to [`MAX_BATCH_WRITE_ITEMS`] writes, returning those left unprocessed.
    async fn batch_write(
        &self,
        table: &TableSchema,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, BackendError>;
}
