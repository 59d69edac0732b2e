//! In-process implementation of [`Backend`].
//!
//! Tables are ordered maps keyed by [`Key`], so scans walk items in key order and a query
//! over one partition walks its sort keys in order. Continuation cursors are the
//! serialized last evaluated key. Items whose TTL attribute lies in the past are skipped
//! by every read.

use super::{
    Backend, BackendError, ItemPage, Key, MAX_BATCH_WRITE_ITEMS, Precondition, QueryRequest,
    ScanRequest, TableSchema, UpdateExpression, WriteRequest,
};
use crate::Item;
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
};
use tokio::sync::RwLock;
use tracing::trace;
use valwatch_types::{Cursor, unix_now};

type Table = BTreeMap<Key, Item>;

/// A [`Backend`] holding every table in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<&'static str, Table>>,
}

impl MemoryBackend {
    /// Creates an empty [`MemoryBackend`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live items stored in `table`.
    pub async fn len(&self, table: &TableSchema) -> usize {
        let now = unix_now();
        self.tables
            .read()
            .await
            .get(table.name)
            .map(|rows| rows.values().filter(|item| is_live(table, item, now)).count())
            .unwrap_or_default()
    }

    /// Returns `true` if `table` holds no live items.
    pub async fn is_empty(&self, table: &TableSchema) -> bool {
        self.len(table).await == 0
    }
}

fn is_live(table: &TableSchema, item: &Item, now: u64) -> bool {
    table
        .ttl
        .and_then(|attribute| item.get(attribute))
        .and_then(Value::as_u64)
        .is_none_or(|expires_at| expires_at > now)
}

fn check(precondition: Option<Precondition>, exists: bool) -> Result<(), BackendError> {
    match (precondition, exists) {
        (Some(Precondition::Exists), false) | (Some(Precondition::NotExists), true) => {
            Err(BackendError::ConditionFailed)
        }
        _ => Ok(()),
    }
}

fn encode_cursor(key: &Key) -> Result<Cursor, BackendError> {
    serde_json::to_string(key)
        .map(Cursor::new)
        .map_err(|err| BackendError::Other(format!("failed to encode cursor: {err}")))
}

fn decode_cursor(cursor: &Cursor) -> Result<Key, BackendError> {
    serde_json::from_str(cursor.as_token())
        .map_err(|err| BackendError::Other(format!("invalid cursor: {err}")))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, table: &TableSchema, key: &Key) -> Result<Option<Item>, BackendError> {
        let now = unix_now();
        let tables = self.tables.read().await;
        Ok(tables
            .get(table.name)
            .and_then(|rows| rows.get(key))
            .filter(|item| is_live(table, item, now))
            .cloned())
    }

    async fn put(
        &self,
        table: &TableSchema,
        item: Item,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError> {
        let key = table.key_of(&item)?;
        let now = unix_now();
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.name).or_default();
        check(precondition, rows.get(&key).is_some_and(|existing| is_live(table, existing, now)))?;
        rows.insert(key, item);
        Ok(())
    }

    async fn update(
        &self,
        table: &TableSchema,
        key: &Key,
        update: UpdateExpression,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError> {
        let now = unix_now();
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.name).or_default();
        let existing = rows.get(key).filter(|item| is_live(table, item, now)).cloned();
        check(precondition, existing.is_some())?;

        let mut item = existing.unwrap_or_else(|| table.key_item(key));
        for attribute in &update.remove {
            item.remove(attribute);
        }
        item.extend(update.set);
        rows.insert(key.clone(), item);
        Ok(())
    }

    async fn delete(
        &self,
        table: &TableSchema,
        key: &Key,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError> {
        let now = unix_now();
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.name).or_default();
        check(precondition, rows.get(key).is_some_and(|item| is_live(table, item, now)))?;
        rows.remove(key);
        Ok(())
    }

    async fn scan(
        &self,
        table: &TableSchema,
        request: ScanRequest,
    ) -> Result<ItemPage, BackendError> {
        let start = match &request.cursor {
            Some(cursor) => Bound::Excluded(decode_cursor(cursor)?),
            None => Bound::Unbounded,
        };
        let now = unix_now();
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table.name) else {
            return Ok(ItemPage::default());
        };

        let mut page = ItemPage::default();
        let mut examined = 0;
        let mut last = None;
        for (key, item) in
            rows.range((start, Bound::Unbounded)).filter(|(_, item)| is_live(table, item, now))
        {
            if request.limit.is_some_and(|limit| examined >= limit) {
                page.cursor = last.as_ref().map(encode_cursor).transpose()?;
                break;
            }
            examined += 1;
            last = Some(key.clone());
            if request.filter.as_ref().is_none_or(|filter| filter.matches(item)) {
                page.items.push(item.clone());
            }
        }

        trace!(target: "memory_backend", table = table.name, examined, "Scanned page");
        Ok(page)
    }

    async fn query(
        &self,
        table: &TableSchema,
        request: QueryRequest,
    ) -> Result<ItemPage, BackendError> {
        let index = match request.index {
            Some(name) => Some(table.index(name).ok_or_else(|| {
                BackendError::Other(format!("table {} has no index {name}", table.name))
            })?),
            None => None,
        };
        let after = request.cursor.as_ref().map(decode_cursor).transpose()?;
        let now = unix_now();
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table.name) else {
            return Ok(ItemPage::default());
        };

        let mut matches: Vec<(&Key, &Item)> = match index {
            Some(index) => rows
                .iter()
                .filter(|(_, item)| {
                    item.get(index.partition_key).and_then(Value::as_str) ==
                        Some(request.partition.as_str())
                })
                .collect(),
            None => rows
                .range(Key::partition(request.partition.clone())..)
                .take_while(|(key, _)| key.partition == request.partition)
                .collect(),
        };
        matches.retain(|(key, item)| request.sort.matches(key.sort) && is_live(table, item, now));
        if request.descending {
            matches.reverse();
        }
        if let Some(after) = &after {
            matches.retain(|(key, _)| if request.descending { *key < after } else { *key > after });
        }

        let mut page = ItemPage::default();
        let limit = request.limit.unwrap_or(usize::MAX).max(1);
        if matches.len() > limit {
            page.cursor = Some(encode_cursor(matches[limit - 1].0)?);
            matches.truncate(limit);
        }
        page.items = matches.into_iter().map(|(_, item)| item.clone()).collect();
        Ok(page)
    }

    async fn batch_write(
        &self,
        table: &TableSchema,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, BackendError> {
        if requests.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(BackendError::Other(format!(
                "batch of {} requests exceeds the limit of {MAX_BATCH_WRITE_ITEMS}",
                requests.len()
            )));
        }

        // Validate every request before applying any of them.
        let mut writes = Vec::with_capacity(requests.len());
        for request in requests {
            match request {
                WriteRequest::Put(item) => writes.push((table.key_of(&item)?, Some(item))),
                WriteRequest::Delete(key) => writes.push((key, None)),
            }
        }

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.name).or_default();
        for (key, item) in writes {
            match item {
                Some(item) => rows.insert(key, item),
                None => rows.remove(&key),
            };
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Filter, IndexSchema, SortCondition};
    use serde_json::json;

    const SERIES: TableSchema = TableSchema {
        name: "series",
        partition_key: "id",
        sort_key: Some("n"),
        indexes: &[IndexSchema { name: "by_owner", partition_key: "owner" }],
        ttl: Some("expires_at"),
    };

    fn row(id: &str, n: u64) -> Item {
        match json!({ "id": id, "n": n }) {
            Value::Object(item) => item,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_conditional_put_and_delete() {
        let backend = MemoryBackend::new();
        backend.put(&SERIES, row("a", 1), Some(Precondition::NotExists)).await.unwrap();

        let err =
            backend.put(&SERIES, row("a", 1), Some(Precondition::NotExists)).await.unwrap_err();
        assert_eq!(err, BackendError::ConditionFailed);

        let missing = Key::with_sort("a", 2);
        let err = backend.delete(&SERIES, &missing, Some(Precondition::Exists)).await.unwrap_err();
        assert_eq!(err, BackendError::ConditionFailed);

        backend.delete(&SERIES, &Key::with_sort("a", 1), Some(Precondition::Exists)).await.unwrap();
        assert!(backend.is_empty(&SERIES).await);
    }

    #[tokio::test]
    async fn test_update_merges_and_removes_attributes() {
        let backend = MemoryBackend::new();
        let key = Key::with_sort("a", 1);
        let mut item = row("a", 1);
        item.insert("owner".into(), json!("o1"));
        item.insert("score".into(), json!(3));
        backend.put(&SERIES, item, None).await.unwrap();

        let mut update = UpdateExpression::new();
        update.set("score", 4).remove("owner");
        backend.update(&SERIES, &key, update, Some(Precondition::Exists)).await.unwrap();

        let stored = backend.get(&SERIES, &key).await.unwrap().unwrap();
        assert_eq!(stored.get("score"), Some(&json!(4)));
        assert!(!stored.contains_key("owner"));

        let err = backend
            .update(
                &SERIES,
                &Key::with_sort("b", 1),
                UpdateExpression::new(),
                Some(Precondition::Exists),
            )
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::ConditionFailed);
    }

    #[tokio::test]
    async fn test_scan_pages_partition_the_table() {
        let backend = MemoryBackend::new();
        for n in 0..250 {
            backend.put(&SERIES, row("a", n), None).await.unwrap();
        }

        let mut cursor = None;
        let mut sizes = Vec::new();
        loop {
            let page = backend
                .scan(&SERIES, ScanRequest { cursor, limit: Some(100), ..Default::default() })
                .await
                .unwrap();
            sizes.push(page.items.len());
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_scan_filter_applies_after_limit() {
        let backend = MemoryBackend::new();
        for n in 0..10 {
            let mut item = row("a", n);
            if n % 2 == 0 {
                item.insert("owner".into(), json!("o1"));
            }
            backend.put(&SERIES, item, None).await.unwrap();
        }

        let page = backend
            .scan(
                &SERIES,
                ScanRequest { filter: Some(Filter::Exists("owner")), limit: Some(4), cursor: None },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.cursor.is_some());
    }

    #[tokio::test]
    async fn test_query_orders_and_paginates() {
        let backend = MemoryBackend::new();
        for n in [3, 7, 2, 9] {
            backend.put(&SERIES, row("a", n), None).await.unwrap();
        }
        backend.put(&SERIES, row("b", 100), None).await.unwrap();

        let request = QueryRequest::partition("a").descending().limit(3);
        let page = backend.query(&SERIES, request.clone()).await.unwrap();
        let slots: Vec<_> = page.items.iter().map(|i| i["n"].as_u64().unwrap()).collect();
        assert_eq!(slots, vec![9, 7, 3]);

        let page = backend.query(&SERIES, request.cursor(page.cursor)).await.unwrap();
        let slots: Vec<_> = page.items.iter().map(|i| i["n"].as_u64().unwrap()).collect();
        assert_eq!(slots, vec![2]);
        assert!(page.cursor.is_none());

        let page = backend
            .query(&SERIES, QueryRequest::partition("a").sort(SortCondition::AtLeast(7)))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_query_by_index() {
        let backend = MemoryBackend::new();
        for (id, owner) in [("a", "o1"), ("b", "o2"), ("c", "o1")] {
            let mut item = row(id, 0);
            item.insert("owner".into(), json!(owner));
            backend.put(&SERIES, item, None).await.unwrap();
        }

        let page = backend.query(&SERIES, QueryRequest::index("by_owner", "o1")).await.unwrap();
        assert_eq!(page.items.len(), 2);

        let err = backend.query(&SERIES, QueryRequest::index("missing", "o1")).await.unwrap_err();
        assert!(matches!(err, BackendError::Other(_)));
    }

    #[tokio::test]
    async fn test_expired_items_are_invisible() {
        let backend = MemoryBackend::new();
        let mut item = row("a", 1);
        item.insert("expires_at".into(), json!(1));
        backend.put(&SERIES, item, None).await.unwrap();

        assert!(backend.get(&SERIES, &Key::with_sort("a", 1)).await.unwrap().is_none());
        assert!(backend.is_empty(&SERIES).await);
        // An expired item no longer blocks a create.
        backend.put(&SERIES, row("a", 1), Some(Precondition::NotExists)).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_write_limit() {
        let backend = MemoryBackend::new();
        let requests: Vec<_> = (0..26).map(|n| WriteRequest::Put(row("a", n))).collect();
        let err = backend.batch_write(&SERIES, requests).await.unwrap_err();
        assert!(matches!(err, BackendError::Other(_)));

        let requests: Vec<_> = (0..25).map(|n| WriteRequest::Put(row("a", n))).collect();
        let unprocessed = backend.batch_write(&SERIES, requests).await.unwrap();
        assert!(unprocessed.is_empty());
        assert_eq!(backend.len(&SERIES).await, 25);
    }
}
