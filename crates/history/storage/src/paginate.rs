//! Exhaustive pagination over cursor-based reads.
//!
//! Aggregates over a collection are only exact if every page is visited exactly once.
//! The helpers here follow the continuation cursor until the backend returns `None`,
//! accumulate into a map keyed by record identity (so an item served twice never
//! counts twice) and only then hand the result back for the final computation.

use crate::{Filter, Key, QueryRequest, Record, RecordStore, ScanRequest, StorageError};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    hash::Hash,
};
use tracing::trace;
use valwatch_types::{Cursor, Page};

/// Fetches pages with `fetch` until the final page, passing each page's items to `visit`.
///
/// Returns the number of pages fetched. Fails if the backend hands back the cursor it
/// was just given, which would otherwise loop forever.
pub async fn for_each_page<T, F, Fut>(
    mut fetch: F,
    mut visit: impl FnMut(Vec<T>),
) -> Result<usize, StorageError>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>, StorageError>>,
{
    let mut cursor: Option<Cursor> = None;
    let mut pages = 0;
    loop {
        let page = fetch(cursor.clone()).await?;
        pages += 1;
        trace!(target: "paginate", pages, items = page.items.len(), "Fetched page");
        visit(page.items);

        match page.next {
            Some(next) if cursor.as_ref() == Some(&next) => {
                return Err(StorageError::Backend(format!("cursor {next} did not advance")));
            }
            Some(next) => cursor = Some(next),
            None => return Ok(pages),
        }
    }
}

/// Collects every page into a map keyed by `key`. Later duplicates replace earlier ones.
pub async fn collect_keyed<T, K, F, Fut>(
    fetch: F,
    key: impl Fn(&T) -> K,
) -> Result<HashMap<K, T>, StorageError>
where
    K: Eq + Hash,
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>, StorageError>>,
{
    let mut collected = HashMap::new();
    for_each_page(fetch, |items| {
        for item in items {
            collected.insert(key(&item), item);
        }
    })
    .await?;
    Ok(collected)
}

impl<R: Record> RecordStore<R> {
    /// Scans the whole table, page by page, keyed by primary key.
    pub async fn scan_all(
        &self,
        filter: Option<Filter>,
        page_size: usize,
    ) -> Result<HashMap<Key, R>, StorageError> {
        collect_keyed(
            move |cursor| {
                self.scan(ScanRequest { filter: filter.clone(), cursor, limit: Some(page_size) })
            },
            R::key,
        )
        .await
    }

    /// Counts the records of the table by scanning every page.
    pub async fn count_all(&self, page_size: usize) -> Result<usize, StorageError> {
        let mut seen = HashSet::new();
        for_each_page(
            |cursor| self.scan(ScanRequest { filter: None, cursor, limit: Some(page_size) }),
            |items| seen.extend(items.iter().map(R::key)),
        )
        .await?;
        Ok(seen.len())
    }

    /// Runs `request` to completion, returning every match in query order.
    ///
    /// The request's `limit` is used as the page size.
    pub async fn query_all(&self, request: QueryRequest) -> Result<Vec<R>, StorageError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for_each_page(
            move |cursor| self.query(request.clone().cursor(cursor)),
            |items| {
                for item in items {
                    if seen.insert(item.key()) {
                        records.push(item);
                    }
                }
            },
        )
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, Precondition};
    use std::sync::Arc;
    use valwatch_types::{Validator, ValidatorAddress};

    async fn seeded(count: usize) -> RecordStore<Validator> {
        let store = RecordStore::new(Arc::new(MemoryBackend::new()));
        for i in 0..count {
            let validator = Validator::new(ValidatorAddress::from(format!("0x{i:04x}")), 1);
            store.put(&validator, Some(Precondition::NotExists)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_pages_partition_the_corpus() {
        let store = seeded(250).await;

        let mut seen = Vec::new();
        let pages = for_each_page(
            |cursor| store.scan(ScanRequest { filter: None, cursor, limit: Some(100) }),
            |items: Vec<Validator>| seen.extend(items.into_iter().map(|v| v.address)),
        )
        .await
        .unwrap();

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 250);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 250);
    }

    #[tokio::test]
    async fn test_count_all_matches_fixture() {
        for size in [0, 1, 99, 100, 101, 250] {
            let store = seeded(size).await;
            assert_eq!(store.count_all(100).await.unwrap(), size);
            assert_eq!(store.scan_all(None, 7).await.unwrap().len(), size);
        }
    }

    #[tokio::test]
    async fn test_collect_keyed_deduplicates_across_pages() {
        // The same record served on two pages is only counted once.
        let pages = vec![
            Page::new(vec![1u64, 2, 3], Some(Cursor::new("a"))),
            Page::new(vec![3, 4], Some(Cursor::new("b"))),
            Page::new(vec![4, 5], None),
        ];
        let mut pages = pages.into_iter();
        let collected = collect_keyed(
            |_| {
                let page = pages.next().unwrap_or_default();
                async move { Ok(page) }
            },
            |n| *n,
        )
        .await
        .unwrap();
        assert_eq!(collected.len(), 5);
    }

    #[tokio::test]
    async fn test_stuck_cursor_is_an_error() {
        let err = for_each_page(
            |_| async { Ok(Page::new(vec![1u8], Some(Cursor::new("same")))) },
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
