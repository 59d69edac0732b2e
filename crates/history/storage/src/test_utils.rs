//! Test utilities for the storage layer.

use crate::{
    Backend, BackendError, ItemPage, Key, MemoryBackend, Precondition, QueryRequest,
    ScanRequest, TableSchema, UpdateExpression, WriteRequest, backend::Item,
};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// A [`MemoryBackend`] with scriptable failures.
///
/// Every knob applies to subsequent calls only. Counters are cumulative.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    inner: MemoryBackend,
    throttle_batches: AtomicUsize,
    unprocessed_batches: AtomicUsize,
    fail_batches: AtomicBool,
    failing_partitions: Mutex<HashSet<String>>,
    failing_queries: Mutex<HashSet<String>>,
    latency: Option<Duration>,
    batch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    /// Creates a new [`ScriptedBackend`] that behaves like an empty [`MemoryBackend`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call sleep for `latency` before being served.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the wrapped [`MemoryBackend`].
    pub const fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Throttles the next `count` batch writes.
    pub fn throttle_batches(&self, count: usize) {
        self.throttle_batches.store(count, Ordering::SeqCst);
    }

    /// Leaves the last request of the next `count` batch writes unprocessed.
    pub fn leave_unprocessed(&self, count: usize) {
        self.unprocessed_batches.store(count, Ordering::SeqCst);
    }

    /// Fails every subsequent batch write with a non-retryable error.
    pub fn fail_batches(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }

    /// Fails every read of `partition` with a non-retryable error.
    pub fn fail_reads_for(&self, partition: impl Into<String>) {
        self.failing_partitions.lock().unwrap().insert(partition.into());
    }

    /// Fails every query of `partition`, leaving single-item reads alone.
    pub fn fail_queries_for(&self, partition: impl Into<String>) {
        self.failing_queries.lock().unwrap().insert(partition.into());
    }

    /// Clears every scripted failure.
    pub fn recover(&self) {
        self.fail_batches.store(false, Ordering::SeqCst);
        self.failing_partitions.lock().unwrap().clear();
        self.failing_queries.lock().unwrap().clear();
    }

    /// Number of batch writes received, including throttled ones.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_partition(&self, partition: &str) -> Result<(), BackendError> {
        if self.failing_partitions.lock().unwrap().contains(partition) {
            return Err(BackendError::Other(format!("scripted failure for {partition}")));
        }
        Ok(())
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn get(&self, table: &TableSchema, key: &Key) -> Result<Option<Item>, BackendError> {
        let _guard = self.enter().await;
        self.check_partition(&key.partition)?;
        self.inner.get(table, key).await
    }

    async fn put(
        &self,
        table: &TableSchema,
        item: Item,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError> {
        let _guard = self.enter().await;
        self.inner.put(table, item, precondition).await
    }

    async fn update(
        &self,
        table: &TableSchema,
        key: &Key,
        update: UpdateExpression,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError> {
        let _guard = self.enter().await;
        self.inner.update(table, key, update, precondition).await
    }

    async fn delete(
        &self,
        table: &TableSchema,
        key: &Key,
        precondition: Option<Precondition>,
    ) -> Result<(), BackendError> {
        let _guard = self.enter().await;
        self.inner.delete(table, key, precondition).await
    }

    async fn scan(
        &self,
        table: &TableSchema,
        request: ScanRequest,
    ) -> Result<ItemPage, BackendError> {
        let _guard = self.enter().await;
        self.inner.scan(table, request).await
    }

    async fn query(
        &self,
        table: &TableSchema,
        request: QueryRequest,
    ) -> Result<ItemPage, BackendError> {
        let _guard = self.enter().await;
        self.check_partition(&request.partition)?;
        if self.failing_queries.lock().unwrap().contains(&request.partition) {
            let message = format!("scripted query failure for {}", request.partition);
            return Err(BackendError::Other(message));
        }
        self.inner.query(table, request).await
    }

    async fn batch_write(
        &self,
        table: &TableSchema,
        mut requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, BackendError> {
        let _guard = self.enter().await;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(BackendError::Other("scripted batch failure".to_string()));
        }
        if Self::take(&self.throttle_batches) {
            return Err(BackendError::Throttled);
        }

        let held_back = if Self::take(&self.unprocessed_batches) {
            requests.pop().into_iter().collect()
        } else {
            Vec::new()
        };
        let mut unprocessed = self.inner.batch_write(table, requests).await?;
        unprocessed.extend(held_back);
        Ok(unprocessed)
    }
}
