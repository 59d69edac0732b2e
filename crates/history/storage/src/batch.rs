//! Chunked, throttle-aware batch writes.

use crate::{
    Backend, BackendError, BatchConfig, Key, Metrics, Record, RecordStore, StorageError,
    TableSchema, WriteRequest,
};
use backon::{BackoffBuilder, ExponentialBuilder};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// Summary of a completed batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of requests applied.
    pub written: usize,
    /// Number of chunks accepted by the backend.
    pub chunks: usize,
    /// Backoff delays slept after throttled chunks, in order.
    pub backoffs: Vec<Duration>,
    /// Number of items re-queued after the backend left them unprocessed.
    pub redriven: usize,
}

/// Writes lists of put / delete requests in chunks the backend accepts.
///
/// - Requests are split into chunks of at most
///   [`MAX_BATCH_WRITE_ITEMS`](crate::MAX_BATCH_WRITE_ITEMS), scaled down for large batches
///   (see [`BatchConfig::scaled_for`]).
/// - A throttled chunk is resubmitted after an exponential backoff, up to
///   [`BatchConfig::max_retries`] times.
/// - Items the backend leaves unprocessed are appended to the queue and go out with a
///   later chunk. The batch only fails once [`BatchConfig::max_redrives`] chunks in a row
///   came back without a single item applied.
/// - Any other error aborts the batch. Chunks already accepted stay applied.
/// - Consecutive chunks are separated by [`BatchConfig::chunk_pause`].
#[derive(Debug, Clone)]
pub struct BatchWriter {
    backend: Arc<dyn Backend>,
    config: BatchConfig,
}

impl BatchWriter {
    /// Creates a new [`BatchWriter`].
    pub fn new(backend: Arc<dyn Backend>, config: BatchConfig) -> Self {
        Self { backend, config }
    }

    /// Writes every record unconditionally.
    pub async fn put_all<R: Record>(&self, records: &[R]) -> Result<BatchReport, StorageError> {
        let requests = records
            .iter()
            .map(|record| RecordStore::<R>::encode(record).map(WriteRequest::Put))
            .collect::<Result<Vec<_>, _>>()?;
        self.write(&R::TABLE, requests).await
    }

    /// Deletes every key from the table of `R`.
    pub async fn delete_all<R: Record>(&self, keys: Vec<Key>) -> Result<BatchReport, StorageError> {
        self.write(&R::TABLE, keys.into_iter().map(WriteRequest::Delete).collect()).await
    }

    /// Writes `requests` to `table`.
    pub async fn write(
        &self,
        table: &TableSchema,
        requests: Vec<WriteRequest>,
    ) -> Result<BatchReport, StorageError> {
        let mut report = BatchReport::default();
        if requests.is_empty() {
            return Ok(report);
        }

        let config = self.config.scaled_for(requests.len());
        debug!(
            target: "batch_writer",
            table = table.name,
            total = requests.len(),
            chunk_size = config.max_chunk_size,
            "Starting batch write"
        );

        let mut queue = VecDeque::from(requests);
        let mut stalled = 0;
        while !queue.is_empty() {
            if report.chunks > 0 && !config.chunk_pause.is_zero() {
                tokio::time::sleep(config.chunk_pause).await;
            }

            let size = config.max_chunk_size.min(queue.len());
            let chunk: Vec<WriteRequest> = queue.drain(..size).collect();
            let unprocessed = self.submit_chunk(table, &config, chunk, &mut report).await?;
            report.chunks += 1;
            report.written += size - unprocessed.len();
            Metrics::record_chunk(table.name);

            if unprocessed.len() < size {
                stalled = 0;
            } else {
                stalled += 1;
            }
            if !unprocessed.is_empty() {
                if stalled > config.max_redrives {
                    let remaining = unprocessed.len() + queue.len();
                    error!(
                        target: "batch_writer",
                        table = table.name,
                        remaining,
                        "Unprocessed items remain after the redrive limit"
                    );
                    return Err(StorageError::UnprocessedItems { remaining });
                }
                warn!(
                    target: "batch_writer",
                    table = table.name,
                    unprocessed = unprocessed.len(),
                    stalled,
                    "Backend left items unprocessed, re-queueing"
                );
                Metrics::record_redrive(table.name, unprocessed.len());
                report.redriven += unprocessed.len();
                queue.extend(unprocessed);
            }
        }

        debug!(
            target: "batch_writer",
            table = table.name,
            written = report.written,
            chunks = report.chunks,
            throttled = report.backoffs.len(),
            "Batch write complete"
        );
        Ok(report)
    }

    /// Submits a single chunk, retrying it while the backend throttles.
    ///
    /// Returns the requests the backend left unprocessed.
    async fn submit_chunk(
        &self,
        table: &TableSchema,
        config: &BatchConfig,
        chunk: Vec<WriteRequest>,
        report: &mut BatchReport,
    ) -> Result<Vec<WriteRequest>, StorageError> {
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(config.base_backoff)
            .with_max_delay(config.max_backoff)
            .with_max_times(config.max_retries)
            .build();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.backend.batch_write(table, chunk.clone()).await {
                Ok(unprocessed) => return Ok(unprocessed),
                Err(BackendError::Throttled) => {
                    let Some(delay) = backoff.next() else {
                        error!(
                            target: "batch_writer",
                            table = table.name,
                            attempts,
                            "Chunk still throttled after the retry limit"
                        );
                        return Err(StorageError::RetriesExhausted { attempts });
                    };
                    warn!(
                        target: "batch_writer",
                        table = table.name,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Chunk throttled, backing off"
                    );
                    Metrics::record_throttle(table.name, delay);
                    report.backoffs.push(delay);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(target: "batch_writer", table = table.name, %err, "Batch write failed");
                    return Err(err.into());
                }
            }
        }
    }
}
