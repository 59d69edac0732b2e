//! Bounded per-entity concurrency.

use crate::{FanOutConfig, Metrics, StorageError};
use futures::future::join_all;
use std::{collections::HashMap, fmt::Debug, future::Future, hash::Hash};
use tracing::{debug, warn};

/// Runs one asynchronous operation per key, at most
/// [`FanOutConfig::concurrency`] at a time.
///
/// Keys are processed in groups; each group is awaited in full before the next one
/// starts, with [`FanOutConfig::group_pause`] in between. A failing operation never
/// affects the others: its key maps to `None` in the result.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    config: FanOutConfig,
}

impl FanOut {
    /// Creates a new [`FanOut`].
    pub const fn new(config: FanOutConfig) -> Self {
        Self { config }
    }

    /// Runs `op` for every key and collects the results.
    pub async fn run<K, T, F, Fut>(&self, keys: Vec<K>, op: F) -> HashMap<K, Option<T>>
    where
        K: Clone + Eq + Hash + Debug,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let group_size = self.config.concurrency.max(1);
        let mut results = HashMap::with_capacity(keys.len());

        for (index, group) in keys.chunks(group_size).enumerate() {
            if index > 0 && !self.config.group_pause.is_zero() {
                tokio::time::sleep(self.config.group_pause).await;
            }
            debug!(target: "fan_out", group = index, size = group.len(), "Running group");

            let outcomes = join_all(group.iter().cloned().map(&op)).await;
            for (key, outcome) in group.iter().cloned().zip(outcomes) {
                let value = outcome
                    .inspect_err(|err| {
                        warn!(target: "fan_out", ?key, %err, "Operation failed");
                        Metrics::record_fan_out_failure();
                    })
                    .ok();
                results.insert(key, value);
            }
        }

        results
    }
}
