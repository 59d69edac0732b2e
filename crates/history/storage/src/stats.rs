//! Per-epoch network stats snapshots.

use crate::{
    Backend, Key, QueryRequest, Record, RecordStore, SortCondition, StorageConfig, StorageError,
    TableSchema, tables,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use valwatch_types::{NetworkStatsSnapshot, Validator, unix_now};

impl Record for NetworkStatsSnapshot {
    const TABLE: TableSchema = tables::NETWORK_STATS;

    fn key(&self) -> Key {
        Key::with_sort(self.network.as_str(), self.epoch)
    }
}

/// Stores one [`NetworkStatsSnapshot`] per epoch for a single network.
///
/// Snapshots expire `stats_retention` after they are computed.
#[derive(Debug, Clone)]
pub struct NetworkStatsRepository {
    records: RecordStore<NetworkStatsSnapshot>,
    validators: RecordStore<Validator>,
    network: String,
    retention: Duration,
    page_size: usize,
}

impl NetworkStatsRepository {
    /// Creates a new [`NetworkStatsRepository`] for `network`.
    pub fn new(
        backend: Arc<dyn Backend>,
        network: impl Into<String>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            records: RecordStore::new(backend.clone()),
            validators: RecordStore::new(backend),
            network: network.into(),
            retention: config.stats_retention,
            page_size: config.page_size.max(1),
        }
    }

    /// The network this repository stores snapshots for.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Writes `snapshot`, replacing any snapshot for the same epoch.
    pub async fn upsert(&self, snapshot: &NetworkStatsSnapshot) -> Result<(), StorageError> {
        self.records.put(snapshot, None).await?;
        debug!(
            target: "network_stats",
            network = %self.network,
            epoch = snapshot.epoch,
            "Stored network stats snapshot"
        );
        Ok(())
    }

    /// Returns the snapshot of the most recent epoch.
    pub async fn current(&self) -> Result<Option<NetworkStatsSnapshot>, StorageError> {
        let page = self
            .records
            .query(QueryRequest::partition(self.network.as_str()).descending().limit(1))
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Returns the snapshots of epochs `from_epoch..=to_epoch`, oldest first.
    pub async fn range(
        &self,
        from_epoch: u64,
        to_epoch: u64,
    ) -> Result<Vec<NetworkStatsSnapshot>, StorageError> {
        if from_epoch > to_epoch {
            return Ok(Vec::new());
        }
        self.records
            .query_all(
                QueryRequest::partition(self.network.as_str())
                    .sort(SortCondition::Between(from_epoch, to_epoch))
                    .limit(self.page_size),
            )
            .await
    }

    /// Computes a snapshot for `epoch` from the whole validator corpus.
    pub async fn compute(
        &self,
        epoch: u64,
        last_synced_slot: Option<u64>,
    ) -> Result<NetworkStatsSnapshot, StorageError> {
        let validators = self.validators.scan_all(None, self.page_size).await?;
        let created_at = unix_now();
        let mut snapshot = NetworkStatsSnapshot {
            network: self.network.clone(),
            epoch,
            total_validators: validators.len() as u64,
            last_synced_slot,
            created_at,
            expires_at: created_at.saturating_add(self.retention.as_secs()),
            ..Default::default()
        };

        for validator in validators.values() {
            if validator.is_claimed() {
                snapshot.claimed_validators += 1;
            }
            let Some(peer) = &validator.peer else { continue };
            if peer.synced == Some(true) {
                snapshot.synced_peers += 1;
            }
            for (distribution, label) in [
                (&mut snapshot.countries, &peer.country),
                (&mut snapshot.clients, &peer.client),
                (&mut snapshot.isps, &peer.isp),
            ] {
                if let Some(label) = label {
                    *distribution.entry(label.clone()).or_default() += 1;
                }
            }
        }

        info!(
            target: "network_stats",
            network = %self.network,
            epoch,
            total = snapshot.total_validators,
            claimed = snapshot.claimed_validators,
            "Computed network stats"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, ValidatorRepository};
    use valwatch_types::{OperatorId, PeerInfo, ValidatorPatch, ValidatorStatsUpdate};

    fn config() -> StorageConfig {
        StorageConfig { page_size: 3, ..Default::default() }
    }

    fn snapshot(epoch: u64, expires_at: u64) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            network: "mainnet".to_string(),
            epoch,
            created_at: 1,
            expires_at,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_current_and_range() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let stats = NetworkStatsRepository::new(backend.clone(), "mainnet", &config());
        let other = NetworkStatsRepository::new(backend, "testnet", &config());
        let far = unix_now() + 3_600;
        for epoch in 1..=8 {
            stats.upsert(&snapshot(epoch, far)).await.unwrap();
        }

        assert_eq!(stats.current().await.unwrap().map(|s| s.epoch), Some(8));
        assert!(other.current().await.unwrap().is_none());
        let epochs: Vec<u64> =
            stats.range(2, 6).await.unwrap().iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![2, 3, 4, 5, 6]);
        assert!(stats.range(6, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_snapshots_are_invisible() {
        let stats = NetworkStatsRepository::new(
            Arc::new(MemoryBackend::new()),
            "mainnet",
            &config(),
        );
        stats.upsert(&snapshot(1, unix_now() + 3_600)).await.unwrap();
        stats.upsert(&snapshot(2, 1)).await.unwrap();

        assert_eq!(stats.current().await.unwrap().map(|s| s.epoch), Some(1));
    }

    #[tokio::test]
    async fn test_compute_counts_each_validator_once() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let validators = ValidatorRepository::new(backend.clone(), &config());
        let stats = NetworkStatsRepository::new(backend, "mainnet", &config());

        let peers = [
            ("0xa", "DE", "lighthouse", true),
            ("0xb", "DE", "prysm", false),
            ("0xc", "US", "lighthouse", true),
            ("0xd", "FR", "teku", true),
        ];
        for (address, country, client, synced) in peers {
            validators.create(&Validator::new(address.into(), 1)).await.unwrap();
            let update = ValidatorStatsUpdate {
                patch: ValidatorPatch {
                    peer: Some(PeerInfo {
                        country: Some(country.into()),
                        client: Some(client.into()),
                        synced: Some(synced),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                history: vec![],
            };
            validators.update_stats(&address.into(), &update).await.unwrap();
        }
        validators.create(&Validator::new("0xe".into(), 1)).await.unwrap();
        validators.set_operator(&"0xa".into(), Some(&OperatorId::new("op"))).await.unwrap();

        let snapshot = stats.compute(12, Some(400)).await.unwrap();
        assert_eq!(snapshot.total_validators, 5);
        assert_eq!(snapshot.claimed_validators, 1);
        assert_eq!(snapshot.synced_peers, 3);
        assert_eq!(snapshot.countries["DE"], 2);
        assert_eq!(snapshot.clients["lighthouse"], 2);
        assert!(snapshot.isps.is_empty());
        assert_eq!(snapshot.last_synced_slot, Some(400));
        assert_eq!(snapshot.expires_at - snapshot.created_at, 30 * 24 * 60 * 60);
    }
}
