//! A [`ChainObserver`] backed by a JSON file of epoch reports.

use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tokio::sync::RwLock;
use tracing::debug;
use valwatch_core::{ChainObserver, EpochReport, ObserverError};

/// Serves epoch reports from a JSON array on disk.
///
/// The file is re-read whenever the latest epoch is requested, so reports appended while
/// the sync service is running are picked up on its next pass.
///
/// Epochs missing between the first and the last report are served as empty reports;
/// epochs outside that range are not found.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    reports: RwLock<BTreeMap<u64, EpochReport>>,
}

impl FileObserver {
    /// Loads the reports at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ObserverError> {
        let path = path.as_ref().to_path_buf();
        let reports = read_reports(&path).await?;
        Ok(Self { path, reports: RwLock::new(reports) })
    }

    /// Returns the number of distinct epochs loaded.
    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    /// Returns the earliest epoch loaded.
    pub async fn first_epoch(&self) -> Option<u64> {
        self.reports.read().await.first_key_value().map(|(epoch, _)| *epoch)
    }

    /// Returns `true` if no report has been loaded.
    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }
}

async fn read_reports(path: &Path) -> Result<BTreeMap<u64, EpochReport>, ObserverError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|err| ObserverError::Unavailable(format!("{}: {err}", path.display())))?;
    let reports: Vec<EpochReport> = serde_json::from_slice(&contents)
        .map_err(|err| ObserverError::Unavailable(format!("{}: {err}", path.display())))?;

    // A later report for the same epoch replaces the earlier one.
    Ok(reports.into_iter().map(|report| (report.epoch, report)).collect())
}

#[async_trait]
impl ChainObserver for FileObserver {
    async fn latest_epoch(&self) -> Result<u64, ObserverError> {
        let reports = read_reports(&self.path).await?;
        debug!(target: "file_observer", epochs = reports.len(), "Reloaded epoch reports");

        let mut cached = self.reports.write().await;
        *cached = reports;
        cached.last_key_value().map(|(epoch, _)| *epoch).ok_or_else(|| {
            ObserverError::Unavailable(format!("{}: no reports", self.path.display()))
        })
    }

    async fn epoch_report(&self, epoch: u64) -> Result<EpochReport, ObserverError> {
        let reports = self.reports.read().await;
        if let Some(report) = reports.get(&epoch) {
            return Ok(report.clone());
        }

        let first = reports.first_key_value().map(|(first, _)| *first);
        let last = reports.last_key_value().map(|(last, _)| *last);
        match (first, last) {
            (Some(first), Some(last)) if first < epoch && epoch < last => {
                debug!(target: "file_observer", epoch, "No report for epoch, serving it empty");
                Ok(EpochReport { epoch, validators: Vec::new() })
            }
            _ => Err(ObserverError::EpochNotFound(epoch)),
        }
    }
}
