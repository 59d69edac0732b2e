//! Replay Subcommand

use crate::{flags::GlobalArgs, observer::FileObserver};
use anyhow::{Context as _, Result};
use clap::Parser;
use serde_json::{Value, json};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use valwatch_core::{Config, EpochSummary, HistoryReconciler, SyncService};
use valwatch_storage::MemoryBackend;

/// The `replay` Subcommand
///
/// Reconciles a JSON array of epoch reports into an in-memory store and prints every
/// validator with its most recent history, followed by the latest network stats snapshot.
///
/// # Usage
///
/// ```sh
/// valwatch replay [OPTIONS] <REPORTS>
/// ```
#[derive(Parser, Default, PartialEq, Eq, Debug, Clone)]
#[command(about = "Reconciles a file of epoch reports and prints the resulting history")]
pub struct ReplayCommand {
    /// JSON file holding an array of epoch reports.
    pub reports: PathBuf,
    /// Keep polling the file for new epochs until interrupted.
    #[arg(long)]
    pub follow: bool,
    /// Number of history entries printed per validator.
    #[arg(long, default_value_t = 10)]
    pub history: usize,
}

impl ReplayCommand {
    /// Runs the subcommand.
    pub async fn run(self, args: &GlobalArgs) -> Result<()> {
        let config = args.load_config()?;
        let service = self.service(&config).await?;

        if self.follow {
            let cancel = CancellationToken::new();
            let signal = cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(target: "replay", %err, "Failed to listen for shutdown signal");
                }
                signal.cancel();
            });
            service.run(cancel).await;
        } else {
            let summaries = service.sync_to_head().await.context("Replay stopped early")?;
            for summary in &summaries {
                print_summary(summary);
            }
        }

        let output = self.render(service.reconciler()).await?;
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    /// Builds a [`SyncService`] over a fresh in-memory store fed by the reports file.
    ///
    /// Replay starts at the earliest epoch in the file unless the configured start epoch
    /// is later.
    pub async fn service(&self, config: &Config) -> Result<SyncService> {
        let observer = FileObserver::load(&self.reports).await.with_context(|| {
            format!("Failed to read epoch reports from '{}'", self.reports.display())
        })?;
        info!(
            target: "replay",
            path = %self.reports.display(),
            epochs = observer.len().await,
            network = %config.network,
            "Loaded epoch reports"
        );

        let mut config = config.clone();
        if let Some(first) = observer.first_epoch().await {
            config.start_epoch = config.start_epoch.max(first);
        }

        let backend = Arc::new(MemoryBackend::new());
        let reconciler = HistoryReconciler::new(backend, &config.network, &config.storage);
        Ok(SyncService::from_config(Arc::new(observer), reconciler, &config))
    }

    /// Renders the reconciled state as JSON.
    pub async fn render(&self, reconciler: &HistoryReconciler) -> Result<Value> {
        let validators = reconciler.validators().list_all().await?;
        let validators = reconciler.validators().attach_history(validators, self.history).await;
        let stats = reconciler.stats().current().await?;

        let validators = validators
            .into_iter()
            .map(|entry| json!({ "validator": entry.validator, "history": entry.history }))
            .collect::<Vec<_>>();
        Ok(json!({ "validators": validators, "stats": stats }))
    }
}

fn print_summary(summary: &EpochSummary) {
    println!(
        "epoch {}: {} validators, {} created, {} updated, {} repaired, {} skipped, {} entries",
        summary.epoch,
        summary.validators,
        summary.created,
        summary.updated,
        summary.repaired,
        summary.skipped,
        summary.inserted,
    );
    if !summary.is_complete() {
        let failed = summary.failed.iter().map(|address| address.as_str()).collect::<Vec<_>>();
        println!("  failed: {}", failed.join(", "));
    }
}
