//! Contains the valwatch CLI.

use crate::{commands::ReplayCommand, flags::GlobalArgs};
use anyhow::Result;
use clap::{Parser, Subcommand};

/// Subcommands for the CLI.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Reconciles a file of epoch reports and prints the resulting history.
    Replay(ReplayCommand),
}

/// The valwatch CLI.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global arguments for the CLI.
    #[command(flatten)]
    pub global: GlobalArgs,
    /// The subcommand to run.
    #[command(subcommand)]
    pub subcommand: Commands,
}

impl Cli {
    /// Runs the CLI.
    pub async fn run(self) -> Result<()> {
        self.global.init_stack()?;

        match self.subcommand {
            Commands::Replay(replay) => replay.run(&self.global).await,
        }
    }
}
