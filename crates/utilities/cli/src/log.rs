//! Logging flags and subscriber initialisation.

use crate::{CliError, CliResult};
use clap::{ArgAction, Args};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Logging arguments.
#[derive(Args, Default, Clone, Debug, PartialEq, Eq)]
pub struct LogArgs {
    /// Verbosity level (0-2). `RUST_LOG` directives take precedence.
    #[arg(long = "verbosity", short = 'v', action = ArgAction::Count, global = true)]
    pub verbosity: u8,
    /// Disables ANSI colors in log output.
    #[arg(long = "log.no-color", global = true, env = "VALWATCH_LOG_NO_COLOR")]
    pub no_color: bool,
}

impl LogArgs {
    /// The default level for the verbosity count.
    pub const fn level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Installs the global `tracing` subscriber from [`LogArgs`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    args: LogArgs,
}

impl LogConfig {
    /// Creates a new [`LogConfig`].
    pub const fn new(args: LogArgs) -> Self {
        Self { args }
    }

    /// Installs a `fmt` subscriber.
    ///
    /// Without an explicit `filter`, the level comes from the verbosity flag and is
    /// refined by `RUST_LOG`.
    pub fn init_tracing_subscriber(&self, filter: Option<EnvFilter>) -> CliResult<()> {
        let filter = filter.unwrap_or_else(|| {
            EnvFilter::builder().with_default_directive(self.args.level().into()).from_env_lossy()
        });

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(!self.args.no_color)
            .try_init()
            .map_err(|err| CliError::TracingInitialization(err.to_string()))
    }
}
