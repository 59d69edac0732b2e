//! Global arguments for the CLI.

use anyhow::{Context as _, Result};
use clap::Parser;
use std::path::PathBuf;
use valwatch_cli::{LogArgs, LogConfig, MetricsArgs};
use valwatch_core::Config;

/// Global arguments for the CLI.
#[derive(Parser, Default, Clone, Debug)]
pub struct GlobalArgs {
    /// Logging arguments.
    #[command(flatten)]
    pub log_args: LogArgs,
    /// Prometheus CLI arguments.
    #[command(flatten)]
    pub metrics: MetricsArgs,
    /// Path to a TOML configuration file.
    #[arg(long, short = 'c', global = true, env = "VALWATCH_CONFIG")]
    pub config: Option<PathBuf>,
    /// Overrides the network name from the configuration file.
    #[arg(long, global = true, env = "VALWATCH_NETWORK")]
    pub network: Option<String>,
}

impl GlobalArgs {
    /// Initializes logging and, when enabled, the metrics exporter.
    pub fn init_stack(&self) -> Result<()> {
        LogConfig::new(self.log_args.clone()).init_tracing_subscriber(None)?;
        self.metrics.init_metrics()?;
        valwatch_core::Metrics::init();
        Ok(())
    }

    /// Loads the engine configuration, applying flag overrides.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).with_context(|| {
                format!("Failed to load config file '{}'", path.display())
            })?,
            None => Config::default(),
        };
        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let args = GlobalArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.load_config().unwrap(), Config::default());
    }

    #[test]
    fn test_network_flag_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network = \"holesky\"\nstart_epoch = 5").unwrap();
        let path = file.path().to_str().unwrap();

        let args = GlobalArgs::try_parse_from(["test", "-c", path]).unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.network, "holesky");
        assert_eq!(config.start_epoch, 5);

        let args =
            GlobalArgs::try_parse_from(["test", "-c", path, "--network", "hoodi"]).unwrap();
        assert_eq!(args.load_config().unwrap().network, "hoodi");
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let args = GlobalArgs::try_parse_from(["test", "-c", "/nope/valwatch.toml"]).unwrap();
        let err = args.load_config().unwrap_err();
        assert!(err.to_string().contains("/nope/valwatch.toml"));
    }
}
