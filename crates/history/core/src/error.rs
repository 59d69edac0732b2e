use thiserror::Error;
use valwatch_storage::StorageError;

/// Errors reported by a [`ChainObserver`](crate::ChainObserver).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    /// The observer has no report for the requested epoch.
    #[error("no report for epoch {0}")]
    EpochNotFound(u64),

    /// The observer could not be reached or returned garbage.
    #[error("observer unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort the reconciliation of an epoch.
///
/// Failures of individual validators do not abort an epoch; they are reported in the
/// [`EpochSummary`](crate::EpochSummary).
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The chain observer failed.
    #[error(transparent)]
    Observer(#[from] ObserverError),

    /// Storage failed outside of per-validator work.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors while loading the [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`Config`](crate::Config).
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
