#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
pub use config::Config;

mod error;
pub use error::{ConfigError, ObserverError, ReconcileError};

mod metrics;
pub use metrics::Metrics;

mod observer;
pub use observer::{ChainObserver, EpochReport, ValidatorOutcomes};

mod reconciler;
pub use reconciler::{EpochSummary, HistoryReconciler};

mod sync;
pub use sync::SyncService;
