#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod backend;
pub use backend::{
    Backend, BackendError, Filter, IndexSchema, Item, ItemPage, Key, MAX_BATCH_WRITE_ITEMS,
    MemoryBackend, Precondition, QueryRequest, ScanRequest, SortCondition, TableSchema,
    UpdateExpression, WriteRequest,
};

mod batch;
pub use batch::{BatchReport, BatchWriter};

mod config;
pub use config::{BatchConfig, FanOutConfig, StorageConfig};

mod error;
pub use error::StorageError;

mod fanout;
pub use fanout::FanOut;

mod history;
pub use history::{HistoryStore, OverwriteReport};

mod metrics;
pub use metrics::Metrics;

mod operators;
pub use operators::OperatorRepository;

mod paginate;
pub use paginate::{collect_keyed, for_each_page};

mod record;
pub use record::{Record, RecordStore, WriteOutcome};

mod stats;
pub use stats::NetworkStatsRepository;

pub mod tables;

mod validators;
pub use validators::{ValidatorRepository, ValidatorWithHistory};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
