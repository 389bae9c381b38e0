pub mod benchmark;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod store;
pub mod test_data;

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support;

pub use benchmark::{BenchmarkReport, BenchmarkRunner};
pub use config::{BenchmarkConfig, ImporterConfig};
pub use error::{ImportError, ImportOutcome};
pub use import::{BulkImporter, ImportResult, build_importer};
pub use models::{ErrorDetail, FailureKind, ImportMode, Record, StrategyKind};
pub use store::{MemoryStore, MemoryStoreConfig, StoreError, StoreHandle};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialise `env_logger` once; `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}
