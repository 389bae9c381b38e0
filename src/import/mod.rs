//! Bulk import strategies.
//!
//! Three interchangeable writers share the [`BulkImporter`] contract:
//!
//! 1. **Parallel** (`parallel`) - one create/upsert per record, bounded by a semaphore
//! 2. **Bulk operations** (`bulk_operations`) - sequential multi-operation submissions
//! 3. **Stored procedure** (`chunked`) - adaptive chunk writes through a server-side
//!    procedure, splitting on overflow and continuing on partial progress
//!
//! All three reduce their outcomes through `stats` into one [`ImportResult`].
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use bulk_optimizer::import::build_importer;
//!
//! let mut importer = build_importer(StrategyKind::StoredProcedure, &ImporterConfig::from_env());
//! importer.initialize(store).await?;
//!
//! let result = importer.import(&records, ImportMode::Create).await?;
//! println!("failed to import {} items", result.failed_items);
//! ```

pub mod bulk_operations;
pub mod chunked;
pub mod parallel;
pub mod stats;

pub use bulk_operations::BulkOperationsImporter;
pub use chunked::{ChunkOptions, ChunkedProcedureImporter};
pub use parallel::ParallelImporter;
pub use stats::{ImportResult, aggregate};

use crate::config::ImporterConfig;
use crate::error::ImportOutcome;
use crate::models::{ImportMode, Record, StrategyKind};
use crate::store::StoreHandle;
use async_trait::async_trait;
use std::sync::Arc;

/// Common contract of the write strategies.
#[async_trait]
pub trait BulkImporter: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Bind the importer to a store, provisioning what it needs there.
    /// Calling it again rebinds and re-provisions.
    async fn initialize(&mut self, store: Arc<dyn StoreHandle>) -> ImportOutcome<()>;

    /// Write all `records`. Item failures are reported in the result; only
    /// fatal conditions return an error.
    async fn import(&self, records: &[Record], mode: ImportMode) -> ImportOutcome<ImportResult>;
}

/// Build the importer selected by `kind`.
pub fn build_importer(kind: StrategyKind, config: &ImporterConfig) -> Box<dyn BulkImporter> {
    match kind {
        StrategyKind::Parallel => Box::new(ParallelImporter::new(config.parallelism)),
        StrategyKind::BulkOperations => Box::new(BulkOperationsImporter::new(config.batch_size)),
        StrategyKind::StoredProcedure => {
            Box::new(ChunkedProcedureImporter::new(ChunkOptions::from(config)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_requested_strategy() {
        let config = ImporterConfig::new();
        for kind in StrategyKind::ALL {
            assert_eq!(build_importer(kind, &config).kind(), kind);
        }
    }
}
