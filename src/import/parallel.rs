//! Bounded-concurrency single-item writer.

use crate::error::{ImportError, ImportOutcome};
use crate::import::{BulkImporter, ImportResult};
use crate::models::{ImportMode, Record, StrategyKind, WriteOutcome};
use crate::store::StoreHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Issues one create/upsert per record with at most `parallelism` writes in
/// flight. Completion order is not submission order.
pub struct ParallelImporter {
    store: Option<Arc<dyn StoreHandle>>,
    parallelism: usize,
}

impl ParallelImporter {
    pub fn new(parallelism: usize) -> Self {
        Self {
            store: None,
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }
}

async fn write_one(store: &dyn StoreHandle, record: &Record, mode: ImportMode) -> WriteOutcome {
    let response = match mode {
        ImportMode::Create => store.create(record).await,
        ImportMode::Upsert => store.upsert(record).await,
    };

    match response {
        Ok(response) => WriteOutcome::success(response.request_charge),
        Err(err) => {
            log::debug!("parallel: {} of {:?} failed: {}", mode, record.id(), err);
            WriteOutcome::failure(err.request_charge(), err.to_detail(record.id()))
        }
    }
}

#[async_trait]
impl BulkImporter for ParallelImporter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Parallel
    }

    async fn initialize(&mut self, store: Arc<dyn StoreHandle>) -> ImportOutcome<()> {
        self.store = Some(store);
        Ok(())
    }

    async fn import(&self, records: &[Record], mode: ImportMode) -> ImportOutcome<ImportResult> {
        let store = self.store.clone().ok_or(ImportError::NotInitialized)?;
        if records.is_empty() {
            return Ok(ImportResult::default());
        }

        log::info!(
            "parallel: importing {} records with {} (parallelism {})",
            records.len(),
            mode,
            self.parallelism
        );

        let records: Arc<[Record]> = Arc::from(records);
        let limiter = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        let mut result = ImportResult::default();

        for index in 0..records.len() {
            let permit = limiter.clone().acquire_owned().await?;
            let store = store.clone();
            let records = records.clone();
            tasks.spawn(async move {
                let _permit = permit;
                write_one(store.as_ref(), &records[index], mode).await
            });

            // Collect whatever already finished so errors keep completion order.
            while let Some(joined) = tasks.try_join_next() {
                result.record(joined?);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            result.record(joined?);
        }

        if result.failed_items > 0 {
            log::warn!(
                "parallel: {} of {} records failed",
                result.failed_items,
                records.len()
            );
        }
        log::info!(
            "parallel: import complete, {} written, {:.2} RU",
            result.succeeded_items,
            result.request_units
        );

        Ok(result)
    }
}
