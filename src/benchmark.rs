//! Sequential benchmark driver comparing the import strategies on one store.

use crate::config::{BenchmarkConfig, ImporterConfig};
use crate::error::ImportOutcome;
use crate::import::build_importer;
use crate::models::{ErrorDetail, ImportMode, Record, StrategyKind};
use crate::store::{MemoryStore, StoreHandle};
use crate::test_data::{generate_records, refresh_ids};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Measurements of one strategy run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub strategy: StrategyKind,
    pub mode: ImportMode,
    pub items: usize,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub throughput_per_sec: f64,
    pub request_units: f64,
    pub succeeded_items: usize,
    pub failed_items: usize,
    pub stored_item_count: usize,
    pub throttled_requests: u64,
    pub errors: Vec<ErrorDetail>,
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] {} of {} items took {:.3} seconds",
            self.strategy, self.mode, self.items, self.duration_secs
        )?;
        writeln!(
            f,
            "  average throughput {:.1} items/s, {:.2} RU",
            self.throughput_per_sec, self.request_units
        )?;
        write!(
            f,
            "  {} succeeded, {} failed, {} stored, {} throttled",
            self.succeeded_items, self.failed_items, self.stored_item_count, self.throttled_requests
        )
    }
}

pub struct BenchmarkRunner {
    store: Arc<MemoryStore>,
    importer_config: ImporterConfig,
    config: BenchmarkConfig,
    records: Vec<Record>,
}

impl BenchmarkRunner {
    /// Build a runner with a freshly generated data set.
    pub fn new(
        store: Arc<MemoryStore>,
        importer_config: ImporterConfig,
        config: BenchmarkConfig,
    ) -> Self {
        let records = generate_records(
            config.items_to_insert,
            config.word_count,
            store.partition_key_field(),
        );
        Self {
            store,
            importer_config,
            config,
            records,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Import the data set once with `strategy`.
    pub async fn run(&self, strategy: StrategyKind, mode: ImportMode) -> ImportOutcome<BenchmarkReport> {
        let mut importer = build_importer(strategy, &self.importer_config);
        importer.initialize(self.store.clone()).await?;

        log::info!(
            "benchmark: {} {} items with {}",
            mode,
            self.records.len(),
            strategy
        );
        let throttled_before = self.store.metrics().throttled_requests;
        let started_at = Utc::now();
        let timer = Instant::now();

        let result = importer.import(&self.records, mode).await?;

        let duration_secs = timer.elapsed().as_secs_f64();
        let throughput_per_sec = if duration_secs > 0.0 {
            self.records.len() as f64 / duration_secs
        } else {
            0.0
        };

        Ok(BenchmarkReport {
            strategy,
            mode,
            items: self.records.len(),
            started_at,
            duration_secs,
            throughput_per_sec,
            request_units: result.request_units,
            succeeded_items: result.succeeded_items,
            failed_items: result.failed_items,
            stored_item_count: self.store.item_count(),
            throttled_requests: self.store.metrics().throttled_requests - throttled_before,
            errors: result.errors,
        })
    }

    /// Run each strategy in turn, pausing for the configured cooldown between
    /// runs. In `Create` mode every run after the first gets fresh ids.
    pub async fn run_sequence(
        &mut self,
        strategies: &[StrategyKind],
        mode: ImportMode,
    ) -> ImportOutcome<Vec<BenchmarkReport>> {
        let mut reports = Vec::with_capacity(strategies.len());
        for (position, strategy) in strategies.iter().enumerate() {
            if position > 0 {
                if !self.config.cooldown.is_zero() {
                    log::info!("benchmark: cooling down for {:?}", self.config.cooldown);
                    tokio::time::sleep(self.config.cooldown).await;
                }
                if mode == ImportMode::Create {
                    refresh_ids(&mut self.records);
                }
            }
            reports.push(self.run(*strategy, mode).await?);
        }
        Ok(reports)
    }
}
