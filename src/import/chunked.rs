//! Adaptive chunk writer built on the server-side bulk procedure.
//!
//! Every chunk is sent to the procedure in one execution. Depending on the
//! answer the chunk is:
//!
//! - **done** when every item was processed
//! - **continued** with its unprocessed suffix when the execution ran out of
//!   server budget before the end, even if it wrote nothing
//! - **bisected** into two halves written concurrently when the payload was too
//!   large for a single request
//! - **recorded** as failed on any other item-level error
//!
//! A timeout aborts the whole import. The store gives no guarantee about which
//! items of a timed-out execution were applied, so the chunk is neither
//! retried nor counted as failed.
//!
//! Continuations are only bounded by `max_continuations`. Without it a store
//! that never makes progress keeps the import running.
//!
//! # Execution model
//!
//! A single coordinator owns a worklist of pending chunks and a `JoinSet` of
//! in-flight executions. Each execution returns its own outcome and only the
//! coordinator merges outcomes, so concurrent branches never share counters.
//! Returning early on a timeout drops the `JoinSet`, which aborts every
//! execution still in flight.

use crate::config::ImporterConfig;
use crate::error::{ImportError, ImportOutcome};
use crate::import::{BulkImporter, ImportResult};
use crate::models::{ErrorDetail, FailureKind, ImportMode, Record, StrategyKind};
use crate::store::{ChunkRequest, ChunkResponse, ProcedureDefinition, StoreError, StoreHandle};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Id under which the bulk procedure is provisioned.
pub const PROCEDURE_ID: &str = "spBulkInsertV1";

const PROCEDURE_BODY: &str = include_str!("bulk_insert.js");

pub fn procedure_definition() -> ProcedureDefinition {
    ProcedureDefinition {
        id: PROCEDURE_ID.to_string(),
        body: PROCEDURE_BODY.to_string(),
    }
}

/// Tuning of the chunk writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Chunks larger than this are pre-split before the first execution.
    pub max_chunk_size: Option<usize>,
    /// Let the procedure skip items whose key already exists.
    pub ignore_conflicts: bool,
    /// Overflow bisections allowed along one branch; unbounded when `None`.
    pub max_split_depth: Option<u32>,
    /// Partial-progress continuations allowed per chunk; unbounded when `None`.
    pub max_continuations: Option<u32>,
}

impl From<&ImporterConfig> for ChunkOptions {
    fn from(config: &ImporterConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            ignore_conflicts: config.ignore_conflicts,
            max_split_depth: config.max_split_depth,
            max_continuations: config.max_continuations,
        }
    }
}

/// Records sharing one partition-key value, in input order.
struct Partition {
    key: Arc<str>,
    records: Arc<[Record]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkTask {
    partition: usize,
    range: Range<usize>,
    depth: u32,
    continuations: u32,
}

/// One finished procedure execution.
struct Attempt {
    task: ChunkTask,
    result: Result<ChunkResponse, StoreError>,
}

/// Totals owned by the coordinator.
#[derive(Debug, Default)]
struct ChunkProgress {
    processed: usize,
    request_units: f64,
    errors: Vec<ErrorDetail>,
}

/// Split `range` into consecutive pieces of at most `max` items.
fn split_range(range: Range<usize>, max: usize) -> Vec<Range<usize>> {
    let max = max.max(1);
    let mut pieces = Vec::with_capacity(range.len().div_ceil(max));
    let mut start = range.start;
    while start < range.end {
        let end = (start + max).min(range.end);
        pieces.push(start..end);
        start = end;
    }
    pieces
}

/// Halve `range` at its midpoint.
fn bisect(range: &Range<usize>) -> (Range<usize>, Range<usize>) {
    let mid = range.start + range.len() / 2;
    (range.start..mid, mid..range.end)
}

/// Group records by partition key, keeping first-seen partition order and input
/// order inside each partition. Records without an id or partition key are
/// returned as validation failures.
fn group_by_partition(records: &[Record], field: &str) -> (Vec<Partition>, Vec<ErrorDetail>) {
    let mut order: Vec<(String, Vec<Record>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rejected = Vec::new();

    for record in records {
        let key = match (record.id(), record.partition_key(field)) {
            (Some(id), Some(key)) if !id.is_empty() => key,
            _ => {
                rejected.push(
                    ErrorDetail::new(
                        FailureKind::Validation,
                        format!("record needs a string 'id' and partition key '{field}'"),
                    )
                    .with_record_id(record.id()),
                );
                continue;
            }
        };
        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            order.push((key.to_string(), Vec::new()));
            order.len() - 1
        });
        order[slot].1.push(record.clone());
    }

    let partitions = order
        .into_iter()
        .map(|(key, records)| Partition {
            key: Arc::from(key),
            records: Arc::from(records),
        })
        .collect();
    (partitions, rejected)
}

/// Writes records through [`PROCEDURE_ID`], adapting chunk sizes to the
/// store's answers.
pub struct ChunkedProcedureImporter {
    store: Option<Arc<dyn StoreHandle>>,
    options: ChunkOptions,
}

impl ChunkedProcedureImporter {
    pub fn new(options: ChunkOptions) -> Self {
        Self {
            store: None,
            options,
        }
    }

    pub fn options(&self) -> ChunkOptions {
        self.options
    }

    fn root_tasks(&self, partitions: &[Partition]) -> VecDeque<ChunkTask> {
        let mut tasks = VecDeque::new();
        for (partition, group) in partitions.iter().enumerate() {
            let whole = 0..group.records.len();
            let ranges = match self.options.max_chunk_size {
                Some(max) if whole.len() > max => split_range(whole, max),
                _ => vec![whole],
            };
            tasks.extend(ranges.into_iter().map(|range| ChunkTask {
                partition,
                range,
                depth: 0,
                continuations: 0,
            }));
        }
        tasks
    }

    fn spawn_attempt(
        &self,
        in_flight: &mut JoinSet<Attempt>,
        store: &Arc<dyn StoreHandle>,
        partition: &Partition,
        task: ChunkTask,
        mode: ImportMode,
    ) {
        let store = store.clone();
        let key = partition.key.clone();
        let records = partition.records.clone();
        let use_upsert = mode == ImportMode::Upsert;
        let ignore_conflicts = self.options.ignore_conflicts;

        log::trace!(
            "chunked: executing procedure on partition '{}' items {:?}",
            key,
            task.range
        );
        in_flight.spawn(async move {
            let request = ChunkRequest {
                items: &records[task.range.clone()],
                use_upsert,
                ignore_conflicts,
            };
            let result = store.execute_procedure(PROCEDURE_ID, &key, request).await;
            Attempt { task, result }
        });
    }

    /// Fold one finished execution into `progress`, queueing follow-up chunks.
    fn settle(
        &self,
        attempt: Attempt,
        pending: &mut VecDeque<ChunkTask>,
        progress: &mut ChunkProgress,
    ) -> ImportOutcome<()> {
        let Attempt { task, result } = attempt;
        let len = task.range.len();

        match result {
            Ok(response) => {
                let processed = response.processed.min(len);
                progress.processed += processed;
                progress.request_units += response.request_charge;

                if processed == len {
                    return Ok(());
                }

                log::debug!(
                    "chunked: processed {} of {} items in {:?}, continuing",
                    processed,
                    len,
                    response.duration
                );

                if let Some(max) = self.options.max_continuations {
                    if task.continuations >= max {
                        progress.errors.push(ErrorDetail::new(
                            FailureKind::RetryBudgetExhausted,
                            format!(
                                "chunk still had {} unprocessed items after {} continuations",
                                len - processed,
                                max
                            ),
                        ));
                        return Ok(());
                    }
                }

                pending.push_back(ChunkTask {
                    range: task.range.start + processed..task.range.end,
                    continuations: task.continuations + 1,
                    ..task
                });
                Ok(())
            }
            Err(err) if err.is_overflow() => {
                if len <= 1 {
                    log::warn!("chunked: single item exceeds the request size limit");
                    progress.errors.push(err.to_detail(None));
                    return Ok(());
                }

                if let Some(max) = self.options.max_split_depth {
                    if task.depth >= max {
                        progress.errors.push(ErrorDetail::new(
                            FailureKind::RetryBudgetExhausted,
                            format!("chunk of {len} items still too large after {max} splits"),
                        ));
                        return Ok(());
                    }
                }

                log::debug!("chunked: request too large, splitting {} items", len);
                let (left, right) = bisect(&task.range);
                for range in [left, right] {
                    pending.push_back(ChunkTask {
                        range,
                        depth: task.depth + 1,
                        continuations: 0,
                        ..task
                    });
                }
                Ok(())
            }
            Err(err) if err.is_timeout() => {
                log::error!(
                    "chunked: procedure timed out on {} items, aborting import ({} confirmed)",
                    len,
                    progress.processed
                );
                Err(ImportError::Timeout {
                    source: err,
                    processed: progress.processed,
                })
            }
            Err(err) => {
                log::warn!("chunked: chunk of {} items failed: {}", len, err);
                progress.request_units += err.request_charge();
                progress.errors.push(err.to_detail(None));
                Ok(())
            }
        }
    }

    async fn write_partitions(
        &self,
        store: &Arc<dyn StoreHandle>,
        partitions: &[Partition],
        mode: ImportMode,
    ) -> ImportOutcome<ChunkProgress> {
        let mut pending = self.root_tasks(partitions);
        let mut in_flight: JoinSet<Attempt> = JoinSet::new();
        let mut progress = ChunkProgress::default();

        loop {
            while let Some(task) = pending.pop_front() {
                let partition = &partitions[task.partition];
                self.spawn_attempt(&mut in_flight, store, partition, task, mode);
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            self.settle(joined?, &mut pending, &mut progress)?;
        }

        Ok(progress)
    }
}

#[async_trait]
impl BulkImporter for ChunkedProcedureImporter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StoredProcedure
    }

    async fn initialize(&mut self, store: Arc<dyn StoreHandle>) -> ImportOutcome<()> {
        store
            .ensure_procedure(&procedure_definition())
            .await
            .map_err(ImportError::Provisioning)?;
        log::debug!("chunked: procedure '{}' provisioned", PROCEDURE_ID);
        self.store = Some(store);
        Ok(())
    }

    async fn import(&self, records: &[Record], mode: ImportMode) -> ImportOutcome<ImportResult> {
        let store = self.store.clone().ok_or(ImportError::NotInitialized)?;
        let (partitions, rejected) = group_by_partition(records, store.partition_key_field());

        log::info!(
            "chunked: importing {} records with {} across {} partitions (max chunk size {:?})",
            records.len(),
            mode,
            partitions.len(),
            self.options.max_chunk_size
        );
        if !rejected.is_empty() {
            log::warn!("chunked: {} records rejected before submission", rejected.len());
        }

        let progress = self.write_partitions(&store, &partitions, mode).await?;

        let mut errors = rejected;
        errors.extend(progress.errors);
        let result = ImportResult {
            request_units: progress.request_units,
            failed_items: records.len().saturating_sub(progress.processed),
            succeeded_items: progress.processed,
            errors,
        };

        log::info!(
            "chunked: import complete, {} processed, {} failed, {:.2} RU",
            result.succeeded_items,
            result.failed_items,
            result.request_units
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, pk: &str) -> Record {
        serde_json::from_value(json!({"id": id, "pk": pk})).expect("record")
    }

    #[test]
    fn split_range_covers_input_in_order() {
        assert_eq!(split_range(0..250, 100), vec![0..100, 100..200, 200..250]);
        assert_eq!(split_range(0..100, 100), vec![0..100]);
        assert!(split_range(5..5, 10).is_empty());
    }

    #[test]
    fn bisect_splits_at_midpoint() {
        assert_eq!(bisect(&(0..10)), (0..5, 5..10));
        assert_eq!(bisect(&(4..7)), (4..5, 5..7));
    }

    #[test]
    fn groups_keep_input_order_per_partition() {
        let input = vec![
            record("a", "p1"),
            record("b", "p2"),
            record("c", "p1"),
            serde_json::from_value(json!({"id": "d"})).expect("record"),
        ];

        let (partitions, rejected) = group_by_partition(&input, "pk");

        assert_eq!(partitions.len(), 2);
        assert_eq!(&*partitions[0].key, "p1");
        let ids: Vec<_> = partitions[0].records.iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].record_id.as_deref(), Some("d"));
    }

    #[test]
    fn pre_split_seeds_one_task_per_sub_chunk() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions {
            max_chunk_size: Some(40),
            ..ChunkOptions::default()
        });
        let input: Vec<Record> = (0..100).map(|i| record(&i.to_string(), "p")).collect();
        let (partitions, _) = group_by_partition(&input, "pk");

        let tasks: Vec<_> = importer
            .root_tasks(&partitions)
            .into_iter()
            .map(|task| task.range)
            .collect();

        assert_eq!(tasks, vec![0..40, 40..80, 80..100]);
    }

    fn attempt(range: Range<usize>, result: Result<ChunkResponse, StoreError>) -> Attempt {
        Attempt {
            task: ChunkTask {
                partition: 0,
                range,
                depth: 0,
                continuations: 0,
            },
            result,
        }
    }

    fn processed(count: usize) -> Result<ChunkResponse, StoreError> {
        Ok(ChunkResponse {
            processed: count,
            request_charge: 1.0,
            duration: std::time::Duration::ZERO,
        })
    }

    #[test]
    fn partial_progress_queues_the_suffix() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions::default());
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();

        importer
            .settle(attempt(10..20, processed(4)), &mut pending, &mut progress)
            .expect("settled");

        assert_eq!(progress.processed, 4);
        let next = pending.pop_front().expect("continuation");
        assert_eq!(next.range, 14..20);
        assert_eq!(next.continuations, 1);
    }

    #[test]
    fn continuation_budget_stops_requeueing() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions {
            max_continuations: Some(0),
            ..ChunkOptions::default()
        });
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();

        importer
            .settle(attempt(0..10, processed(5)), &mut pending, &mut progress)
            .expect("settled");

        assert!(pending.is_empty());
        assert_eq!(progress.errors[0].kind, FailureKind::RetryBudgetExhausted);
    }

    #[test]
    fn zero_progress_requeues_the_whole_chunk() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions::default());
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();

        importer
            .settle(attempt(0..10, processed(0)), &mut pending, &mut progress)
            .expect("settled");

        let next = pending.pop_front().expect("continuation");
        assert_eq!(next.range, 0..10);
        assert_eq!(next.continuations, 1);
        assert!(progress.errors.is_empty());
    }

    #[test]
    fn failed_execution_keeps_its_charge() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions::default());
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();
        let conflict = Err(StoreError::Conflict {
            id: "a".to_string(),
            request_charge: 3.5,
        });

        importer
            .settle(attempt(0..4, conflict), &mut pending, &mut progress)
            .expect("settled");

        assert_eq!(progress.request_units, 3.5);
        assert_eq!(progress.errors[0].kind, FailureKind::Conflict);
    }

    #[test]
    fn overflow_queues_both_halves_one_level_deeper() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions::default());
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();
        let overflow = Err(StoreError::Overflow { size: 10, limit: 5 });

        importer
            .settle(attempt(0..9, overflow), &mut pending, &mut progress)
            .expect("settled");

        let halves: Vec<_> = pending.iter().map(|t| (t.range.clone(), t.depth)).collect();
        assert_eq!(halves, vec![(0..4, 1), (4..9, 1)]);
        assert!(progress.errors.is_empty());
    }

    #[test]
    fn single_item_overflow_is_an_item_failure() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions::default());
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();
        let overflow = Err(StoreError::Overflow { size: 10, limit: 5 });

        importer
            .settle(attempt(3..4, overflow), &mut pending, &mut progress)
            .expect("settled");

        assert!(pending.is_empty());
        assert_eq!(progress.errors[0].kind, FailureKind::Overflow);
    }

    #[test]
    fn split_depth_budget_stops_bisection() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions {
            max_split_depth: Some(0),
            ..ChunkOptions::default()
        });
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress::default();
        let overflow = Err(StoreError::Overflow { size: 10, limit: 5 });

        importer
            .settle(attempt(0..8, overflow), &mut pending, &mut progress)
            .expect("settled");

        assert!(pending.is_empty());
        assert_eq!(progress.errors[0].kind, FailureKind::RetryBudgetExhausted);
    }

    #[test]
    fn timeout_is_fatal() {
        let importer = ChunkedProcedureImporter::new(ChunkOptions::default());
        let mut pending = VecDeque::new();
        let mut progress = ChunkProgress {
            processed: 7,
            ..ChunkProgress::default()
        };
        let timeout = Err(StoreError::Timeout {
            elapsed: std::time::Duration::from_secs(5),
        });

        let err = importer
            .settle(attempt(0..8, timeout), &mut pending, &mut progress)
            .expect_err("fatal");

        assert!(matches!(err, ImportError::Timeout { processed: 7, .. }));
        assert!(pending.is_empty());
    }
}
