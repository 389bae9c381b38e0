//! In-process simulation of a throughput-limited, partitioned document store.
//!
//! The simulation keeps enough of the real service's behavior to make the
//! import strategies meaningful to compare:
//!
//! - write charges grow with document size, conflicts are charged too
//! - a request-unit budget per second delays callers that overdraw it
//! - request payloads above a size limit are rejected as overflow
//! - procedure executions stop early once their own charge budget is spent,
//!   and roll back when an item fails
//! - an optional item threshold makes executions time out after committing
//!   part of the chunk

use super::budget::CapacityBudget;
use super::error::{STATUS_CREATED, STATUS_OK, StoreError};
use super::{
    BatchOperation, ChunkRequest, ChunkResponse, MAX_BATCH_OPERATIONS, OperationResponse,
    OperationType, ProcedureDefinition, StoreHandle, WriteResponse,
};
use crate::config::{env_f64, env_optional_usize, env_string, env_usize};
use crate::models::Record;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Charge per started KiB of a written document.
pub const WRITE_CHARGE_PER_KIB: f64 = 5.71;
/// Charge of a write rejected because the key exists.
pub const CONFLICT_CHARGE: f64 = 1.24;
/// Fixed charge of every procedure execution.
pub const PROCEDURE_BASE_CHARGE: f64 = 2.0;

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_PROCEDURE_BUDGET_RU: f64 = 1_000.0;

/// Charge of writing a document of `bytes` bytes.
pub fn write_charge(bytes: usize) -> f64 {
    let kib = bytes.div_ceil(1024).max(1);
    WRITE_CHARGE_PER_KIB * kib as f64
}

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    pub container_name: String,
    pub partition_key_field: String,
    /// Request units per second; `None` disables throttling.
    pub throughput: Option<f64>,
    pub max_request_bytes: usize,
    /// Charge one procedure execution may spend before it stops early.
    pub procedure_budget_ru: f64,
    /// Executions reaching this many items commit them and time out.
    pub timeout_after_items: Option<usize>,
}

impl MemoryStoreConfig {
    /// Unthrottled store with default limits, ignoring the environment.
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            partition_key_field: "pk".to_string(),
            throughput: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            procedure_budget_ru: DEFAULT_PROCEDURE_BUDGET_RU,
            timeout_after_items: None,
        }
    }

    pub fn from_env() -> Self {
        let throughput = env_f64("THROUGHPUT", 400.0);
        Self {
            container_name: env_string("CONTAINER_NAME", "items"),
            partition_key_field: env_string("PARTITION_KEY_FIELD", "pk"),
            throughput: (throughput > 0.0).then_some(throughput),
            max_request_bytes: env_usize("MAX_REQUEST_BYTES", DEFAULT_MAX_REQUEST_BYTES),
            procedure_budget_ru: env_f64("PROCEDURE_BUDGET_RU", DEFAULT_PROCEDURE_BUDGET_RU),
            timeout_after_items: env_optional_usize("PROCEDURE_TIMEOUT_AFTER_ITEMS"),
        }
    }

    pub fn with_throughput(mut self, throughput: Option<f64>) -> Self {
        self.throughput = throughput;
        self
    }

    pub fn with_max_request_bytes(mut self, max_request_bytes: usize) -> Self {
        self.max_request_bytes = max_request_bytes;
        self
    }

    pub fn with_procedure_budget(mut self, procedure_budget_ru: f64) -> Self {
        self.procedure_budget_ru = procedure_budget_ru;
        self
    }

    pub fn with_timeout_after_items(mut self, items: Option<usize>) -> Self {
        self.timeout_after_items = items;
        self
    }
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Call counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub item_writes: u64,
    pub batch_submissions: u64,
    pub procedure_executions: u64,
    pub throttled_requests: u64,
}

#[derive(Default)]
struct Counters {
    item_writes: AtomicU64,
    batch_submissions: AtomicU64,
    procedure_executions: AtomicU64,
}

type DocumentKey = (String, String);

enum ItemWrite {
    Created(f64),
    Replaced(f64),
}

/// Outcome of the synchronous part of a procedure execution.
struct ProcedureRun {
    result: Result<usize, StoreError>,
    charge: f64,
}

pub struct MemoryStore {
    config: MemoryStoreConfig,
    documents: DashMap<DocumentKey, Record>,
    procedures: DashMap<String, ProcedureDefinition>,
    // Executions see a consistent view of the documents they check and commit.
    procedure_lock: Mutex<()>,
    budget: Option<CapacityBudget>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        let budget = config.throughput.map(CapacityBudget::new);
        log::debug!(
            "memory store '{}' created (throughput: {:?} RU/s, partition key: /{})",
            config.container_name,
            config.throughput,
            config.partition_key_field
        );
        Self {
            config,
            documents: DashMap::new(),
            procedures: DashMap::new(),
            procedure_lock: Mutex::new(()),
            budget,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    pub fn item_count(&self) -> usize {
        self.documents.len()
    }

    pub fn contains(&self, partition_key: &str, id: &str) -> bool {
        self.documents
            .contains_key(&(partition_key.to_string(), id.to_string()))
    }

    pub fn get(&self, partition_key: &str, id: &str) -> Option<Record> {
        self.documents
            .get(&(partition_key.to_string(), id.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn has_procedure(&self, id: &str) -> bool {
        self.procedures.contains_key(id)
    }

    pub fn clear(&self) {
        self.documents.clear();
    }

    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            item_writes: self.counters.item_writes.load(Ordering::Relaxed),
            batch_submissions: self.counters.batch_submissions.load(Ordering::Relaxed),
            procedure_executions: self.counters.procedure_executions.load(Ordering::Relaxed),
            throttled_requests: self
                .budget
                .as_ref()
                .map(CapacityBudget::throttled_requests)
                .unwrap_or(0),
        }
    }

    async fn throttle(&self, charge: f64) {
        if charge <= 0.0 {
            return;
        }
        if let Some(budget) = &self.budget {
            budget.consume(charge).await;
        }
    }

    fn key_of(&self, record: &Record) -> Result<DocumentKey, StoreError> {
        let id = record
            .id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::Validation("record has no string 'id'".to_string()))?;
        let partition_key = record
            .partition_key(&self.config.partition_key_field)
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "record '{}' has no partition key '{}'",
                    id, self.config.partition_key_field
                ))
            })?;
        Ok((partition_key.to_string(), id.to_string()))
    }

    fn check_size(&self, size: usize) -> Result<(), StoreError> {
        if size > self.config.max_request_bytes {
            return Err(StoreError::Overflow {
                size,
                limit: self.config.max_request_bytes,
            });
        }
        Ok(())
    }

    fn write_item(&self, record: &Record, operation: OperationType) -> Result<ItemWrite, StoreError> {
        let size = record.serialized_len();
        self.check_size(size)?;
        let key = self.key_of(record)?;
        let charge = write_charge(size);

        match operation {
            OperationType::Create => match self.documents.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(entry) => Err(StoreError::Conflict {
                    id: entry.key().1.clone(),
                    request_charge: CONFLICT_CHARGE,
                }),
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(record.clone());
                    Ok(ItemWrite::Created(charge))
                }
            },
            OperationType::Upsert => match self.documents.insert(key, record.clone()) {
                Some(_) => Ok(ItemWrite::Replaced(charge)),
                None => Ok(ItemWrite::Created(charge)),
            },
        }
    }

    async fn write_single(
        &self,
        record: &Record,
        operation: OperationType,
    ) -> Result<WriteResponse, StoreError> {
        self.counters.item_writes.fetch_add(1, Ordering::Relaxed);
        match self.write_item(record, operation) {
            Ok(ItemWrite::Created(charge)) | Ok(ItemWrite::Replaced(charge)) => {
                self.throttle(charge).await;
                Ok(WriteResponse {
                    request_charge: charge,
                })
            }
            Err(err) => {
                self.throttle(err.request_charge()).await;
                Err(err)
            }
        }
    }

    fn run_procedure(&self, partition_key: &str, request: ChunkRequest<'_>) -> ProcedureRun {
        let started = Instant::now();
        let mut charge = PROCEDURE_BASE_CHARGE;
        let mut staged: Vec<(DocumentKey, Record)> = Vec::with_capacity(request.items.len());
        let mut staged_keys: HashSet<DocumentKey> = HashSet::new();
        let mut processed = 0usize;

        let _guard = self.procedure_lock.lock();

        for item in request.items {
            let item_charge = write_charge(item.serialized_len());

            // The execution always makes progress on its first item.
            if processed > 0 && charge + item_charge > self.config.procedure_budget_ru {
                break;
            }

            if let Some(limit) = self.config.timeout_after_items {
                if processed >= limit {
                    self.commit(staged, request.use_upsert);
                    return ProcedureRun {
                        result: Err(StoreError::Timeout {
                            elapsed: started.elapsed(),
                        }),
                        charge,
                    };
                }
            }

            let key = match self.key_of(item) {
                Ok(key) => key,
                Err(err) => return ProcedureRun { result: Err(err), charge },
            };
            if key.0 != partition_key {
                return ProcedureRun {
                    result: Err(StoreError::Validation(format!(
                        "record '{}' belongs to partition '{}', not '{}'",
                        key.1, key.0, partition_key
                    ))),
                    charge,
                };
            }

            let exists = staged_keys.contains(&key) || self.documents.contains_key(&key);
            if exists && !request.use_upsert {
                if request.ignore_conflicts {
                    charge += CONFLICT_CHARGE;
                    processed += 1;
                    continue;
                }
                let charge = charge + CONFLICT_CHARGE;
                return ProcedureRun {
                    result: Err(StoreError::Conflict {
                        id: key.1,
                        request_charge: charge,
                    }),
                    charge,
                };
            }

            staged_keys.insert(key.clone());
            staged.push((key, item.clone()));
            charge += item_charge;
            processed += 1;
        }

        self.commit(staged, request.use_upsert);
        ProcedureRun {
            result: Ok(processed),
            charge,
        }
    }

    fn commit(&self, staged: Vec<(DocumentKey, Record)>, use_upsert: bool) {
        for (key, record) in staged {
            if use_upsert {
                self.documents.insert(key, record);
            } else {
                self.documents.entry(key).or_insert(record);
            }
        }
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    fn partition_key_field(&self) -> &str {
        &self.config.partition_key_field
    }

    async fn create(&self, record: &Record) -> Result<WriteResponse, StoreError> {
        self.write_single(record, OperationType::Create).await
    }

    async fn upsert(&self, record: &Record) -> Result<WriteResponse, StoreError> {
        self.write_single(record, OperationType::Upsert).await
    }

    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResponse>, StoreError> {
        self.counters.batch_submissions.fetch_add(1, Ordering::Relaxed);

        if operations.len() > MAX_BATCH_OPERATIONS {
            return Err(StoreError::Validation(format!(
                "batch of {} operations exceeds the limit of {}",
                operations.len(),
                MAX_BATCH_OPERATIONS
            )));
        }
        let payload: usize = operations
            .iter()
            .map(|op| op.resource_body.serialized_len())
            .sum();
        self.check_size(payload)?;

        let mut total_charge = 0.0;
        let mut responses = Vec::with_capacity(operations.len());
        for operation in &operations {
            let record_id = operation.resource_body.id().map(str::to_string);
            let response = match self.write_item(&operation.resource_body, operation.operation_type) {
                Ok(ItemWrite::Created(charge)) => OperationResponse {
                    status_code: STATUS_CREATED,
                    request_charge: charge,
                    record_id,
                },
                Ok(ItemWrite::Replaced(charge)) => OperationResponse {
                    status_code: STATUS_OK,
                    request_charge: charge,
                    record_id,
                },
                Err(err) => OperationResponse {
                    status_code: err.status_code(),
                    request_charge: err.request_charge(),
                    record_id,
                },
            };
            total_charge += response.request_charge;
            responses.push(response);
        }

        self.throttle(total_charge).await;
        log::trace!(
            "batch of {} operations charged {:.2} RU",
            responses.len(),
            total_charge
        );
        Ok(responses)
    }

    async fn ensure_procedure(&self, definition: &ProcedureDefinition) -> Result<(), StoreError> {
        if definition.id.is_empty() || definition.body.trim().is_empty() {
            return Err(StoreError::Validation(
                "procedure definition needs an id and a body".to_string(),
            ));
        }
        let replaced = self
            .procedures
            .insert(definition.id.clone(), definition.clone())
            .is_some();
        log::debug!(
            "procedure '{}' {} on '{}'",
            definition.id,
            if replaced { "replaced" } else { "created" },
            self.config.container_name
        );
        Ok(())
    }

    async fn execute_procedure(
        &self,
        procedure_id: &str,
        partition_key: &str,
        request: ChunkRequest<'_>,
    ) -> Result<ChunkResponse, StoreError> {
        self.counters
            .procedure_executions
            .fetch_add(1, Ordering::Relaxed);

        if !self.procedures.contains_key(procedure_id) {
            return Err(StoreError::NotFound(format!("procedure '{procedure_id}'")));
        }
        let payload: usize = request.items.iter().map(Record::serialized_len).sum();
        self.check_size(payload)?;

        let started = Instant::now();
        let run = self.run_procedure(partition_key, request);
        let duration = started.elapsed();
        self.throttle(run.charge).await;

        let processed = run.result?;
        Ok(ChunkResponse {
            processed,
            request_charge: run.charge,
            duration,
        })
    }
}
