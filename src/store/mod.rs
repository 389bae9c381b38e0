//! Store handle contract and the simulated store.
//!
//! The import strategies only ever talk to a [`StoreHandle`]. It exposes the
//! three write paths a partitioned document store offers for bulk loading:
//!
//! - single-item `create` / `upsert`
//! - a non-atomic multi-operation submission (`submit_batch`)
//! - a server-side procedure that writes a whole chunk of one partition in a
//!   single execution (`execute_procedure`)
//!
//! # Procedure transactionality
//!
//! The contract makes no promise about whether a procedure execution is
//! transactional. In particular, when an execution fails with
//! [`StoreError::Timeout`] any prefix of the chunk may or may not have been
//! written. Callers must not retry on timeout and must not assume the chunk was
//! rolled back.

pub mod budget;
pub mod error;
pub mod memory;

pub use budget::CapacityBudget;
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryStoreConfig, StoreMetrics};

use crate::models::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of operations a single `submit_batch` call accepts.
pub const MAX_BATCH_OPERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Upsert,
}

/// One operation of a multi-operation submission.
#[derive(Debug, Clone)]
pub struct BatchOperation {
    pub operation_type: OperationType,
    pub resource_body: Record,
}

/// Per-operation status of a multi-operation submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub status_code: u16,
    pub request_charge: f64,
    pub record_id: Option<String>,
}

impl OperationResponse {
    /// Created (201) or applied (200).
    pub fn is_success(&self) -> bool {
        self.status_code == error::STATUS_CREATED || self.status_code == error::STATUS_OK
    }
}

/// Response of a single-item write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteResponse {
    pub request_charge: f64,
}

/// Server-side procedure to provision before chunk writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureDefinition {
    pub id: String,
    pub body: String,
}

/// Arguments of one procedure execution.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRequest<'a> {
    pub items: &'a [Record],
    pub use_upsert: bool,
    pub ignore_conflicts: bool,
}

/// Result of one procedure execution.
///
/// `processed` counts the leading items of the chunk that were written; it is
/// lower than the chunk length when the execution ran out of server budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkResponse {
    pub processed: usize,
    pub request_charge: f64,
    pub duration: Duration,
}

/// Capabilities the import strategies need from a store.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Name of the field holding the partition-key value.
    fn partition_key_field(&self) -> &str;

    /// Insert one record. Fails with [`StoreError::Conflict`] if the key exists.
    async fn create(&self, record: &Record) -> Result<WriteResponse, StoreError>;

    /// Insert or replace one record.
    async fn upsert(&self, record: &Record) -> Result<WriteResponse, StoreError>;

    /// Submit independent operations in one round-trip. Each operation reports
    /// its own status; the call as a whole is not atomic.
    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResponse>, StoreError>;

    /// Register a procedure, replacing any existing definition with the same id.
    async fn ensure_procedure(&self, definition: &ProcedureDefinition) -> Result<(), StoreError>;

    /// Run a provisioned procedure over a chunk of records that all share
    /// `partition_key`.
    async fn execute_procedure(
        &self,
        procedure_id: &str,
        partition_key: &str,
        request: ChunkRequest<'_>,
    ) -> Result<ChunkResponse, StoreError>;
}
