//! Fixtures shared by unit and integration tests.

use crate::models::{PARTITION_KEY_VALUE, Record};
use crate::store::{
    BatchOperation, ChunkRequest, ChunkResponse, MemoryStore, MemoryStoreConfig,
    OperationResponse, ProcedureDefinition, StoreError, StoreHandle, WriteResponse,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// `count` small records with ids `item-0..` in the shared partition.
pub fn records(count: usize) -> Vec<Record> {
    records_in(PARTITION_KEY_VALUE, count)
}

pub fn records_in(partition_key: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| record(&format!("item-{i}"), partition_key))
        .collect()
}

pub fn record(id: &str, partition_key: &str) -> Record {
    let value = json!({ "id": id, "pk": partition_key, "payload": "x" });
    serde_json::from_value(value).unwrap_or_default()
}

/// A deterministic, unthrottled store keyed on `/pk`.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(MemoryStoreConfig::new("items")))
}

/// One observed procedure execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureCall {
    pub index: usize,
    pub partition_key: String,
    pub ids: Vec<String>,
}

impl ProcedureCall {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// What a scripted procedure execution does.
#[derive(Debug)]
pub enum Scripted {
    /// Run the real procedure over the whole chunk.
    PassThrough,
    /// Run the real procedure over the first `n` items only.
    Partial(usize),
    /// Answer without touching the store.
    Respond(Result<ChunkResponse, StoreError>),
}

#[async_trait]
pub trait ProcedureBehavior: Send + Sync {
    async fn execute(&self, call: &ProcedureCall) -> Scripted;
}

/// Wraps a [`MemoryStore`], recording calls and optionally scripting procedure
/// answers.
pub struct ScriptedStore {
    inner: Arc<MemoryStore>,
    behavior: Option<Arc<dyn ProcedureBehavior>>,
    item_delay: Option<Duration>,
    batch_error: Option<StoreError>,
    procedure_calls: Mutex<Vec<ProcedureCall>>,
    batch_sizes: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            behavior: None,
            item_delay: None,
            batch_error: None,
            procedure_calls: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: impl ProcedureBehavior + 'static) -> Self {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    /// Delay every single-item write, keeping writes in flight long enough to
    /// observe concurrency.
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = Some(delay);
        self
    }

    /// Fail every batch submission with `err`.
    pub fn with_batch_error(mut self, err: StoreError) -> Self {
        self.batch_error = Some(err);
        self
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn procedure_calls(&self) -> Vec<ProcedureCall> {
        self.procedure_calls.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn delay(&self) {
        if let Some(delay) = self.item_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl StoreHandle for ScriptedStore {
    fn partition_key_field(&self) -> &str {
        self.inner.partition_key_field()
    }

    async fn create(&self, record: &Record) -> Result<WriteResponse, StoreError> {
        let _guard = self.enter();
        self.delay().await;
        self.inner.create(record).await
    }

    async fn upsert(&self, record: &Record) -> Result<WriteResponse, StoreError> {
        let _guard = self.enter();
        self.delay().await;
        self.inner.upsert(record).await
    }

    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResponse>, StoreError> {
        self.batch_sizes.lock().push(operations.len());
        if let Some(err) = &self.batch_error {
            return Err(err.clone());
        }
        self.inner.submit_batch(operations).await
    }

    async fn ensure_procedure(&self, definition: &ProcedureDefinition) -> Result<(), StoreError> {
        self.inner.ensure_procedure(definition).await
    }

    async fn execute_procedure(
        &self,
        procedure_id: &str,
        partition_key: &str,
        request: ChunkRequest<'_>,
    ) -> Result<ChunkResponse, StoreError> {
        let _guard = self.enter();
        let call = {
            let mut calls = self.procedure_calls.lock();
            let call = ProcedureCall {
                index: calls.len(),
                partition_key: partition_key.to_string(),
                ids: request
                    .items
                    .iter()
                    .map(|record| record.id().unwrap_or_default().to_string())
                    .collect(),
            };
            calls.push(call.clone());
            call
        };

        let scripted = match &self.behavior {
            Some(behavior) => behavior.execute(&call).await,
            None => Scripted::PassThrough,
        };

        match scripted {
            Scripted::PassThrough => {
                self.inner
                    .execute_procedure(procedure_id, partition_key, request)
                    .await
            }
            Scripted::Partial(count) => {
                let count = count.min(request.items.len());
                let prefix = ChunkRequest {
                    items: &request.items[..count],
                    ..request
                };
                self.inner
                    .execute_procedure(procedure_id, partition_key, prefix)
                    .await
            }
            Scripted::Respond(result) => result,
        }
    }
}
