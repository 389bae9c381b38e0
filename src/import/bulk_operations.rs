//! Sequential multi-operation writer.

use crate::error::{ImportError, ImportOutcome};
use crate::import::{BulkImporter, ImportResult};
use crate::models::{ErrorDetail, FailureKind, ImportMode, Record, StrategyKind, WriteOutcome};
use crate::store::error::detail_for_status;
use crate::store::{
    BatchOperation, MAX_BATCH_OPERATIONS, OperationResponse, OperationType, StoreHandle,
};
use async_trait::async_trait;
use std::sync::Arc;

impl From<ImportMode> for OperationType {
    fn from(mode: ImportMode) -> Self {
        match mode {
            ImportMode::Create => OperationType::Create,
            ImportMode::Upsert => OperationType::Upsert,
        }
    }
}

/// Submits fixed-size batches one after another. Operations inside a batch
/// succeed or fail independently.
pub struct BulkOperationsImporter {
    store: Option<Arc<dyn StoreHandle>>,
    batch_size: usize,
}

impl BulkOperationsImporter {
    pub fn new(batch_size: usize) -> Self {
        let clamped = batch_size.clamp(1, MAX_BATCH_OPERATIONS);
        if clamped != batch_size {
            log::warn!(
                "bulk operations: batch size {} clamped to {}",
                batch_size,
                clamped
            );
        }
        Self {
            store: None,
            batch_size: clamped,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Reduce the per-operation responses of one batch.
fn batch_result(batch: &[Record], mut responses: Vec<OperationResponse>) -> ImportResult {
    if responses.len() > batch.len() {
        log::warn!(
            "bulk operations: store answered {} operations of a batch of {}, ignoring the extra",
            responses.len(),
            batch.len()
        );
        responses.truncate(batch.len());
    }
    let answered = responses.len();
    let mut result = ImportResult::from_outcomes(responses.into_iter().map(|response| {
        if response.is_success() {
            WriteOutcome::success(response.request_charge)
        } else {
            let detail = detail_for_status(response.status_code, response.record_id.as_deref());
            WriteOutcome::failure(response.request_charge, detail)
        }
    }));

    // Operations the store did not answer were not confirmed.
    if answered < batch.len() {
        let missing = batch.len() - answered;
        result.failed_items += missing;
        result.errors.push(ErrorDetail::new(
            FailureKind::Other,
            format!("store returned no status for {missing} operations"),
        ));
    }

    result
}

#[async_trait]
impl BulkImporter for BulkOperationsImporter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BulkOperations
    }

    async fn initialize(&mut self, store: Arc<dyn StoreHandle>) -> ImportOutcome<()> {
        self.store = Some(store);
        Ok(())
    }

    async fn import(&self, records: &[Record], mode: ImportMode) -> ImportOutcome<ImportResult> {
        let store = self.store.clone().ok_or(ImportError::NotInitialized)?;
        let batch_count = records.len().div_ceil(self.batch_size);
        log::info!(
            "bulk operations: importing {} records with {} in {} batches",
            records.len(),
            mode,
            batch_count
        );

        let mut result = ImportResult::default();

        for (batch_index, batch) in records.chunks(self.batch_size).enumerate() {
            let operations: Vec<BatchOperation> = batch
                .iter()
                .map(|record| BatchOperation {
                    operation_type: mode.into(),
                    resource_body: record.clone(),
                })
                .collect();

            match store.submit_batch(operations).await {
                Ok(responses) => {
                    let batch_stats = batch_result(batch, responses);
                    log::debug!(
                        "bulk operations: batch {}/{} - {} ok, {} failed, {:.2} RU",
                        batch_index + 1,
                        batch_count,
                        batch_stats.succeeded_items,
                        batch_stats.failed_items,
                        batch_stats.request_units
                    );
                    result.merge(batch_stats);
                }
                Err(err) if err.is_timeout() => {
                    log::error!(
                        "bulk operations: batch {}/{} timed out, aborting import",
                        batch_index + 1,
                        batch_count
                    );
                    return Err(ImportError::Timeout {
                        source: err,
                        processed: result.succeeded_items,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "bulk operations: batch {}/{} rejected: {}",
                        batch_index + 1,
                        batch_count,
                        err
                    );
                    result.failed_items += batch.len();
                    result.errors.push(err.to_detail(None));
                }
            }
        }

        log::info!(
            "bulk operations: import complete, {} written, {} failed, {:.2} RU",
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
    use crate::test_support::records;

    fn response(status_code: u16, request_charge: f64) -> OperationResponse {
        OperationResponse {
            status_code,
            request_charge,
            record_id: None,
        }
    }

    #[test]
    fn batch_size_is_clamped_to_operation_ceiling() {
        assert_eq!(BulkOperationsImporter::new(500).batch_size(), MAX_BATCH_OPERATIONS);
        assert_eq!(BulkOperationsImporter::new(0).batch_size(), 1);
        assert_eq!(BulkOperationsImporter::new(25).batch_size(), 25);
    }

    #[test]
    fn created_and_applied_statuses_count_as_success() {
        let batch = records(3);
        let result = batch_result(
            &batch,
            vec![response(201, 5.0), response(200, 5.0), response(409, 1.0)],
        );

        assert_eq!(result.succeeded_items, 2);
        assert_eq!(result.failed_items, 1);
        assert_eq!(result.request_units, 11.0);
        assert_eq!(result.errors[0].kind, FailureKind::Conflict);
    }

    #[test]
    fn unanswered_operations_are_failures() {
        let batch = records(3);
        let result = batch_result(&batch, vec![response(201, 5.0)]);

        assert_eq!(result.succeeded_items, 1);
        assert_eq!(result.failed_items, 2);
        assert_eq!(result.total_items(), batch.len());
    }

    #[test]
    fn surplus_responses_are_ignored() {
        let batch = records(2);
        let result = batch_result(
            &batch,
            vec![response(201, 5.0), response(201, 5.0), response(409, 1.0)],
        );

        assert_eq!(result.succeeded_items, 2);
        assert_eq!(result.failed_items, 0);
        assert_eq!(result.request_units, 10.0);
        assert_eq!(result.total_items(), batch.len());
    }
}
