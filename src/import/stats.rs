//! Import result aggregation.
//!
//! Every strategy reduces its per-item, per-operation or per-chunk outcomes
//! into one [`ImportResult`] through the same merge functions.

use crate::models::{ErrorDetail, WriteOutcome};
use serde::Serialize;

/// Aggregate outcome of one `import` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportResult {
    /// Request units consumed, including charges of failed attempts
    pub request_units: f64,
    /// Number of records that were not written
    pub failed_items: usize,
    /// Number of records confirmed written
    pub succeeded_items: usize,
    /// Failure details in the order they were observed
    pub errors: Vec<ErrorDetail>,
}

impl ImportResult {
    /// Merge another result into this one by summing counts and charges and
    /// appending its errors.
    ///
    /// Used to combine results of concurrent branches once they completed.
    pub fn merge(&mut self, other: ImportResult) {
        self.request_units += other.request_units;
        self.failed_items += other.failed_items;
        self.succeeded_items += other.succeeded_items;
        self.errors.extend(other.errors);
    }

    /// Account for a single item or operation.
    pub fn record(&mut self, outcome: WriteOutcome) {
        self.request_units += outcome.request_charge;
        if outcome.succeeded {
            self.succeeded_items += 1;
        } else {
            self.failed_items += 1;
        }
        if let Some(error) = outcome.error {
            self.errors.push(error);
        }
    }

    pub fn from_outcomes(outcomes: impl IntoIterator<Item = WriteOutcome>) -> Self {
        let mut result = Self::default();
        for outcome in outcomes {
            result.record(outcome);
        }
        result
    }

    /// Records accounted for, successful or not.
    pub fn total_items(&self) -> usize {
        self.failed_items + self.succeeded_items
    }
}

/// Merge a sequence of partial results into one.
pub fn aggregate(results: impl IntoIterator<Item = ImportResult>) -> ImportResult {
    let mut total = ImportResult::default();
    for result in results {
        total.merge(result);
    }
    total
}
