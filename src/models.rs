use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Field holding the unique identifier of every record.
pub const ID_FIELD: &str = "id";

/// Partition-key value shared by all generated records. The chunk procedure is
/// scoped to a single partition, so bulk data sets keep this static.
pub const PARTITION_KEY_VALUE: &str = "bulk";

// ===== Records =====

/// A flat JSON document destined for the store.
///
/// Records are treated as opaque apart from the `id` field and the field named
/// by the store's partition-key path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn partition_key(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Replace a field, returning a new record. Submitted records are never
    /// edited in place.
    pub fn with_field(&self, field: &str, value: impl Into<Value>) -> Self {
        let mut fields = self.0.clone();
        fields.insert(field.to_string(), value.into());
        Self(fields)
    }

    /// Size of the record's JSON encoding in bytes.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(&self.0).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

// ===== Import selection =====

/// How each record is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Insert; an existing key is a conflict.
    Create,
    /// Insert or replace.
    Upsert,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportMode::Create => "create",
            ImportMode::Upsert => "upsert",
        })
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(ImportMode::Create),
            "upsert" => Ok(ImportMode::Upsert),
            other => Err(format!("unsupported import mode '{other}'")),
        }
    }
}

/// The write strategies the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Bounded-concurrency single-item writes.
    Parallel,
    /// Sequential multi-operation submissions.
    BulkOperations,
    /// Adaptive chunk writes through the server-side procedure.
    StoredProcedure,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Parallel,
        StrategyKind::StoredProcedure,
        StrategyKind::BulkOperations,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::Parallel => "parallel",
            StrategyKind::BulkOperations => "bulk-operations",
            StrategyKind::StoredProcedure => "stored-procedure",
        })
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "parallel" => Ok(StrategyKind::Parallel),
            "bulk-operations" | "bulk" | "batch" => Ok(StrategyKind::BulkOperations),
            "stored-procedure" | "procedure" | "chunked" => Ok(StrategyKind::StoredProcedure),
            other => Err(format!("unsupported import strategy '{other}'")),
        }
    }
}

// ===== Outcomes =====

/// Classification of a recorded (non-fatal) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Conflict,
    Overflow,
    Validation,
    Throttled,
    Timeout,
    NotFound,
    RetryBudgetExhausted,
    Other,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            record_id: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_record_id(mut self, record_id: Option<&str>) -> Self {
        self.record_id = record_id.map(str::to_string);
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status_code {
            write!(f, "[{status}] ")?;
        }
        if let Some(id) = &self.record_id {
            write!(f, "{id}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// Result of writing a single item (or a single batch operation).
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub succeeded: bool,
    pub request_charge: f64,
    pub error: Option<ErrorDetail>,
}

impl WriteOutcome {
    pub fn success(request_charge: f64) -> Self {
        Self {
            succeeded: true,
            request_charge,
            error: None,
        }
    }

    pub fn failure(request_charge: f64, error: ErrorDetail) -> Self {
        Self {
            succeeded: false,
            request_charge,
            error: Some(error),
        }
    }
}
