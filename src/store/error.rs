use crate::models::{ErrorDetail, FailureKind};
use std::time::Duration;
use thiserror::Error;

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_TIMEOUT: u16 = 408;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_TOO_LARGE: u16 = 413;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL: u16 = 500;

/// Errors reported by a store handle.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The rejected attempt is still billed.
    #[error("item '{id}' already exists")]
    Conflict { id: String, request_charge: f64 },
    #[error("request of {size} bytes exceeds the {limit} byte limit")]
    Overflow { size: usize, limit: usize },
    #[error("execution timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("request rate too large, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("store returned status {status}: {message}")]
    Other { status: u16, message: String },
}

impl StoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::Conflict { .. } => STATUS_CONFLICT,
            StoreError::Overflow { .. } => STATUS_TOO_LARGE,
            StoreError::Timeout { .. } => STATUS_TIMEOUT,
            StoreError::Validation(_) => STATUS_BAD_REQUEST,
            StoreError::Throttled { .. } => STATUS_TOO_MANY_REQUESTS,
            StoreError::NotFound(_) => STATUS_NOT_FOUND,
            StoreError::Other { status, .. } => *status,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::Conflict { .. } => FailureKind::Conflict,
            StoreError::Overflow { .. } => FailureKind::Overflow,
            StoreError::Timeout { .. } => FailureKind::Timeout,
            StoreError::Validation(_) => FailureKind::Validation,
            StoreError::Throttled { .. } => FailureKind::Throttled,
            StoreError::NotFound(_) => FailureKind::NotFound,
            StoreError::Other { .. } => FailureKind::Other,
        }
    }

    /// Request units billed for the failed attempt.
    pub fn request_charge(&self) -> f64 {
        match self {
            StoreError::Conflict { request_charge, .. } => *request_charge,
            _ => 0.0,
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, StoreError::Overflow { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }

    /// Record this error as a non-fatal failure.
    pub fn to_detail(&self, record_id: Option<&str>) -> ErrorDetail {
        ErrorDetail::new(self.failure_kind(), self.to_string())
            .with_status(self.status_code())
            .with_record_id(record_id)
    }
}

/// Failure kind and message for a non-success operation status.
pub fn detail_for_status(status: u16, record_id: Option<&str>) -> ErrorDetail {
    let kind = match status {
        STATUS_CONFLICT => FailureKind::Conflict,
        STATUS_TOO_LARGE => FailureKind::Overflow,
        STATUS_TIMEOUT => FailureKind::Timeout,
        STATUS_BAD_REQUEST => FailureKind::Validation,
        STATUS_TOO_MANY_REQUESTS => FailureKind::Throttled,
        STATUS_NOT_FOUND => FailureKind::NotFound,
        _ => FailureKind::Other,
    };
    ErrorDetail::new(kind, format!("operation failed with status {status}"))
        .with_status(status)
        .with_record_id(record_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detail_carries_status_and_id() {
        let err = StoreError::Conflict {
            id: "a1".into(),
            request_charge: 1.24,
        };
        let detail = err.to_detail(Some("a1"));
        assert_eq!(detail.kind, FailureKind::Conflict);
        assert_eq!(detail.status_code, Some(409));
        assert_eq!(detail.record_id.as_deref(), Some("a1"));
        assert_eq!(err.request_charge(), 1.24);
    }

    #[test]
    fn classifies_special_errors() {
        assert!(StoreError::Overflow { size: 10, limit: 5 }.is_overflow());
        assert!(StoreError::Timeout { elapsed: Duration::from_secs(5) }.is_timeout());
        assert!(!StoreError::Validation("missing id".into()).is_timeout());
        assert_eq!(StoreError::NotFound("sp".into()).request_charge(), 0.0);
    }

    #[test]
    fn status_details_map_known_codes() {
        assert_eq!(detail_for_status(409, None).kind, FailureKind::Conflict);
        assert_eq!(detail_for_status(429, None).kind, FailureKind::Throttled);
        assert_eq!(detail_for_status(503, None).kind, FailureKind::Other);
    }
}
