use crate::store::StoreError;
use thiserror::Error;

pub type ImportOutcome<T> = Result<T, ImportError>;

/// Failures that abort a whole `import` call.
///
/// Item-level problems never show up here; they are recorded in the
/// `ImportResult` instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("importer used before a store handle was bound")]
    NotInitialized,
    #[error("failed to provision server-side resources: {0}")]
    Provisioning(#[source] StoreError),
    /// Some items may already be written; nothing is retried.
    #[error("store timed out after {processed} items were confirmed: {source}")]
    Timeout {
        #[source]
        source: StoreError,
        processed: usize,
    },
    #[error("concurrency limiter failed: {0}")]
    Limiter(String),
    #[error("import task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ImportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ImportError::Timeout { .. })
    }
}

impl From<tokio::sync::AcquireError> for ImportError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        ImportError::Limiter(err.to_string())
    }
}
