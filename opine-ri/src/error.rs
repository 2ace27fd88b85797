//! Error types for opine-ri
//!
//! **[RI-ERR-010]** Three-way taxonomy: transient store errors retry,
//! per-record compute errors accumulate in the run summary, configuration
//! errors abort the run before any write.

use thiserror::Error;

/// Result type for reconciliation operations
pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Store connectivity, lock contention, or timeout. Retried at the
    /// batch level with backoff; never aborts the run.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Canonicalization or hashing failed for one record. Isolated to that
    /// record and recorded in the run summary.
    #[error("Record {guid}: {message}")]
    RecordCompute { guid: String, message: String },

    /// Required reference data missing or invalid. Fatal; aborts the run
    /// before any write.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another reconciliation run holds the lease
    #[error("Reconciliation lease held by {holder} (expires at {expires_at})")]
    LeaseHeld { holder: String, expires_at: i64 },

    /// opine-common error
    #[error("Common error: {0}")]
    Common(#[from] opine_common::Error),
}

impl ReconcileError {
    /// Classify a sqlx error: contention and connectivity problems are
    /// transient, everything else passes through as a store error.
    pub fn from_store(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            ReconcileError::TransientStore(err.to_string())
        } else {
            ReconcileError::Common(opine_common::Error::Database(err))
        }
    }

    /// A fetch or flush that exceeded its deadline
    pub fn timeout(operation: &str, elapsed_ms: u64) -> Self {
        ReconcileError::TransientStore(format!("{} timed out after {} ms", operation, elapsed_ms))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::TransientStore(_))
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = ReconcileError::from_store(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err = ReconcileError::from_store(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_constructor() {
        let err = ReconcileError::timeout("page fetch", 5000);
        assert!(err.is_transient());
        assert!(err.to_string().contains("page fetch"));
    }
}
