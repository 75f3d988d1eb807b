//! Settlement error types

use thiserror::Error;

use crate::types::SettlementStatus;

/// Errors that can occur during settlement operations
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Request failed schema or input checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conditional write lost against a concurrent writer
    #[error("Version conflict on settlement {id}: expected version {expected}")]
    Conflict { id: String, expected: i64 },

    /// Same identifier was already used for different content
    #[error("Settlement {0} already exists with different content")]
    IdempotencyConflict(String),

    /// Settlement not found
    #[error("Settlement not found: {0}")]
    NotFound(String),

    /// Reversal requested for an instruction that is not settled
    #[error("Settlement {id} is {status}, only settled instructions can be reversed")]
    NotSettled { id: String, status: SettlementStatus },

    /// Requested status change is not an edge of the lifecycle
    #[error("Invalid transition for settlement {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: SettlementStatus,
        to: SettlementStatus,
    },

    /// Subject is not allowed to see or act on the instruction
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Payload could not be sealed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Payload could not be opened (tampered, wrong key or wrong context)
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Backing store is unreachable
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Non-transient storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Stable machine-readable code used in API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "VALIDATION_ERROR",
            SettlementError::Conflict { .. } => "VERSION_CONFLICT",
            SettlementError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            SettlementError::NotFound(_) => "SETTLEMENT_NOT_FOUND",
            SettlementError::NotSettled { .. } => "NOT_SETTLED",
            SettlementError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SettlementError::Forbidden(_) => "FORBIDDEN",
            SettlementError::Encryption(_) => "ENCRYPTION_ERROR",
            SettlementError::Decryption(_) => "DECRYPTION_ERROR",
            SettlementError::PersistenceUnavailable(_) => "PERSISTENCE_UNAVAILABLE",
            SettlementError::Storage(_) => "STORAGE_ERROR",
            SettlementError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same call later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SettlementError::PersistenceUnavailable(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for SettlementError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => SettlementError::PersistenceUnavailable(err.to_string()),
            other => SettlementError::Storage(other.to_string()),
        }
    }
}

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;
