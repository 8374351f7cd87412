//! Row protocol errors
//!
//! Expected conditions are values, not panics. Callers match on
//! [`RowError::class`] to decide between backing off, retrying and giving up.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::store::StoreError;
use crate::configuration::ConfigurationError;

/// Result type for row operations
pub type RowResult<T> = Result<T, RowError>;

/// How a caller should react to a failed row operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Row held by an in-flight operation; back off for the lock timeout.
    LockConflict,
    /// Transient; retry after the retry delay.
    Retriable,
    /// Retrying will not help.
    Fatal,
}

/// Row protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("Row {partition_key}/{row_key} is locked by an in-flight operation")]
    LockConflict {
        partition_key: String,
        row_key: String,
        locked_since: Option<DateTime<Utc>>,
    },

    #[error("Retriable: {0}")]
    Retriable(String),

    #[error("Version conflict on {partition_key}/{row_key}: expected {expected}, found {actual}")]
    VersionConflict {
        partition_key: String,
        row_key: String,
        expected: String,
        actual: u64,
    },

    #[error("Row not found: {partition_key}/{row_key}")]
    NotFound {
        partition_key: String,
        row_key: String,
    },

    #[error("Row already exists: {partition_key}/{row_key}")]
    AlreadyExists {
        partition_key: String,
        row_key: String,
    },

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Store limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("No table store registered for account '{0}'")]
    UnknownAccount(String),

    #[error("No replica at chain position {0}")]
    UnknownReplica(usize),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl RowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RowError::LockConflict { .. } => ErrorClass::LockConflict,
            RowError::Retriable(_) => ErrorClass::Retriable,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RowError::LockConflict { .. } => "RT_ROW_LOCK_CONFLICT",
            RowError::Retriable(_) => "RT_ROW_RETRIABLE",
            RowError::VersionConflict { .. } => "RT_ROW_VERSION_CONFLICT",
            RowError::NotFound { .. } => "RT_ROW_NOT_FOUND",
            RowError::AlreadyExists { .. } => "RT_ROW_ALREADY_EXISTS",
            RowError::InvalidBatch(_) => "RT_ROW_INVALID_BATCH",
            RowError::LimitExceeded(_) => "RT_ROW_LIMIT_EXCEEDED",
            RowError::UnknownAccount(_) => "RT_ROW_UNKNOWN_ACCOUNT",
            RowError::UnknownReplica(_) => "RT_ROW_UNKNOWN_REPLICA",
            RowError::Configuration(e) => e.code(),
        }
    }

    pub(crate) fn not_found(partition_key: &str, row_key: &str) -> Self {
        RowError::NotFound {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }
}

impl From<StoreError> for RowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LimitExceeded(detail) => RowError::LimitExceeded(detail),
            StoreError::InvalidBatch(detail) => RowError::InvalidBatch(detail),
            // A replica changed underneath the propagation.
            StoreError::PreconditionFailed { .. } | StoreError::NotFound { .. } => {
                RowError::Retriable(err.to_string())
            }
            StoreError::Unavailable(_) => RowError::Retriable(err.to_string()),
        }
    }
}
