//! Core Error Types
//!
//! A single taxonomy shared by every workflow. Each variant carries a stable
//! code for API responses and a retry classification.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::blob::BlobError;
use crate::money::MoneyError;

/// Errors returned by ledger and workflow operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed input, out-of-range amount, missing required field
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A debit would drive the balance below zero
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    /// Actor lacks the role or ownership the operation requires
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Status precondition not met (concurrent transition or stale caller state)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Transient infrastructure failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        CoreError::Unauthorized(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            CoreError::Unauthorized(_) => "AUTHORIZATION_ERROR",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::Unauthorized(_) => 403,
            CoreError::NotFound { .. } => 404,
            CoreError::Conflict(_) => 409,
            CoreError::InsufficientBalance { .. } => 422,
            CoreError::Storage(_) => 503,
        }
    }

    /// Only storage failures may be retried, and only for keyed operations.
    /// Conflicts require the caller to re-read state first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Storage(format!("record encoding: {}", e))
    }
}

impl From<BlobError> for CoreError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::InvalidPath(p) => CoreError::Validation(format!("invalid blob path: {}", p)),
            BlobError::NotFound(r) => CoreError::not_found("Blob", r),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

impl From<MoneyError> for CoreError {
    fn from(e: MoneyError) -> Self {
        CoreError::Validation(e.to_string())
    }
}
