//! Inventory Error Types
//!
//! Rejections before any mutation, failures after the debit committed, and
//! the record store's own I/O errors.

use thiserror::Error;

/// Input validation errors
///
/// Produced by the validation pipeline and by identifier parsing. Never
/// involves I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid quantity: {value:?} (must be a positive integer)")]
    InvalidQuantity { value: String },

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("Source and destination store cannot be the same")]
    SameStore,

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid length for {field}: max {max}, got {actual}")]
    InvalidLength {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("Invalid format for {field}: '{value}'")]
    InvalidFormat { field: &'static str, value: String },

    #[error("Reorder threshold must be non-negative, got {0}")]
    InvalidMinQty(i64),
}

/// Errors raised by an `InventoryStore` implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Operation not supported by this store")]
    Unsupported,

    /// The commit was sent but its outcome is unknown
    #[error("Commit outcome unknown: {0}")]
    CommitUncertain(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                StoreError::Constraint(e.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Transfer error taxonomy
///
/// `Validation`, `SourceNotFound`, `CorruptedSource`, `InsufficientStock` and
/// `ConcurrencyConflict` leave both records untouched, as does `Store` raised
/// before or instead of a commit. `TransferFailed` and `CompensationFailure`
/// only happen once the source debit may have committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("No inventory tracked for product {product_id} at store {store_id}")]
    SourceNotFound {
        product_id: String,
        store_id: String,
    },

    #[error("Source stock is corrupted (stored qty {original}); reconcile before transferring")]
    CorruptedSource { original: i64 },

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("Stock changed concurrently (current qty {current_qty}); retry with fresh data")]
    ConcurrencyConflict { current_qty: i64 },

    #[error("Failed to resolve destination record: {0}")]
    DestinationCreate(String),

    /// `compensated: false` means the final state of both rows is unknown
    #[error("Transfer failed after debit (compensated: {compensated}): {reason}")]
    TransferFailed { reason: String, compensated: bool },

    #[error(
        "FATAL: compensation failed, manual reconciliation required (credit error: {reason}; compensation error: {compensation_error})"
    )]
    CompensationFailure {
        reason: String,
        compensation_error: String,
    },

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

impl TransferError {
    /// Stable error code for callers
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "VALIDATION_ERROR",
            TransferError::SourceNotFound { .. } => "SOURCE_NOT_FOUND",
            TransferError::CorruptedSource { .. } => "CORRUPTED_SOURCE",
            TransferError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            TransferError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            TransferError::DestinationCreate(_) => "DESTINATION_CREATE_ERROR",
            TransferError::TransferFailed { .. } => "TRANSFER_FAILED",
            TransferError::CompensationFailure { .. } => "COMPENSATION_FAILURE",
            TransferError::Store(_) => "STORE_ERROR",
        }
    }

    /// No record was mutated by the failed attempt
    pub fn is_pre_mutation(&self) -> bool {
        match self {
            TransferError::TransferFailed { .. } | TransferError::CompensationFailure { .. } => {
                false
            }
            _ => true,
        }
    }

    /// Caller may retry with fresh data
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ConcurrencyConflict { .. }
                | TransferError::Store(StoreError::Unavailable(_))
                | TransferError::TransferFailed {
                    compensated: true,
                    ..
                }
        )
    }

    /// Needs operator escalation; units may be stranded
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::CompensationFailure { .. })
    }

    /// Quantity the caller should plan the next attempt around
    pub fn available_hint(&self) -> Option<i64> {
        match self {
            TransferError::InsufficientStock { available, .. } => Some(*available),
            TransferError::ConcurrencyConflict { current_qty } => Some(*current_qty),
            TransferError::Validation(ValidationError::InsufficientStock { available, .. }) => {
                Some(*available)
            }
            _ => None,
        }
    }
}
