//! Error types for Strata.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in Strata memory and row-store operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // Allocation errors
    #[error("Out of memory: cannot allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Buffer insufficient")]
    BufferInsufficient,

    #[error("Buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    // Row store errors
    #[error("Row too large: {columns} columns do not fit in an empty block")]
    RowTooLarge { columns: usize },

    #[error("Size overflow: {what} exceeds limit {limit}")]
    SizeOverflow { what: &'static str, limit: usize },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    // Row model errors
    #[error("Column not found: table {table_id}, column {column_id}")]
    ColumnNotFound { table_id: u64, column_id: u64 },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Internal errors
    #[error("Unexpected state: {0}")]
    UnexpectedState(String),
}

impl StrataError {
    /// Returns true for the encoder's expected out-of-space condition.
    pub fn is_buffer_insufficient(&self) -> bool {
        matches!(self, StrataError::BufferInsufficient)
    }
}
