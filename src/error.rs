//! Error types for the master-dataset engine.
//!
//! Best-effort data completion (aggregation edge cases, identifier
//! resolution) never raises; it degrades and is reported through counts.
//! Anything touching data durability (master write, pre-write backup) is
//! strict and aborts the run.

use thiserror::Error;

/// Result type alias using our Error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Main error type for the master-dataset engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration error (malformed file, nonsensical tolerances).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input batch could not be read or is not in the canonical schema.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Configured key columns are absent from the canonical schema.
    /// Always degraded to a pass-through by the caller, never fatal.
    #[error("Schema mismatch, unknown key columns: {missing:?}")]
    SchemaMismatch { missing: Vec<String> },

    /// I/O error while persisting the master or a backup. Fatal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet read/write error. Fatal.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow conversion error. Fatal.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// CSV mirror error. Callers treat the mirror as best effort.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    /// Create an invalid-batch error.
    pub fn invalid_batch(msg: impl Into<String>) -> Self {
        EngineError::InvalidBatch(msg.into())
    }
}
