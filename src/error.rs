//! Error types for the muninn library.
//!
//! All fallible operations return [`Result`], with [`MuninnError`] covering
//! the failure kinds a caller can observe: configuration problems, read-only
//! violations, transaction misuse, and I/O or serialization failures from the
//! underlying index storage.

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for muninn operations.
#[derive(Error, Debug)]
pub enum MuninnError {
    /// I/O errors from index directories, the logical log or the store file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid index configuration (unknown index type, unknown analyzer).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Mutation attempted against a read-only index provider.
    #[error("Read-only index: {0}")]
    ReadOnly(String),

    /// Query parsing or evaluation errors.
    #[error("Query error: {0}")]
    Query(String),

    /// Transaction lifecycle violations (wrong state for the operation).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Index-level errors.
    #[error("Index error: {0}")]
    Index(String),

    /// Storage-related errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Segment or command serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`MuninnError`].
pub type Result<T> = std::result::Result<T, MuninnError>;

impl MuninnError {
    /// Create a new configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        MuninnError::Configuration(msg.into())
    }

    /// Create a new read-only error.
    pub fn read_only<S: Into<String>>(msg: S) -> Self {
        MuninnError::ReadOnly(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        MuninnError::Query(msg.into())
    }

    /// Create a new transaction error.
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        MuninnError::Transaction(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        MuninnError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        MuninnError::Storage(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        MuninnError::Serialization(msg.into())
    }
}
