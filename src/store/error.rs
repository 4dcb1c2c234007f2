//! Error types for the record store

use thiserror::Error;

/// Errors that can occur while reading or writing a collection
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be (de)serialized
    #[error("Store serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
