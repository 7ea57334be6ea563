//! Error types for the store and the recovery token cache.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown record kind: {0}")]
    UnknownKind(String),

    #[error("Record not found: {kind}/{key}")]
    RecordNotFound { kind: String, key: String },

    #[error("Duplicate key in {kind}: {key}")]
    DuplicateKey { kind: String, key: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Recovery token not found")]
    TokenNotFound,

    #[error("Recovery token expired")]
    TokenExpired,

    /// The mutation was applied in memory but the snapshot write did not
    /// complete (unless the store rolls back on persistence failure).
    #[error("Persistence failed for {kind}: {reason}")]
    PersistenceFailed { kind: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    pub(crate) fn not_found(kind: &str, key: &str) -> Self {
        StoreError::RecordNotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn duplicate(kind: &str, key: &str) -> Self {
        StoreError::DuplicateKey {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
