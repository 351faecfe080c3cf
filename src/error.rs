//! Error types for the gas ledger

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    /// A stored block's digest or linkage no longer matches its contents.
    #[error("Integrity violation at block {index}: {reason}")]
    IntegrityViolation { index: u64, reason: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    /// Internal contract breach, e.g. a commit against a stale tail.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Index of the first bad block, when this is an integrity violation.
    pub fn violation_index(&self) -> Option<u64> {
        match self {
            ChainError::IntegrityViolation { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::StorageFailure(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StorageFailure(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::InvalidTransaction(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
