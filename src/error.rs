//! Error types for taskweave.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),
}

/// Errors from the external row/graph/vector store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Query failed on {table}: {reason}")]
    Query { table: String, reason: String },

    #[error("Malformed store response: {0}")]
    Malformed(String),
}

/// Errors from the LLM capability service.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed capability response: {reason}")]
    Malformed {
        reason: String,
        /// Raw response text, preserved for diagnosis.
        raw: String,
    },

    #[error("Capability call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from mail intake.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Mailbox connection failed: {0}")]
    Connect(String),

    #[error("Mailbox protocol error: {0}")]
    Protocol(String),

    #[error("Malformed message: {0}")]
    InvalidMessage(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
