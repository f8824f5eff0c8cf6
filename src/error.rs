//! Error types for the document assembly pipeline.

use uuid::Uuid;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Email error: {0}")]
    Email(#[from] EmailError),
}

/// Work queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is closed, item dropped")]
    Closed,
}

/// Record store errors (opaque backend).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Selection stage errors.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("Loan type {id} could not be resolved")]
    LoanTypeNotFound { id: Uuid },
}

/// Template merge and format conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Invalid template body: {0}")]
    InvalidBody(String),

    #[error("Failed to serialize rendered document: {0}")]
    Serialize(String),

    #[error("Format conversion {from} -> {to} failed: {reason}")]
    Conversion {
        from: String,
        to: String,
        reason: String,
    },
}

/// Email stage errors.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Invalid email address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    BuildFailed(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Failed to build attachment archive: {0}")]
    ArchiveFailed(String),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
