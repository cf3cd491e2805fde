//! Error types for the glance capture pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using glance's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for glance operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job record does not exist
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Enqueue input was rejected; no job was created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload bytes are gone from the transient cache
    #[error("Payload lost for job {0}")]
    PayloadLost(Uuid),

    /// Analysis engine failed on a payload
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// An enrichment step failed
    #[error("Enrichment error: {0}")]
    Enrichment(String),

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Job store rejected or failed an operation
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a job that hit this error may be attempted again.
    ///
    /// Lost payloads and bad input never recover by retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Analysis(_)
                | Error::Store(_)
                | Error::Database(_)
                | Error::Io(_)
                | Error::Request(_)
                | Error::Internal(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
