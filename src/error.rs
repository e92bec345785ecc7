//! Error types for vaultlog-storage

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Missing identifier: {0}")]
    MissingIdentifier(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether a failed remote call is worth repeating.
    ///
    /// Remote `put`/`delete` are idempotent by id, so transient transport
    /// failures can be retried. Validation failures and explicit backend
    /// rejections cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable(_) | StoreError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout(e.to_string())
        } else {
            StoreError::BackendUnavailable(e.to_string())
        }
    }
}
