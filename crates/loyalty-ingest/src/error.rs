//! Error types for the ingestion pipeline
//!
//! Transient fetch problems (timeouts, 5xx, malformed bodies, 429) never show
//! up here: the page fetcher absorbs them and reports a
//! [`FetchOutcome`](crate::source::FetchOutcome). A pagination stopped by the
//! consecutive-failure ceiling is a run status, not an error. Everything in
//! [`IngestError`] is fatal to the run.

use loyalty_common::ConfigError;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential acquisition failed; not retried
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The first page could not be fetched at all, or a request could not be built
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The sink rejected a batch
    #[error("Upload of batch {sequence} failed: {message}")]
    Upload { sequence: u64, message: String },

    /// An upload worker stopped without reporting (panic or channel loss)
    #[error("Upload worker error: {0}")]
    Worker(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl IngestError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }
}
