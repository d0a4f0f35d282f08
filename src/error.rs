//! Error types for the ingest core.
//!
//! Entry points (CLI, HTTP handlers) work in `anyhow::Result`; the pipeline
//! itself returns [`IngestError`] so callers can react to the kind of failure
//! without inspecting message text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// No credential is stored, or the message source rejected it.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The message source answered with a non-success status.
    #[error("message source returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The request to the message source could not be completed.
    #[error("request to message source failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Another ingest run is already in flight in this process.
    #[error("an ingest run is already in progress")]
    Busy,
}

impl IngestError {
    /// Whether retrying with the same credential is pointless.
    pub fn is_auth(&self) -> bool {
        matches!(self, IngestError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
