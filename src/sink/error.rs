//! Error types for index sinks.

use thiserror::Error;

/// Errors from index mutations.
///
/// These are logged by the pipeline and never escalated: a failed
/// mutation leaves the index stale until the next change to the same
/// record re-triggers indexing.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("request failed: {reason}")]
    Request { reason: String },

    #[error("backend rejected {name}: status {status}: {body}")]
    Backend {
        name: String,
        status: u16,
        body: String,
    },

    #[error("document {name} not found")]
    NotFound { name: String },
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Request {
            reason: e.to_string(),
        }
    }
}
