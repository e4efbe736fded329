//! Error types for change-feed sources.

use thiserror::Error;

/// Errors from source subscription and streaming.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot subscribe to '{path}': {reason}")]
    SubscribeFailed { path: String, reason: String },

    #[error("invalid source location '{path}'")]
    InvalidLocation { path: String },

    #[error("stream protocol error: {details}")]
    Protocol { details: String },
}
