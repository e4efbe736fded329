//! Error types for pipeline activation.

use thiserror::Error;

use crate::feed::SourceError;

/// Errors raised while activating a feed.
///
/// These are the only errors the pipeline surfaces to callers: once a
/// monitor is live, every failure is logged and recovered locally.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("path '{name}' is missing required field '{field}'")]
    MissingField { name: String, field: &'static str },

    #[error("path '{name}' failed to subscribe at '{path}': {source}")]
    SubscribeFailed {
        name: String,
        path: String,
        #[source]
        source: SourceError,
    },
}
