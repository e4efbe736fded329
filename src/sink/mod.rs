//! Search-index sinks.
//!
//! A sink exposes the two mutations the pipeline needs: an upsert that
//! merges a document fragment into the stored document (creating it when
//! absent) and a wholesale delete by id. Both are asynchronous; callers
//! issue them fire-and-forget and react only by logging the outcome.

mod elastic;
mod error;
mod memory;

pub use elastic::EsSink;
pub use error::SinkError;
pub use memory::{MemorySink, Mutation};

use async_trait::async_trait;
use serde_json::Value;

/// Write access to the search backend.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Merge `fragment` into the document at `(index, doc_type, id)`,
    /// creating it if absent. Fields not present in the fragment are
    /// left untouched.
    async fn upsert(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        fragment: Value,
    ) -> Result<(), SinkError>;

    /// Remove the document wholesale. Deleting a nonexistent document is
    /// a backend error the caller is expected to log, not escalate.
    async fn delete(&self, index: &str, doc_type: &str, id: &str) -> Result<(), SinkError>;
}
