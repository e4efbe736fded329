//! Continuous mirror from a hierarchical, event-emitting data store into
//! a search index.
//!
//! Watched collections ("paths") deliver child-level add/change/remove
//! notifications. Each activated [`PathSpec`] filters, resolves and
//! shapes those records into document fragments, which merge into target
//! documents via upsert. Feeds resolving to the same document id build a
//! composite document from disjoint streams.
//!
//! ```text
//! source mutation
//!   -> ChildEvent (native key + record)
//!   -> filter -> resolve -> parse
//!   -> IndexSink::upsert / IndexSink::delete
//! ```
//!
//! The index is eventually consistent with the source: delivery is
//! at-least-once, mutations are fire-and-forget, and a failed mutation
//! is repaired by the next change to the same record.

pub mod config;
pub mod feed;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod sink;

pub use config::Settings;
pub use feed::{ChangeKind, ChangeSource, ChildEvent, FeedRef, MemoryStore, RestSource};
pub use pipeline::{ChildPathMonitor, NestedPathMonitor, PathSpec, PipelineError, StaticPathSpec};
pub use sink::{EsSink, IndexSink, MemorySink, SinkError};
