//! The change-stream indexing pipeline.
//!
//! Turns raw add/change/remove notifications from watched collections
//! into index mutations.
//!
//! # Architecture
//!
//! ```text
//! NestedPathMonitor
//!   - watches a parent collection's direct children
//!   - per child key, a factory builds a monitor group
//!         |
//! ChildPathMonitor (one per activated PathSpec)
//!   - filter -> resolve -> parse
//!   - fire-and-forget upsert/delete against the IndexSink
//! ```

mod error;
mod monitor;
mod nested;
pub mod paths;
mod spec;

pub use error::PipelineError;
pub use monitor::{ChildPathMonitor, Scope};
pub use nested::{MonitorFactory, NestedPathMonitor};
pub use spec::{PathSpec, StaticPathSpec, project};
