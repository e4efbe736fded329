//! Change-feed source boundary.
//!
//! The upstream store is hierarchical and event-emitting: for any watched
//! collection it reports child-level add/change/remove notifications, each
//! carrying the child's native key and its current (or, for removals,
//! last-known) value.
//!
//! # Architecture
//!
//! ```text
//! ChangeSource (trait)
//!   - subscribe(FeedRef) -> EventStream of ChildEvent
//!         |
//!    +---------+----------+
//!    |                    |
//! MemoryStore         RestSource
//! (in-process,        (streaming HTTP,
//!  tests/dry runs)     reconnecting)
//! ```

mod error;
mod event;
mod memory;
mod reference;
mod rest;
mod source;

pub use error::SourceError;
pub use event::{ChangeKind, ChildEvent};
pub use memory::MemoryStore;
pub use reference::{FeedQuery, FeedRef};
pub use rest::RestSource;
pub use source::{ChangeSource, EventStream};
