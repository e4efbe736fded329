//! Child-level change notifications.

use serde_json::Value;

/// The kind of mutation a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A child appeared in the watched collection (or in its window).
    Added,
    /// An existing child's value changed.
    Changed,
    /// A child left the collection (or its window).
    Removed,
}

/// One notification from a watched collection.
#[derive(Debug, Clone)]
pub struct ChildEvent {
    pub kind: ChangeKind,
    /// The child's native key within the collection.
    pub key: String,
    /// The child's current value; for [`ChangeKind::Removed`], the
    /// last-known value just before deletion.
    pub value: Value,
}

impl ChildEvent {
    pub fn added(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Added,
            key: key.into(),
            value,
        }
    }

    pub fn changed(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Changed,
            key: key.into(),
            value,
        }
    }

    pub fn removed(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Removed,
            key: key.into(),
            value,
        }
    }
}
