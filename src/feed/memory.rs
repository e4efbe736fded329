//! In-process hierarchical store with change notifications.
//!
//! Backs the integration tests and local dry runs: collections are plain
//! key-ordered maps, and every mutation is fanned out to the live
//! subscriptions whose window it touches.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::SourceError;
use super::event::ChildEvent;
use super::reference::FeedRef;
use super::source::{ChangeSource, EventStream};

/// An in-memory change source.
///
/// Mutations through [`put`](Self::put) and [`remove`](Self::remove) are
/// delivered synchronously into each matching subscription's channel, in
/// the order they are issued.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Collection path -> children, ordered by native key.
    tree: HashMap<String, BTreeMap<String, Value>>,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    target: FeedRef,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a child value, reporting added or changed to subscribers.
    ///
    /// A write that moves a child out of a subscription's window is
    /// reported to that subscription as a removal, mirroring how the
    /// upstream store treats windowed queries.
    pub fn put(&self, path: &str, key: &str, value: Value) {
        let path = FeedRef::new(path).path().to_string();
        let mut inner = self.inner.lock();
        let previous = inner
            .tree
            .entry(path.clone())
            .or_default()
            .insert(key.to_string(), value.clone());

        inner.subscribers.retain(|sub| {
            if sub.target.path() != path {
                return !sub.tx.is_closed();
            }
            let was_visible = previous.as_ref().is_some_and(|v| sub.target.matches(v));
            let event = match (was_visible, sub.target.matches(&value)) {
                (false, true) => ChildEvent::added(key, value.clone()),
                (true, true) => ChildEvent::changed(key, value.clone()),
                (true, false) => {
                    ChildEvent::removed(key, previous.clone().unwrap_or(Value::Null))
                }
                (false, false) => return !sub.tx.is_closed(),
            };
            sub.tx.send(event).is_ok()
        });
    }

    /// Delete a child, reporting removed with its last-known value.
    pub fn remove(&self, path: &str, key: &str) {
        let path = FeedRef::new(path).path().to_string();
        let mut inner = self.inner.lock();
        let Some(previous) = inner
            .tree
            .get_mut(&path)
            .and_then(|children| children.remove(key))
        else {
            return;
        };

        inner.subscribers.retain(|sub| {
            if sub.target.path() != path || !sub.target.matches(&previous) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(ChildEvent::removed(key, previous.clone())).is_ok()
        });
    }

    /// Current value of a child, if present.
    pub fn get(&self, path: &str, key: &str) -> Option<Value> {
        let path = FeedRef::new(path).path().to_string();
        self.inner
            .lock()
            .tree
            .get(&path)
            .and_then(|children| children.get(key).cloned())
    }
}

impl ChangeSource for MemoryStore {
    fn subscribe(&self, target: &FeedRef) -> Result<EventStream, SourceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();

        // Initial snapshot: existing children inside the window arrive
        // as added events, in native key order.
        if let Some(children) = inner.tree.get(target.path()) {
            for (key, value) in children {
                if target.matches(value) {
                    let _ = tx.send(ChildEvent::added(key, value.clone()));
                }
            }
        }

        inner.subscribers.push(Subscriber {
            target: target.clone(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeKind;
    use serde_json::json;

    #[test]
    fn test_snapshot_then_live_events() {
        let store = MemoryStore::new();
        store.put("queue", "a", json!({ "n": 1 }));

        let mut events = store.subscribe(&FeedRef::new("queue")).unwrap();

        let snap = events.try_recv().unwrap();
        assert_eq!(snap.kind, ChangeKind::Added);
        assert_eq!(snap.key, "a");

        store.put("queue", "a", json!({ "n": 2 }));
        let live = events.try_recv().unwrap();
        assert_eq!(live.kind, ChangeKind::Changed);
        assert_eq!(live.value, json!({ "n": 2 }));

        store.remove("queue", "a");
        let gone = events.try_recv().unwrap();
        assert_eq!(gone.kind, ChangeKind::Removed);
        assert_eq!(gone.value, json!({ "n": 2 }));
    }

    #[test]
    fn test_window_excludes_old_children() {
        let store = MemoryStore::new();
        store.put("queue", "old", json!({ "time": 50 }));
        store.put("queue", "new", json!({ "time": 150 }));

        let narrowed = FeedRef::new("queue").order_by_child("time").start_at(100.0);
        let mut events = store.subscribe(&narrowed).unwrap();

        let snap = events.try_recv().unwrap();
        assert_eq!(snap.key, "new");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_window_exit_reports_removal() {
        let store = MemoryStore::new();
        let narrowed = FeedRef::new("queue").order_by_child("time").start_at(100.0);
        let mut events = store.subscribe(&narrowed).unwrap();

        store.put("queue", "a", json!({ "time": 150 }));
        assert_eq!(events.try_recv().unwrap().kind, ChangeKind::Added);

        store.put("queue", "a", json!({ "time": 10 }));
        let out = events.try_recv().unwrap();
        assert_eq!(out.kind, ChangeKind::Removed);
        // Last-known value inside the window, not the one that left it.
        assert_eq!(out.value, json!({ "time": 150 }));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let store = MemoryStore::new();
        let events = store.subscribe(&FeedRef::new("queue")).unwrap();
        drop(events);

        store.put("queue", "a", json!(1));
        assert!(store.inner.lock().subscribers.is_empty());
    }
}
