//! The source trait all change feeds implement.

use tokio::sync::mpsc;

use super::error::SourceError;
use super::event::ChildEvent;
use super::reference::FeedRef;

/// Stream of child notifications for one subscription.
///
/// Unbounded by design: the upstream store pushes notifications without
/// flow control, and mutation dispatch is fire-and-forget. Dropping the
/// receiver detaches the subscription; detaching twice is a no-op.
pub type EventStream = mpsc::UnboundedReceiver<ChildEvent>;

/// A hierarchical store that reports child-level changes.
///
/// Subscribing delivers an initial snapshot (every existing child inside
/// the handle's window, as [added] events) followed by live notifications
/// in upstream emission order.
///
/// [added]: super::ChangeKind::Added
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self, target: &FeedRef) -> Result<EventStream, SourceError>;
}
