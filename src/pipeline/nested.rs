//! Dynamic fan-out: one monitor group per child of a parent collection.
//!
//! The registry of live groups is owned by the event task itself, so
//! creation and teardown are serialized against the notifications that
//! drive them without any locking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::feed::{ChangeKind, ChangeSource, ChildEvent, FeedRef};
use crate::sink::IndexSink;
use crate::{debug_event, log_event};

use super::error::PipelineError;
use super::monitor::{ChildPathMonitor, Scope};
use super::spec::PathSpec;

/// Builds the monitor group for a newly added child key.
pub type MonitorFactory =
    Box<dyn Fn(&str) -> Result<Vec<ChildPathMonitor>, PipelineError> + Send + Sync>;

/// Watches a parent collection and provisions monitors per child.
///
/// Child-added builds a group through the factory; child-removed stops
/// it. A changed child is deliberately ignored: its properties have no
/// observable effect once the group is live. At most one group per key
/// is ever live; a re-added key displaces (and stops) the previous
/// group.
pub struct NestedPathMonitor {
    parent: FeedRef,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NestedPathMonitor {
    pub fn start(
        source: &dyn ChangeSource,
        parent: FeedRef,
        factory: MonitorFactory,
    ) -> Result<Self, PipelineError> {
        let mut events =
            source
                .subscribe(&parent)
                .map_err(|source| PipelineError::SubscribeFailed {
                    name: "nested".to_string(),
                    path: parent.path().to_string(),
                    source,
                })?;

        log_event!("nested", "monitoring", "{parent}");

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut registry: HashMap<String, Vec<ChildPathMonitor>> = HashMap::new();
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        event = events.recv() => match event {
                            Some(event) => provision(&mut registry, &factory, event).await,
                            None => break,
                        },
                    }
                }
                for (key, group) in registry.drain() {
                    stop_group(group).await;
                    debug_event!("nested", "stopped", "{key}");
                }
            }
        });

        Ok(Self {
            parent,
            cancel,
            task: Some(task),
        })
    }

    /// The multi-tenant case: every spec is activated per child key,
    /// rooted at `parent/childKey`, with the child key as correlation
    /// scope.
    pub fn for_specs(
        source: Arc<dyn ChangeSource>,
        sink: Arc<dyn IndexSink>,
        parent: FeedRef,
        specs: Vec<Arc<dyn PathSpec>>,
    ) -> Result<Self, PipelineError> {
        let factory_source = Arc::clone(&source);
        let scope_root = parent.clone();
        let factory: MonitorFactory = Box::new(move |key| {
            specs
                .iter()
                .map(|spec| {
                    ChildPathMonitor::start_scoped(
                        Arc::clone(spec),
                        factory_source.as_ref(),
                        Arc::clone(&sink),
                        Some(Scope {
                            root: scope_root.child(key),
                            key: key.to_string(),
                        }),
                    )
                })
                .collect()
        });
        Self::start(source.as_ref(), parent, factory)
    }

    /// The parent collection being watched.
    pub fn parent(&self) -> &FeedRef {
        &self.parent
    }

    /// Stop every live group and wait for the event task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NestedPathMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn provision(
    registry: &mut HashMap<String, Vec<ChildPathMonitor>>,
    factory: &MonitorFactory,
    event: ChildEvent,
) {
    match event.kind {
        ChangeKind::Added => match factory(&event.key) {
            Ok(group) => {
                log_event!("nested", "monitoring child", "{}", event.key);
                if let Some(displaced) = registry.insert(event.key.clone(), group) {
                    stop_group(displaced).await;
                }
            }
            Err(e) => {
                tracing::error!("[nested] failed to start monitors for {}: {e}", event.key);
            }
        },
        // A changed child never re-provisions its group.
        ChangeKind::Changed => {}
        ChangeKind::Removed => {
            if let Some(group) = registry.remove(&event.key) {
                stop_group(group).await;
                log_event!("nested", "stopped monitoring child", "{}", event.key);
            }
        }
    }
}

async fn stop_group(group: Vec<ChildPathMonitor>) {
    for monitor in group {
        monitor.stop().await;
    }
}
