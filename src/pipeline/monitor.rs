//! Per-feed monitor: one live subscription driving index mutations.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::feed::{ChangeKind, ChangeSource, ChildEvent, FeedRef};
use crate::sink::IndexSink;
use crate::{debug_event, log_event};

use super::error::PipelineError;
use super::spec::{PathSpec, validate};

/// Placement of a feed under a nested monitor: the resolved parent
/// handle and the child key used as correlation scope.
#[derive(Debug, Clone)]
pub struct Scope {
    pub root: FeedRef,
    pub key: String,
}

/// One activated feed.
///
/// Owns the subscription's event task. Notifications are processed in
/// delivery order; the mutations they trigger are spawned fire-and-forget
/// and may complete in any order. [`stop`](Self::stop) detaches the
/// subscription atomically: once it returns, no further notification is
/// processed, though mutations already in flight still complete.
#[derive(Debug)]
pub struct ChildPathMonitor {
    name: String,
    target: FeedRef,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChildPathMonitor {
    /// Activate a spec against a source and sink.
    ///
    /// Fails fast when the spec is missing its location, index or type,
    /// or when the source rejects the subscription.
    pub fn start(
        spec: Arc<dyn PathSpec>,
        source: &dyn ChangeSource,
        sink: Arc<dyn IndexSink>,
    ) -> Result<Self, PipelineError> {
        Self::start_scoped(spec, source, sink, None)
    }

    /// Activate a spec relative to a nested monitor's child.
    pub fn start_scoped(
        spec: Arc<dyn PathSpec>,
        source: &dyn ChangeSource,
        sink: Arc<dyn IndexSink>,
        scope: Option<Scope>,
    ) -> Result<Self, PipelineError> {
        validate(spec.as_ref())?;

        let base = match &scope {
            Some(scope) => scope.root.child(spec.source_location()),
            None => FeedRef::new(spec.source_location()),
        };
        let target = spec.narrow(base);

        let mut events =
            source
                .subscribe(&target)
                .map_err(|source| PipelineError::SubscribeFailed {
                    name: spec.name().to_string(),
                    path: target.path().to_string(),
                    source,
                })?;

        log_event!(
            spec.name(),
            "indexing",
            "{}/{} from {}",
            spec.index(),
            spec.doc_type(),
            target
        );

        let name = spec.name().to_string();
        let cancel = CancellationToken::new();
        let worker = Worker {
            spec,
            sink,
            scope: scope.map(|s| s.key),
        };

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        event = events.recv() => match event {
                            Some(event) => worker.process(event),
                            None => break,
                        },
                    }
                }
            }
        });

        Ok(Self {
            name,
            target,
            cancel,
            task: Some(task),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The narrowed handle this monitor is subscribed to.
    pub fn target(&self) -> &FeedRef {
        &self.target
    }

    /// Detach the subscription and wait for the event task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ChildPathMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    spec: Arc<dyn PathSpec>,
    sink: Arc<dyn IndexSink>,
    scope: Option<String>,
}

impl Worker {
    /// Handle one notification: filter, resolve, then dispatch the index
    /// mutation without waiting for it.
    ///
    /// Removal re-applies the filter on the pre-removal snapshot, so a
    /// record that was never indexed never triggers a delete.
    fn process(&self, event: ChildEvent) {
        if !self.spec.filter(&event.value) {
            debug_event!(self.spec.name(), "filtered", "{}", event.key);
            return;
        }

        let id = self.spec.resolve(&event.value, &event.key);
        let name = format!("{}/{}/{}", self.spec.index(), self.spec.doc_type(), id);
        let feed = self.spec.name().to_string();
        let index = self.spec.index().to_string();
        let doc_type = self.spec.doc_type().to_string();
        let sink = Arc::clone(&self.sink);

        match event.kind {
            ChangeKind::Added | ChangeKind::Changed => {
                let verb = if event.kind == ChangeKind::Added {
                    "indexed"
                } else {
                    "updated"
                };
                let fragment = self.spec.parse(&event.value, &event.key, self.scope.as_deref());
                tokio::spawn(async move {
                    match sink.upsert(&index, &doc_type, &id, fragment).await {
                        Ok(()) => log_event!(feed, verb, "{name}"),
                        Err(e) => tracing::error!("[{feed}] failed to index {name}: {e}"),
                    }
                });
            }
            ChangeKind::Removed => {
                tokio::spawn(async move {
                    match sink.delete(&index, &doc_type, &id).await {
                        Ok(()) => log_event!(feed, "deleted", "{name}"),
                        Err(e) => tracing::error!("[{feed}] failed to delete {name}: {e}"),
                    }
                });
            }
        }
    }
}
