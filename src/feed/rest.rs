//! Streaming REST change source.
//!
//! Subscribes to a collection over the store's streaming REST protocol
//! (`Accept: text/event-stream`) and converts the wire-level `put`/`patch`
//! frames into child-level add/change/remove notifications by diffing a
//! local snapshot of the collection.
//!
//! Disconnects are handled internally: the stream task reconnects with
//! exponential backoff and re-diffs the server's fresh snapshot, so
//! subscribers never observe the outage (duplicate changes after a
//! reconnect are possible; delivery is at-least-once).

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::debug_event;

use super::error::SourceError;
use super::event::ChildEvent;
use super::reference::FeedRef;
use super::source::{ChangeSource, EventStream};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A change source speaking the store's streaming REST protocol.
///
/// Subscriptions spawn a background stream task on the current tokio
/// runtime; dropping the returned receiver detaches the task at its next
/// frame.
pub struct RestSource {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl RestSource {
    /// Create a source for the store at `base_url`.
    ///
    /// The client carries no overall request timeout: event streams are
    /// held open indefinitely. Only connection establishment is bounded.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::SubscribeFailed {
                path: base_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client,
        })
    }

    fn stream_request(&self, target: &FeedRef) -> reqwest::RequestBuilder {
        let url = format!("{}/{}.json", self.base_url, target.path());
        let mut request = self
            .client
            .get(url)
            .header("Accept", "text/event-stream");
        if let Some(query) = target.query() {
            request = request.query(&[
                ("orderBy", format!("\"{}\"", query.order_by)),
                ("startAt", query.start_at.to_string()),
            ]);
        }
        if let Some(token) = &self.auth_token {
            request = request.query(&[("auth", token.as_str())]);
        }
        request
    }
}

impl ChangeSource for RestSource {
    fn subscribe(&self, target: &FeedRef) -> Result<EventStream, SourceError> {
        if target.path().is_empty() {
            return Err(SourceError::InvalidLocation {
                path: target.path().to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let request = self.stream_request(target);
        tokio::spawn(stream_task(request, target.clone(), tx));
        Ok(rx)
    }
}

async fn stream_task(
    request: reqwest::RequestBuilder,
    target: FeedRef,
    tx: mpsc::UnboundedSender<ChildEvent>,
) {
    let mut state = StreamState::default();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if tx.is_closed() {
            return;
        }
        let Some(attempt) = request.try_clone() else {
            return;
        };

        match attempt.send().await {
            Ok(response) if response.status().is_success() => {
                backoff = INITIAL_BACKOFF;
                if read_stream(response, &target, &mut state, &tx).await == Flow::Detach {
                    return;
                }
            }
            Ok(response) => {
                tracing::warn!(
                    "[stream] {} rejected with status {}",
                    target,
                    response.status()
                );
            }
            Err(e) => {
                tracing::warn!("[stream] {} connect failed: {e}", target);
            }
        }

        if tx.is_closed() {
            return;
        }
        debug_event!("stream", "reconnecting", "{} in {:?}", target, backoff);
        sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    /// Stream ended or asked us to re-establish; reconnect.
    Reconnect,
    /// The subscriber is gone; stop for good.
    Detach,
}

#[derive(Default)]
struct StreamState {
    /// Everything the server has sent for this collection.
    children: BTreeMap<String, Value>,
    /// Keys currently visible through the window, with last-sent values.
    visible: BTreeMap<String, Value>,
}

async fn read_stream(
    mut response: reqwest::Response,
    target: &FeedRef,
    state: &mut StreamState,
    tx: &mpsc::UnboundedSender<ChildEvent>,
) -> Flow {
    let mut buffer = String::new();
    let mut event_name = String::new();
    let mut data = String::new();

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Flow::Reconnect,
            Err(e) => {
                tracing::warn!("[stream] {} read failed: {e}", target);
                return Flow::Reconnect;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            if let Some(rest) = line.strip_prefix("event:") {
                event_name = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            } else if line.is_empty() && !event_name.is_empty() {
                let flow = handle_frame(&event_name, &data, target, state, tx);
                event_name.clear();
                data.clear();
                if let Some(flow) = flow {
                    return flow;
                }
            }
        }
    }
}

fn handle_frame(
    event: &str,
    data: &str,
    target: &FeedRef,
    state: &mut StreamState,
    tx: &mpsc::UnboundedSender<ChildEvent>,
) -> Option<Flow> {
    match event {
        "put" | "patch" => {
            let frame: Value = match serde_json::from_str(data) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("[stream] {} bad frame: {e}", target);
                    return None;
                }
            };
            let path = frame.get("path").and_then(Value::as_str).unwrap_or("/");
            let payload = frame.get("data").cloned().unwrap_or(Value::Null);
            let delivered = apply_update(state, target, tx, path, payload, event == "patch");
            (!delivered).then_some(Flow::Detach)
        }
        "keep-alive" => None,
        "cancel" | "auth_revoked" => {
            tracing::warn!("[stream] {} server cancelled ({event})", target);
            Some(Flow::Reconnect)
        }
        other => {
            debug_event!("stream", "ignoring frame", "{other}");
            None
        }
    }
}

/// Apply one wire-level update and emit the child transitions it causes.
///
/// Returns false once the subscriber's channel is gone.
fn apply_update(
    state: &mut StreamState,
    target: &FeedRef,
    tx: &mpsc::UnboundedSender<ChildEvent>,
    path: &str,
    data: Value,
    patch: bool,
) -> bool {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        // Root update: replace (put) or merge (patch) whole children sets.
        [] => {
            let incoming = match data {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    tracing::warn!("[stream] {} non-collection root value: {other}", target);
                    Map::new()
                }
            };
            if !patch {
                let stale: Vec<String> = state
                    .children
                    .keys()
                    .filter(|k| !incoming.contains_key(*k))
                    .cloned()
                    .collect();
                for key in stale {
                    if !sync_child(state, target, tx, &key, None) {
                        return false;
                    }
                }
            }
            for (key, value) in incoming {
                let next = (!value.is_null()).then_some(value);
                if !sync_child(state, target, tx, &key, next) {
                    return false;
                }
            }
            true
        }
        // Child-level update.
        [key] => {
            let next = if patch {
                let mut merged = state.children.get(*key).cloned().unwrap_or(Value::Null);
                merge_value(&mut merged, data);
                (!merged.is_null()).then_some(merged)
            } else {
                (!data.is_null()).then_some(data)
            };
            sync_child(state, target, tx, key, next)
        }
        // Deep update inside one child's value.
        [key, rest @ ..] => {
            let mut child = state.children.get(*key).cloned().unwrap_or(Value::Null);
            write_at(&mut child, rest, data, patch);
            let next = (!child.is_null()).then_some(child);
            sync_child(state, target, tx, key, next)
        }
    }
}

/// Reconcile one child's new value against the window and emit the
/// resulting notification, if any.
fn sync_child(
    state: &mut StreamState,
    target: &FeedRef,
    tx: &mpsc::UnboundedSender<ChildEvent>,
    key: &str,
    next: Option<Value>,
) -> bool {
    match &next {
        Some(value) => state.children.insert(key.to_string(), value.clone()),
        None => state.children.remove(key),
    };

    let previous = state.visible.get(key).cloned();
    let incoming = next.filter(|v| target.matches(v));

    let event = match (previous, incoming) {
        (None, Some(value)) => {
            state.visible.insert(key.to_string(), value.clone());
            ChildEvent::added(key, value)
        }
        (Some(last), Some(value)) => {
            if last == value {
                return true;
            }
            state.visible.insert(key.to_string(), value.clone());
            ChildEvent::changed(key, value)
        }
        (Some(last), None) => {
            state.visible.remove(key);
            ChildEvent::removed(key, last)
        }
        (None, None) => return true,
    };
    tx.send(event).is_ok()
}

/// Replace (or, for patches, merge) the node at `segments` inside a
/// child's value, creating intermediate objects as needed.
fn write_at(value: &mut Value, segments: &[&str], data: Value, patch: bool) {
    let mut current = value;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .expect("just shaped into an object")
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    if patch {
        merge_value(current, data);
    } else {
        *current = data;
    }
}

/// Key-wise merge of object fields; nulls delete, scalars replace.
fn merge_value(target: &mut Value, incoming: Value) {
    match incoming {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let map = target.as_object_mut().expect("just shaped into an object");
            for (key, value) in fields {
                if value.is_null() {
                    map.remove(&key);
                } else {
                    merge_value(map.entry(key).or_insert(Value::Null), value);
                }
            }
        }
        other => *target = other,
    }
}
