//! End-to-end pipeline behavior over the in-memory source and sink.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use searchlight::feed::MemoryStore;
use searchlight::pipeline::paths::{RequestLogSpec, ResponseLogSpec, retention_cutoff};
use searchlight::pipeline::{ChildPathMonitor, PathSpec, PipelineError, StaticPathSpec};
use searchlight::sink::{MemorySink, Mutation};

/// Give the event tasks and their spawned mutations a chance to run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn static_spec(name: &str, path: &str) -> StaticPathSpec {
    StaticPathSpec {
        name: name.to_string(),
        path: path.to_string(),
        index: "activity".to_string(),
        doc_type: "logs".to_string(),
        fields: Vec::new(),
        omit: Vec::new(),
    }
}

/// A feed with a filter and a content-derived document id.
struct TaskSpec;

impl PathSpec for TaskSpec {
    fn name(&self) -> &str {
        "tasks"
    }

    fn source_location(&self) -> &str {
        "queue/tasks"
    }

    fn index(&self) -> &str {
        "activity"
    }

    fn doc_type(&self) -> &str {
        "logs"
    }

    fn filter(&self, record: &Value) -> bool {
        record.get("internal").is_none()
    }

    fn resolve(&self, record: &Value, native_key: &str) -> String {
        record
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or(native_key)
            .to_string()
    }
}

#[tokio::test]
async fn test_filtered_records_never_touch_the_index() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let _monitor =
        ChildPathMonitor::start(Arc::new(TaskSpec), store.as_ref(), sink.clone()).unwrap();

    store.put("queue/tasks", "t1", json!({ "internal": true, "n": 1 }));
    store.put("queue/tasks", "t1", json!({ "internal": true, "n": 2 }));
    store.remove("queue/tasks", "t1");
    settle().await;

    assert_eq!(sink.mutation_count(), 0);
}

#[tokio::test]
async fn test_default_resolver_uses_native_key() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let spec = Arc::new(static_spec("users", "users/profiles"));
    let _monitor = ChildPathMonitor::start(spec, store.as_ref(), sink.clone()).unwrap();

    store.put("users/profiles", "u1", json!({ "name": "Ada" }));
    settle().await;

    assert_eq!(
        sink.history(),
        vec![Mutation::Upsert {
            index: "activity".to_string(),
            doc_type: "logs".to_string(),
            id: "u1".to_string(),
            fragment: json!({ "name": "Ada" }),
        }]
    );
}

#[tokio::test]
async fn test_custom_resolver_routes_to_content_key() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let _monitor =
        ChildPathMonitor::start(Arc::new(TaskSpec), store.as_ref(), sink.clone()).unwrap();

    store.put("queue/tasks", "native-1", json!({ "task": "t42", "n": 1 }));
    settle().await;

    assert!(sink.document("activity", "logs", "t42").is_some());
    assert!(sink.document("activity", "logs", "native-1").is_none());
}

#[tokio::test]
async fn test_identical_adds_are_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let spec = Arc::new(static_spec("users", "users/profiles"));
    let _monitor = ChildPathMonitor::start(spec, store.as_ref(), sink.clone()).unwrap();

    let record = json!({ "name": "Ada", "tags": ["a"] });
    store.put("users/profiles", "u1", record.clone());
    settle().await;
    let after_first = sink.document("activity", "logs", "u1");

    store.put("users/profiles", "u1", record);
    settle().await;

    assert_eq!(sink.document("activity", "logs", "u1"), after_first);
}

#[tokio::test]
async fn test_response_feed_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let spec = Arc::new(ResponseLogSpec::new("activity", "logs", None));
    let _monitor = ChildPathMonitor::start(spec, store.as_ref(), sink.clone()).unwrap();

    store.put(
        "queue/responses",
        "k1",
        json!({ "status": "ok", "time": 123, "data": { "x": 1 } }),
    );
    settle().await;

    assert_eq!(
        sink.history(),
        vec![Mutation::Upsert {
            index: "activity".to_string(),
            doc_type: "logs".to_string(),
            id: "k1".to_string(),
            fragment: json!({
                "response": { "data": { "x": 1 }, "status": "ok", "time": 123 }
            }),
        }]
    );
}

#[tokio::test]
async fn test_disjoint_streams_merge_into_one_document() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let _responses = ChildPathMonitor::start(
        Arc::new(ResponseLogSpec::new("activity", "logs", None)),
        store.as_ref(),
        sink.clone(),
    )
    .unwrap();
    let _requests = ChildPathMonitor::start(
        Arc::new(RequestLogSpec::new("activity", "logs", None)),
        store.as_ref(),
        sink.clone(),
    )
    .unwrap();

    store.put("queue/responses", "t1", json!({ "status": "ok", "time": 5 }));
    store.put(
        "logs/queue/requests",
        "r1",
        json!({ "response": "t1", "action": "create", "time": 4 }),
    );
    settle().await;

    let doc = sink.document("activity", "logs", "t1").unwrap();
    assert_eq!(doc["response"]["status"], json!("ok"));
    assert_eq!(doc["request"]["_id"], json!("r1"));
    assert_eq!(doc["request"]["action"], json!("create"));
}

#[tokio::test]
async fn test_delete_removes_the_whole_composite_document() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let _responses = ChildPathMonitor::start(
        Arc::new(ResponseLogSpec::new("activity", "logs", None)),
        store.as_ref(),
        sink.clone(),
    )
    .unwrap();
    let _requests = ChildPathMonitor::start(
        Arc::new(RequestLogSpec::new("activity", "logs", None)),
        store.as_ref(),
        sink.clone(),
    )
    .unwrap();

    store.put("queue/responses", "t1", json!({ "status": "ok", "time": 5 }));
    store.put("logs/queue/requests", "r1", json!({ "response": "t1", "time": 4 }));
    settle().await;
    assert!(sink.document("activity", "logs", "t1").is_some());

    // One stream's removal takes the other stream's fragment with it.
    store.remove("queue/responses", "t1");
    settle().await;
    assert!(sink.document("activity", "logs", "t1").is_none());
}

#[tokio::test]
async fn test_qualifying_removal_issues_delete() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let _monitor =
        ChildPathMonitor::start(Arc::new(TaskSpec), store.as_ref(), sink.clone()).unwrap();

    store.put("queue/tasks", "n1", json!({ "task": "t1" }));
    store.remove("queue/tasks", "n1");
    settle().await;

    let history = sink.history();
    assert_eq!(history.len(), 2);
    assert!(matches!(&history[1], Mutation::Delete { id, .. } if id == "t1"));
}

#[tokio::test]
async fn test_stop_detaches_before_new_notifications() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let spec = Arc::new(static_spec("users", "users/profiles"));
    let monitor = ChildPathMonitor::start(spec, store.as_ref(), sink.clone()).unwrap();

    store.put("users/profiles", "u1", json!({ "n": 1 }));
    settle().await;
    monitor.stop().await;

    store.put("users/profiles", "u2", json!({ "n": 2 }));
    settle().await;

    assert_eq!(sink.mutation_count(), 1);
}

#[tokio::test]
async fn test_activation_fails_fast_on_incomplete_spec() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let mut spec = static_spec("broken", "somewhere");
    spec.index = String::new();

    let err = ChildPathMonitor::start(Arc::new(spec), store.as_ref(), sink.clone()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingField { field: "index", .. }
    ));
    assert_eq!(sink.mutation_count(), 0);
}

#[tokio::test]
async fn test_retention_window_skips_history() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());

    // Two historical records, one inside the window.
    let now = chrono::Utc::now().timestamp_millis();
    store.put("queue/responses", "old", json!({ "status": "ok", "time": 1 }));
    store.put("queue/responses", "new", json!({ "status": "ok", "time": now }));

    let cutoff = retention_cutoff(30);
    let spec = Arc::new(ResponseLogSpec::new("activity", "logs", cutoff));
    let _monitor = ChildPathMonitor::start(spec, store.as_ref(), sink.clone()).unwrap();
    settle().await;

    assert!(sink.document("activity", "logs", "new").is_some());
    assert!(sink.document("activity", "logs", "old").is_none());
}
