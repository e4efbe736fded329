//! Built-in path specs for the task-queue feeds.
//!
//! Three feeds cooperate to build one composite log document per task:
//! the response feed contributes under the task's own key, while the
//! request and error feeds resolve to the task id carried in their
//! records, so their fragments merge into the same document.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::feed::FeedRef;
use crate::normalize::{is_truthy, request_data, response_data};

use super::spec::PathSpec;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Start-at cutoff for a retention window of `days`; `0` disables
/// narrowing and mirrors the feeds' full history.
pub fn retention_cutoff(days: u64) -> Option<f64> {
    (days > 0).then(|| (Utc::now().timestamp_millis() - days as i64 * MILLIS_PER_DAY) as f64)
}

/// All built-in specs targeting `index`/`doc_type`, each narrowed to the
/// given retention cutoff.
pub fn builtin_specs(index: &str, doc_type: &str, cutoff: Option<f64>) -> Vec<Arc<dyn PathSpec>> {
    vec![
        Arc::new(ResponseLogSpec::new(index, doc_type, cutoff)),
        Arc::new(RequestLogSpec::new(index, doc_type, cutoff)),
        Arc::new(ErrorLogSpec::new(index, doc_type, cutoff)),
    ]
}

fn windowed(target: FeedRef, cutoff: Option<f64>) -> FeedRef {
    match cutoff {
        Some(start) => target.order_by_child("time").start_at(start),
        None => target,
    }
}

/// Correlation key carried inside a record; falls back to the native key
/// when the record does not name one.
fn correlation_id(value: Option<&Value>, native_key: &str) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => native_key.to_string(),
    }
}

fn copy_field(target: &mut Map<String, Value>, record: &Value, field: &str) {
    if let Some(value) = record.get(field) {
        target.insert(field.to_string(), value.clone());
    }
}

/// Task responses, indexed under the task's own key.
pub struct ResponseLogSpec {
    index: String,
    doc_type: String,
    cutoff: Option<f64>,
}

impl ResponseLogSpec {
    pub fn new(index: &str, doc_type: &str, cutoff: Option<f64>) -> Self {
        Self {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            cutoff,
        }
    }
}

impl PathSpec for ResponseLogSpec {
    fn name(&self) -> &str {
        "response"
    }

    fn source_location(&self) -> &str {
        "queue/responses"
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn parse(&self, record: &Value, _native_key: &str, _scope: Option<&str>) -> Value {
        let mut response = Map::new();
        if let Some(data) = record.get("data") {
            response.insert("data".to_string(), response_data(data.clone()));
        }
        copy_field(&mut response, record, "status");
        copy_field(&mut response, record, "time");

        let mut out = Map::new();
        out.insert("response".to_string(), Value::Object(response));
        Value::Object(out)
    }

    fn narrow(&self, target: FeedRef) -> FeedRef {
        windowed(target, self.cutoff)
    }
}

/// Task requests, merged into the response document via the `response`
/// correlation key.
pub struct RequestLogSpec {
    index: String,
    doc_type: String,
    cutoff: Option<f64>,
}

impl RequestLogSpec {
    pub fn new(index: &str, doc_type: &str, cutoff: Option<f64>) -> Self {
        Self {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            cutoff,
        }
    }
}

impl PathSpec for RequestLogSpec {
    fn name(&self) -> &str {
        "request"
    }

    fn source_location(&self) -> &str {
        "logs/queue/requests"
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn resolve(&self, record: &Value, native_key: &str) -> String {
        correlation_id(record.get("response"), native_key)
    }

    fn parse(&self, record: &Value, native_key: &str, _scope: Option<&str>) -> Value {
        let mut request = Map::new();
        request.insert("_id".to_string(), Value::String(native_key.to_string()));
        copy_field(&mut request, record, "action");
        if let Some(data) = record.get("data") {
            request.insert("data".to_string(), request_data(data.clone()));
        }
        copy_field(&mut request, record, "time");

        let mut out = Map::new();
        out.insert("request".to_string(), Value::Object(request));
        copy_field(&mut out, record, "user");
        copy_field(&mut out, record, "venue");
        Value::Object(out)
    }

    fn narrow(&self, target: FeedRef) -> FeedRef {
        windowed(target, self.cutoff)
    }
}

/// Task errors, merged into the response document via the failed task's
/// `response` key. Records without a task payload are skipped entirely.
pub struct ErrorLogSpec {
    index: String,
    doc_type: String,
    cutoff: Option<f64>,
}

impl ErrorLogSpec {
    pub fn new(index: &str, doc_type: &str, cutoff: Option<f64>) -> Self {
        Self {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            cutoff,
        }
    }
}

impl PathSpec for ErrorLogSpec {
    fn name(&self) -> &str {
        "error"
    }

    fn source_location(&self) -> &str {
        "logs/queue/errors"
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn filter(&self, record: &Value) -> bool {
        record.get("task").is_some_and(is_truthy)
    }

    fn resolve(&self, record: &Value, native_key: &str) -> String {
        correlation_id(
            record.get("task").and_then(|task| task.get("response")),
            native_key,
        )
    }

    fn parse(&self, record: &Value, native_key: &str, _scope: Option<&str>) -> Value {
        let mut error = Map::new();
        error.insert("_id".to_string(), Value::String(native_key.to_string()));
        if let Some(log) = record.get("task").and_then(|task| task.get("_log")) {
            error.insert("_log".to_string(), log.clone());
        }
        copy_field(&mut error, record, "error");
        copy_field(&mut error, record, "state");
        copy_field(&mut error, record, "time");

        let mut out = Map::new();
        out.insert("error".to_string(), Value::Object(error));
        Value::Object(out)
    }

    fn narrow(&self, target: FeedRef) -> FeedRef {
        windowed(target, self.cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_fragment_shape() {
        let spec = ResponseLogSpec::new("activity", "logs", None);
        let record = json!({ "status": "ok", "time": 123, "data": { "x": 1 } });
        assert_eq!(
            spec.parse(&record, "k1", None),
            json!({ "response": { "data": { "x": 1 }, "status": "ok", "time": 123 } })
        );
    }

    #[test]
    fn test_response_missing_fields_are_omitted() {
        let spec = ResponseLogSpec::new("activity", "logs", None);
        assert_eq!(
            spec.parse(&json!({ "status": "ok" }), "k1", None),
            json!({ "response": { "status": "ok" } })
        );
    }

    #[test]
    fn test_request_resolves_to_correlation_key() {
        let spec = RequestLogSpec::new("activity", "logs", None);
        let record = json!({ "response": "task-9", "action": "create" });
        assert_eq!(spec.resolve(&record, "req-1"), "task-9");
        // Without a correlation key, fall back to the native key.
        assert_eq!(spec.resolve(&json!({}), "req-1"), "req-1");
    }

    #[test]
    fn test_request_fragment_shape() {
        let spec = RequestLogSpec::new("activity", "logs", None);
        let record = json!({
            "action": "create",
            "data": { "venue": "v1" },
            "time": 7,
            "user": "u1",
            "venue": "v1"
        });
        assert_eq!(
            spec.parse(&record, "req-1", None),
            json!({
                "request": {
                    "_id": "req-1",
                    "action": "create",
                    "data": { "venue": { "_id": "v1" } },
                    "time": 7
                },
                "user": "u1",
                "venue": "v1"
            })
        );
    }

    #[test]
    fn test_error_filter_requires_task() {
        let spec = ErrorLogSpec::new("activity", "logs", None);
        assert!(spec.filter(&json!({ "task": { "response": "t1" } })));
        assert!(!spec.filter(&json!({ "error": "boom" })));
        assert!(!spec.filter(&json!({ "task": null })));
    }

    #[test]
    fn test_error_fragment_shape() {
        let spec = ErrorLogSpec::new("activity", "logs", None);
        let record = json!({
            "task": { "response": "t1", "_log": ["step"] },
            "error": "boom",
            "state": "failed",
            "time": 9
        });
        assert_eq!(spec.resolve(&record, "e1"), "t1");
        assert_eq!(
            spec.parse(&record, "e1", None),
            json!({
                "error": {
                    "_id": "e1",
                    "_log": ["step"],
                    "error": "boom",
                    "state": "failed",
                    "time": 9
                }
            })
        );
    }

    #[test]
    fn test_retention_narrowing() {
        let spec = ResponseLogSpec::new("activity", "logs", Some(100.0));
        let target = spec.narrow(FeedRef::new("queue/responses"));
        let query = target.query().expect("narrowed");
        assert_eq!(query.order_by, "time");
        assert_eq!(query.start_at, 100.0);

        let unwindowed = ResponseLogSpec::new("activity", "logs", None);
        assert!(
            unwindowed
                .narrow(FeedRef::new("queue/responses"))
                .query()
                .is_none()
        );
    }

    #[test]
    fn test_retention_cutoff_zero_disables() {
        assert!(retention_cutoff(0).is_none());
        assert!(retention_cutoff(30).is_some());
    }
}
