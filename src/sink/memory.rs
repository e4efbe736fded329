//! In-memory sink with backend-equivalent merge semantics.
//!
//! Used by the integration tests and local dry runs. Documents live in a
//! process-local map; upserts merge object fields recursively the way the
//! real backend does, and every mutation is recorded so tests can assert
//! on exactly what the pipeline issued.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::IndexSink;
use super::SinkError;

/// One mutation issued against the sink, as observed by tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert {
        index: String,
        doc_type: String,
        id: String,
        fragment: Value,
    },
    Delete {
        index: String,
        doc_type: String,
        id: String,
    },
}

type DocKey = (String, String, String);

/// An in-process document store with upsert-merge semantics.
#[derive(Default)]
pub struct MemorySink {
    docs: Mutex<HashMap<DocKey, Value>>,
    history: Mutex<Vec<Mutation>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored document, if present.
    pub fn document(&self, index: &str, doc_type: &str, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .get(&(index.to_string(), doc_type.to_string(), id.to_string()))
            .cloned()
    }

    /// Every mutation issued so far, in issue order.
    pub fn history(&self) -> Vec<Mutation> {
        self.history.lock().clone()
    }

    /// Number of mutations issued so far.
    pub fn mutation_count(&self) -> usize {
        self.history.lock().len()
    }
}

#[async_trait]
impl IndexSink for MemorySink {
    async fn upsert(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        fragment: Value,
    ) -> Result<(), SinkError> {
        self.history.lock().push(Mutation::Upsert {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            id: id.to_string(),
            fragment: fragment.clone(),
        });
        let mut docs = self.docs.lock();
        let doc = docs
            .entry((index.to_string(), doc_type.to_string(), id.to_string()))
            .or_insert(Value::Null);
        merge(doc, fragment);
        Ok(())
    }

    async fn delete(&self, index: &str, doc_type: &str, id: &str) -> Result<(), SinkError> {
        self.history.lock().push(Mutation::Delete {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            id: id.to_string(),
        });
        let removed = self
            .docs
            .lock()
            .remove(&(index.to_string(), doc_type.to_string(), id.to_string()));
        match removed {
            Some(_) => Ok(()),
            None => Err(SinkError::NotFound {
                name: format!("{index}/{doc_type}/{id}"),
            }),
        }
    }
}

/// Recursive object merge: object fields merge key-wise, everything else
/// (arrays included) replaces the stored value.
fn merge(target: &mut Value, fragment: Value) {
    match fragment {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let map = target.as_object_mut().expect("just shaped into an object");
            for (key, value) in fields {
                merge(map.entry(key).or_insert(Value::Null), value);
            }
        }
        other => *target = other,
    }
}
