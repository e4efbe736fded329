//! Path specifications: what to watch and how it maps to documents.
//!
//! A [`PathSpec`] describes one change feed. The trait carries default
//! behavior for every optional capability (pass-all filter,
//! field-projection parser, identity resolver, identity narrowing), so a
//! spec only overrides what it needs. Declarative, projection-only feeds
//! are covered by [`StaticPathSpec`], deserialized straight from
//! configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feed::FeedRef;

use super::error::PipelineError;

/// Description of one monitored feed.
pub trait PathSpec: Send + Sync {
    /// Unique identifier among configured feeds.
    fn name(&self) -> &str;

    /// Address of the monitored collection, parent-relative or absolute.
    fn source_location(&self) -> &str;

    /// Target search index.
    fn index(&self) -> &str;

    /// Target document type within the index.
    fn doc_type(&self) -> &str;

    /// Fields to keep when the default parser projects a record.
    fn fields(&self) -> &[String] {
        &[]
    }

    /// Fields to drop after projection.
    fn omit(&self) -> &[String] {
        &[]
    }

    /// Records failing the filter are never indexed, and their removal
    /// triggers no delete.
    fn filter(&self, _record: &Value) -> bool {
        true
    }

    /// Target document id for a record. Defaults to the native key; a
    /// correlation-key override lets disjoint feeds merge into one
    /// document.
    fn resolve(&self, _record: &Value, native_key: &str) -> String {
        native_key.to_string()
    }

    /// Document fragment for a record. The default projects through
    /// [`Self::fields`] and [`Self::omit`]; non-object records pass
    /// through unmodified. `scope` carries the parent key when the feed
    /// was activated under a nested monitor.
    fn parse(&self, record: &Value, _native_key: &str, _scope: Option<&str>) -> Value {
        project(record, self.fields(), self.omit())
    }

    /// Narrow the subscription handle before subscribing, e.g. to a
    /// time-window cutoff.
    fn narrow(&self, target: FeedRef) -> FeedRef {
        target
    }
}

/// Fail-fast activation check: location, index and type must be present.
pub(crate) fn validate(spec: &dyn PathSpec) -> Result<(), PipelineError> {
    for (field, value) in [
        ("path", spec.source_location()),
        ("index", spec.index()),
        ("type", spec.doc_type()),
    ] {
        if value.trim().is_empty() {
            return Err(PipelineError::MissingField {
                name: spec.name().to_string(),
                field,
            });
        }
    }
    Ok(())
}

/// The default field projection: restrict to `fields` when non-empty,
/// then subtract `omit`. Non-object records pass through unmodified.
pub fn project(record: &Value, fields: &[String], omit: &[String]) -> Value {
    let Value::Object(map) = record else {
        return record.clone();
    };
    let mut out = if fields.is_empty() {
        map.clone()
    } else {
        fields
            .iter()
            .filter_map(|field| map.get(field).map(|v| (field.clone(), v.clone())))
            .collect()
    };
    for field in omit {
        out.remove(field);
    }
    Value::Object(out)
}

/// A declarative, projection-only path spec.
///
/// Covers feeds whose shaping needs no custom behavior; loaded from the
/// `[[monitor.static_paths]]` configuration tables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticPathSpec {
    pub name: String,
    pub path: String,
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub omit: Vec<String>,
}

impl PathSpec for StaticPathSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_location(&self) -> &str {
        &self.path
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn omit(&self) -> &[String] {
        &self.omit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(fields: &[&str], omit: &[&str]) -> StaticPathSpec {
        StaticPathSpec {
            name: "users".to_string(),
            path: "users/profiles".to_string(),
            index: "app".to_string(),
            doc_type: "user".to_string(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            omit: omit.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_parse_keeps_whole_record() {
        let record = json!({ "a": 1, "b": 2 });
        assert_eq!(spec(&[], &[]).parse(&record, "k", None), record);
    }

    #[test]
    fn test_fields_restrict_then_omit_subtracts() {
        let record = json!({ "a": 1, "b": 2, "c": 3 });
        let projected = spec(&["a", "b"], &["b"]).parse(&record, "k", None);
        assert_eq!(projected, json!({ "a": 1 }));
    }

    #[test]
    fn test_omit_alone_subtracts_from_full_record() {
        let record = json!({ "a": 1, "secret": 2 });
        let projected = spec(&[], &["secret"]).parse(&record, "k", None);
        assert_eq!(projected, json!({ "a": 1 }));
    }

    #[test]
    fn test_non_object_record_passes_through() {
        let record = json!("scalar");
        assert_eq!(spec(&["a"], &[]).parse(&record, "k", None), record);
    }

    #[test]
    fn test_default_resolve_is_native_key() {
        assert_eq!(spec(&[], &[]).resolve(&json!({}), "k9"), "k9");
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        let mut bad = spec(&[], &[]);
        bad.index = String::new();
        let err = validate(&bad).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingField { field: "index", .. }
        ));
    }

    #[test]
    fn test_validation_accepts_complete_spec() {
        assert!(validate(&spec(&[], &[])).is_ok());
    }
}
