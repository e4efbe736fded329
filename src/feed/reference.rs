//! Subscription handles: a collection path plus an optional window.
//!
//! A [`FeedRef`] addresses one watched collection. Path specs may narrow
//! the handle before subscribing, typically to an ordered start-at cutoff
//! so that only recent children are mirrored.

use std::fmt;

use serde_json::Value;

/// Address of a watched collection, with an optional query window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRef {
    path: String,
    query: Option<FeedQuery>,
}

/// An ordered start-at window over a collection's children.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    /// Child field the window orders by.
    pub order_by: String,
    /// Children whose ordered field is below this value are excluded.
    pub start_at: f64,
}

impl FeedRef {
    /// Create a handle for a `/`-separated collection path.
    ///
    /// Leading and trailing slashes are stripped so that relative and
    /// absolute spellings address the same collection.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: path.as_ref().trim_matches('/').to_string(),
            query: None,
        }
    }

    /// A handle for a child collection below this one.
    pub fn child(&self, segment: &str) -> FeedRef {
        let segment = segment.trim_matches('/');
        if self.path.is_empty() {
            FeedRef::new(segment)
        } else {
            FeedRef::new(format!("{}/{}", self.path, segment))
        }
    }

    /// Order the window by a child field. Combine with [`Self::start_at`].
    pub fn order_by_child(mut self, field: impl Into<String>) -> Self {
        let start_at = self.query.take().map(|q| q.start_at).unwrap_or(f64::MIN);
        self.query = Some(FeedQuery {
            order_by: field.into(),
            start_at,
        });
        self
    }

    /// Exclude children whose ordered field is below `value`.
    ///
    /// Without a preceding [`Self::order_by_child`], children are ordered
    /// by their native key and the cutoff has no effect.
    pub fn start_at(mut self, value: f64) -> Self {
        if let Some(query) = self.query.as_mut() {
            query.start_at = value;
        }
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&FeedQuery> {
        self.query.as_ref()
    }

    /// Whether a child value falls inside this handle's window.
    ///
    /// Children missing the ordered field sort before every numeric
    /// cutoff and are excluded.
    pub fn matches(&self, value: &Value) -> bool {
        match &self.query {
            None => true,
            Some(query) => value
                .get(&query.order_by)
                .and_then(Value::as_f64)
                .is_some_and(|v| v >= query.start_at),
        }
    }
}

impl fmt::Display for FeedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?orderBy={}&startAt={}", query.order_by, query.start_at)?;
        }
        Ok(())
    }
}
