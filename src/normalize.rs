//! Payload canonicalization for index-safe document shapes.
//!
//! Records arriving from the upstream store are loosely shaped: the same
//! field may hold a scalar in one record, a mapping in the next, and an
//! array in a third. The search backend rejects documents whose field
//! types flip between writes, so every ruled field path is rewritten into
//! one canonical shape before indexing.
//!
//! Rules are keyed by dotted field path (`"event.flyer"`) and applied in
//! table order. A ruled value that is present and truthy is rewritten in
//! place; a present-but-empty string becomes `null` (explicit-empty is
//! distinguished from absent); an absent value leaves the rule skipped.

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Ordered rule table: dotted field path to canonical shape.
pub type RuleTable = IndexMap<&'static str, Canon>;

/// Canonical shapes a ruled field can be rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canon {
    /// Non-object scalars are wrapped as `{"_id": value}`; objects and
    /// arrays pass through.
    Object,
    /// Arrays pass through; a mapping becomes an ordered sequence of
    /// `{"_id": key, "_value": stringified(value)}` pairs.
    KeyValueArray,
    /// Arrays pass through; a mapping becomes the sequence of its keys.
    ValuesArray,
    /// A mapping from area name to its tables (array or mapping) is
    /// flattened into `{"area": .., "table": ..}` pairs.
    ReservationTables,
    /// Parseable, non-zero numerics become their stringified value;
    /// everything else becomes `null`.
    Numeric,
    /// Parseable dates become an ISO-8601 UTC string with millisecond
    /// precision; everything else becomes `null` (never an error).
    Date,
}

impl Canon {
    /// Apply this rule to a value, producing the canonical form.
    pub fn apply(self, value: &Value) -> Value {
        match self {
            Canon::Object => enforce_object(value),
            Canon::KeyValueArray => enforce_key_value_array(value),
            Canon::ValuesArray => enforce_values_array(value),
            Canon::ReservationTables => enforce_reservation_tables(value),
            Canon::Numeric => enforce_numeric(value),
            Canon::Date => enforce_date(value),
        }
    }
}

/// Rewrite every ruled field path of `data` in place.
///
/// Present and truthy: apply the rule. Present but the empty string:
/// write `null`. Absent (or falsy without being the empty string):
/// leave untouched.
pub fn apply_rules(data: &mut Value, rules: &RuleTable) {
    for (path, rule) in rules {
        let replacement = match get_path(data, path) {
            None => continue,
            Some(value) if is_truthy(value) => rule.apply(value),
            Some(Value::String(s)) if s.is_empty() => Value::Null,
            Some(_) => continue,
        };
        set_path(data, path, replacement);
    }
}

/// Canonicalize a request payload with the built-in rule table.
///
/// A bare non-null scalar is wrapped as `{"_value": scalar}` so it can be
/// stored in an object-typed field.
pub fn request_data(data: Value) -> Value {
    match data {
        Value::Object(_) | Value::Array(_) => {
            let mut data = data;
            apply_rules(&mut data, &REQUEST_RULES);
            data
        }
        Value::Null => Value::Null,
        scalar => json!({ "_value": scalar }),
    }
}

/// Canonicalize a response payload at the shape level.
///
/// A non-array mapping whose values are all objects (the only values that
/// can carry an `_id` tag) becomes the ordered sequence of those values,
/// each tagged with `"_id"` set to its original key. Anything else passes
/// through, except bare scalars, which wrap as `{"_value": scalar}`.
pub fn response_data(data: Value) -> Value {
    match data {
        Value::Object(map) => {
            if map.values().all(|v| matches!(v, Value::Object(_))) {
                let tagged = map
                    .into_iter()
                    .map(|(key, value)| match value {
                        Value::Object(mut obj) => {
                            obj.insert("_id".to_string(), Value::String(key));
                            Value::Object(obj)
                        }
                        other => other,
                    })
                    .collect();
                Value::Array(tagged)
            } else {
                Value::Object(map)
            }
        }
        Value::Array(items) => Value::Array(items),
        Value::Null => Value::Null,
        scalar => json!({ "_value": scalar }),
    }
}

/// Built-in rule table for request payloads.
///
/// Table order matters: container rules run before the rules for their
/// nested paths (`guest` is shaped into an object before `guest.birthday`
/// is canonicalized).
pub static REQUEST_RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    IndexMap::from([
        ("venue", Canon::Object),
        ("user", Canon::Object),
        ("guest", Canon::Object),
        ("guest.birthday", Canon::Date),
        ("event", Canon::Object),
        ("event.flyer", Canon::Object),
        ("event.promoters", Canon::ValuesArray),
        ("ticket", Canon::Object),
        ("ticket.questions", Canon::KeyValueArray),
        ("area", Canon::Object),
        ("party", Canon::Object),
        ("party.guest", Canon::Object),
        ("party.guest.birthday", Canon::Date),
        ("party.questions", Canon::KeyValueArray),
        ("reservation.servers", Canon::ValuesArray),
        ("reservation.tables", Canon::ReservationTables),
        ("reservation.spends", Canon::Object),
        ("reservation.guest", Canon::Object),
        ("reservation.guest.birthday", Canon::Date),
        ("promotion", Canon::Object),
        ("promotion.days", Canon::ValuesArray),
        ("promo", Canon::Object),
        ("promo.tickets", Canon::ValuesArray),
        ("referrer", Canon::Object),
        ("date", Canon::Date),
        ("priority", Canon::Numeric),
        ("payment.reservation.gratuity", Canon::Numeric),
        ("payment.reservation.tax", Canon::Numeric),
    ])
});

fn enforce_object(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => value.clone(),
        scalar => json!({ "_id": scalar }),
    }
}

fn enforce_key_value_array(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        Value::Object(map) => Value::Array(
            map.iter()
                .map(|(key, val)| json!({ "_id": key, "_value": stringify(val) }))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn enforce_values_array(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        Value::Object(map) => {
            Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())
        }
        other => other.clone(),
    }
}

fn enforce_reservation_tables(value: &Value) -> Value {
    match value {
        Value::Object(areas) => {
            let mut flat = Vec::new();
            for (area, tables) in areas {
                let tables = match enforce_values_array(tables) {
                    Value::Array(items) => items,
                    single => vec![single],
                };
                for table in tables {
                    flat.push(json!({ "area": area, "table": table }));
                }
            }
            Value::Array(flat)
        }
        other => other.clone(),
    }
}

fn enforce_numeric(value: &Value) -> Value {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_prefix(s),
        _ => None,
    };
    match parsed {
        Some(n) if n != 0.0 && n.is_finite() => Value::String(format!("{n}")),
        _ => Value::Null,
    }
}

fn enforce_date(value: &Value) -> Value {
    match parse_date(value) {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => {
            tracing::warn!("cannot parse {value} as date");
            Value::Null
        }
    }
}

/// Loose truthiness, matching the upstream store's own notion: `false`,
/// `0`, `""`, and `null` are falsy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Display form of a scalar; falsy values stringify to the empty string.
fn stringify(value: &Value) -> String {
    if !is_truthy(value) {
        return String::new();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(_) => "true".to_string(),
        compound => compound.to_string(),
    }
}

/// Parse a leading floating-point prefix: `"42.5km"` parses as `42.5`,
/// `"abc"` does not parse.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    // A prefix with no digits at all ("-", ".", "abc") is not a number.
    if !s[int_start..end].bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    // Optional exponent, only kept if complete.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let digits_start = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > digits_start {
            end = exp;
        }
    }

    s[..end].parse().ok()
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_f64()?;
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
            }
            None
        }
        _ => None,
    }
}

/// Look up a dotted field path. Only object segments are traversed.
fn get_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `replacement` at a dotted field path, creating intermediate
/// objects as needed. A non-object intermediate stops the write.
fn set_path(data: &mut Value, path: &str, replacement: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = data;
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), replacement);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
