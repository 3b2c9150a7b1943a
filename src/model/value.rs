//! Semi-structured entity snapshots and dot-path access.
//!
//! Snapshots are plain `serde_json::Value` trees (null, bool, number,
//! string, list, map). Field access goes through [`resolve`], which walks a
//! dot-separated path and reports a missing segment as `None` ("undefined"),
//! distinct from an explicit JSON `null`.

use std::fmt::Write as _;

pub use serde_json::Value;

/// Resolve a dot-separated path (`"sla.status"`, `"lines.0.qty"`) inside a value.
///
/// Returns `None` when any segment is missing or traverses a scalar. An empty
/// path resolves to the value itself.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve a path inside an optional snapshot. An absent snapshot is undefined everywhere.
pub fn resolve_in<'a>(snapshot: Option<&'a Value>, path: &str) -> Option<&'a Value> {
    snapshot.and_then(|value| resolve(value, path))
}

/// Numeric view of a value. Numeric strings are accepted.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Structural equality that treats `1` and `1.0` as the same number, at any depth.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Human-readable rendering: strings without quotes, `undefined` for missing.
pub fn display(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// First string field among `keys`, skipping empty strings.
pub fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| resolve(value, key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Canonical JSON text with map keys sorted at every level.
///
/// Two structurally equal values always produce the same text, regardless
/// of the key order they were built with.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
