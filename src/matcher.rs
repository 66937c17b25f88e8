//! Structural request matching.
//!
//! Decides whether a pattern is a partial match of a request. Mappings are
//! matched as subsets, sequences and scalars must be equal.

use serde_json::{Map, Number, Value};

/// Check whether `request` satisfies `pattern`.
///
/// A mapping pattern constrains only the keys it lists: each of them must be
/// present in the request, nested mappings recurse, everything else must be
/// deeply equal. Sequences are never matched partially, so `[1, 2]` only
/// matches `[1, 2]`. An empty mapping matches any request.
pub fn matches(request: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Object(fields) if fields.is_empty() => true,
        Value::Object(fields) => match request {
            Value::Object(request_fields) => matches_fields(request_fields, fields),
            _ => false,
        },
        _ => values_equal(request, pattern),
    }
}

fn matches_fields(request: &Map<String, Value>, pattern: &Map<String, Value>) -> bool {
    pattern.iter().all(|(key, expected)| {
        let Some(actual) = request.get(key) else {
            return false;
        };
        match expected {
            // Nested mappings keep subset semantics, but the request side
            // must be a mapping too, even for an empty nested pattern.
            Value::Object(nested) => match actual {
                Value::Object(actual_fields) => matches_fields(actual_fields, nested),
                _ => false,
            },
            _ => values_equal(actual, expected),
        }
    })
}

/// Deep equality used for scalars and sequences.
///
/// Objects reached through this path (for example inside an array) are
/// compared exactly, key for key.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => false,
    }
}

/// Numbers compare by value, so `200` and `200.0` are equal.
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
