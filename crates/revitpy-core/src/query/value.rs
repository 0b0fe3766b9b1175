//! Comparison and coercion of property values against filter operands.
//!
//! Numbers compare numerically, and a string that parses as a number is
//! coerced when the other side is numeric. Anything else falls back to
//! comparing the text forms.

use std::cmp::Ordering;

use serde_json::Value;

/// Text form used for string operators and fallback comparison.
pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn fold(s: String, case_sensitive: bool) -> String {
    if case_sensitive { s } else { s.to_lowercase() }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Numeric view of both sides, when at least one side is a number and the
/// other coerces.
fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    if !(a.is_number() || b.is_number()) {
        return None;
    }
    Some((as_number(a)?, as_number(b)?))
}

pub(crate) fn values_equal(a: &Value, b: &Value, case_sensitive: bool) -> bool {
    if let Some((x, y)) = numeric_pair(a, b) {
        return x == y;
    }
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            fold(text(a), case_sensitive) == fold(text(b), case_sensitive)
        }
        _ => a == b,
    }
}

/// Ordering of a property value against an operand. `None` when neither a
/// numeric nor a textual comparison makes sense (e.g. arrays).
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let Some((x, y)) = numeric_pair(a, b) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => None,
        (Value::Null, _) | (_, Value::Null) => None,
        _ => Some(text(a).cmp(&text(b))),
    }
}

/// Sort key with a total order, ranked by kind first.
///
/// missing < null < bool < number < string < array/object. Strings that
/// parse as numbers rank with the numbers so `"9"` sorts before `10`.
#[derive(Debug, PartialEq)]
enum SortKey<'a> {
    Missing,
    Null,
    Bool(bool),
    Number(f64),
    Text(&'a str),
    Composite(String),
}

impl SortKey<'_> {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Null => 1,
            SortKey::Bool(_) => 2,
            SortKey::Number(_) => 3,
            SortKey::Text(_) => 4,
            SortKey::Composite(_) => 5,
        }
    }
}

fn sort_key(value: Option<&Value>) -> SortKey<'_> {
    match value {
        None => SortKey::Missing,
        Some(Value::Null) => SortKey::Null,
        Some(Value::Bool(b)) => SortKey::Bool(*b),
        Some(Value::Number(n)) => n.as_f64().map_or(SortKey::Null, SortKey::Number),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(n) => SortKey::Number(n),
            Err(_) => SortKey::Text(s),
        },
        Some(other) => SortKey::Composite(other.to_string()),
    }
}

/// Total order for sort keys: missing, then null, then values by kind.
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(&y),
        (SortKey::Number(x), SortKey::Number(y)) => x.total_cmp(&y),
        (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
        (SortKey::Composite(x), SortKey::Composite(y)) => x.cmp(&y),
        (x, y) => x.rank().cmp(&y.rank()),
    }
}
