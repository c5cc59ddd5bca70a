//! Attribute value coding.
//!
//! Element attributes are stored as strings and JSON-decoded on read,
//! falling back to the raw string when the stored text is not valid JSON.
//! Writing `false`, `null`, or the empty string removes the attribute.

use serde_json::Value;
use std::cmp::Ordering;

/// Decode a stored attribute string into a JSON value.
///
/// `"3"` decodes to the number 3, `"true"` to a boolean, and anything
/// that is not valid JSON comes back as the raw string.
#[must_use]
pub fn decode_attr(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Encode a value for attribute storage.
///
/// Returns `None` when the value means "remove this attribute".
#[must_use]
pub fn encode_attr(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Total order over JSON values used by `sort` and `lowest`/`highest`.
///
/// Numbers order numerically, strings lexicographically; across kinds the
/// order is null < bool < number < string < everything else (by JSON text).
#[must_use]
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_number() {
        assert_eq!(decode_attr("3"), json!(3));
        assert_eq!(decode_attr("3.5"), json!(3.5));
    }

    #[test]
    fn test_decode_falls_back_to_raw() {
        assert_eq!(decode_attr("north-west"), json!("north-west"));
    }

    #[test]
    fn test_encode_removals() {
        assert_eq!(encode_attr(&json!(false)), None);
        assert_eq!(encode_attr(&json!(null)), None);
        assert_eq!(encode_attr(&json!("")), None);
        assert_eq!(encode_attr(&json!(true)), Some("true".to_string()));
        assert_eq!(encode_attr(&json!(7)), Some("7".to_string()));
        assert_eq!(encode_attr(&json!("red")), Some("red".to_string()));
    }

    #[test]
    fn test_attr_round_trip() {
        for v in [json!(3), json!(true), json!("red"), json!([1, 2])] {
            let stored = encode_attr(&v).unwrap();
            assert_eq!(decode_attr(&stored), v);
        }
    }

    #[test]
    fn test_cmp_numbers_and_strings() {
        assert_eq!(cmp_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(cmp_values(&json!("10"), &json!("2")), Ordering::Less);
        assert_eq!(cmp_values(&json!(1), &json!("1")), Ordering::Less);
    }
}
