// Documents, field access and value ordering shared by the query and aggregation engines

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// One record in a table.
pub type Document = Map<String, Value>;

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Current time as ISO-8601 UTC text with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Look up a field, following dots into nested objects (`address.city`).
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Strip the timestamp fields added on insert/update.
pub fn strip_metadata(doc: &mut Document) {
    doc.remove(CREATED_AT);
    doc.remove(UPDATED_AT);
}

/// Canonical text used as a hash key for index and uniqueness lookups.
/// Numbers key by numeric value so `1` and `1.0` collide; object keys are
/// sorted at every level so field order never matters.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("n:{}", number_text(n)),
        Value::String(s) => format!("s:{s}"),
        other => {
            let mut out = String::from("j:");
            write_canonical(other, &mut out);
            out
        }
    }
}

fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Number(n) => out.push_str(&number_text(n)),
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
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (field, item)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(field.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Equality with numbers compared by value, at any depth, and object field
/// order ignored. Agrees with [`value_key`].
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            value_key(a) == value_key(b)
        }
        _ => a == b,
    }
}

/// Ordering between two values of the same kind. `None` when the kinds differ
/// or the kind has no natural order.
pub fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: null < boolean < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = kind_rank(a).cmp(&kind_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => value_key(a).cmp(&value_key(b)),
        _ => compare_same_kind(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Render a value for error messages.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"name": "Ana", "address": {"city": "Lima"}}));
        assert_eq!(get_path(&d, "name"), Some(&json!("Ana")));
        assert_eq!(get_path(&d, "address.city"), Some(&json!("Lima")));
        assert_eq!(get_path(&d, "address.zip"), None);
        assert_eq!(get_path(&d, "name.first"), None);
    }

    #[test]
    fn test_value_key_numbers_by_value() {
        assert_eq!(value_key(&json!(1)), value_key(&json!(1.0)));
        assert_ne!(value_key(&json!(1)), value_key(&json!("1")));
        assert_ne!(value_key(&json!(true)), value_key(&json!("true")));
    }

    #[test]
    fn test_value_key_ignores_field_order() {
        let a = json!({"a": 1, "b": {"x": [1, 2.0], "y": null}});
        let b = json!({"b": {"y": null, "x": [1.0, 2]}, "a": 1.0});
        assert_eq!(value_key(&a), value_key(&b));
        assert!(values_equal(&a, &b));

        let c = json!({"a": 1, "b": {"x": [2, 1], "y": null}});
        assert_ne!(value_key(&a), value_key(&c));
        assert!(!values_equal(&a, &c));
        assert!(!values_equal(&json!([1]), &json!(1)));
    }

    #[test]
    fn test_compare_values_total_order() {
        let mut values = vec![json!("b"), json!(3), json!(null), json!(true), json!(1.5), json!("a")];
        values.sort_by(compare_values);
        assert_eq!(
            values,
            vec![json!(null), json!(true), json!(1.5), json!(3), json!("a"), json!("b")]
        );
    }

    #[test]
    fn test_compare_same_kind_rejects_mixed() {
        assert_eq!(compare_same_kind(&json!(1), &json!("1")), None);
        assert_eq!(compare_same_kind(&json!(2), &json!(1.5)), Some(Ordering::Greater));
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let ts = now_timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        assert!(ts.ends_with('Z'));
    }
}
