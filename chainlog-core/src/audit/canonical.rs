//! Canonical JSON encoding
//!
//! Produces the hashing input for an entry. Map keys are sorted at every
//! nesting level; list order is kept as-is and stays significant.

use serde_json::Value;

/// Encode `value` as compact JSON with sorted map keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // Serializing a &str cannot fail
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => out.push_str("\"\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_at_every_level() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let b = json!({"a": {"y": [1, 2], "z": true}, "b": 1});

        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn test_list_order_is_significant() {
        let a = json!({"tags": ["x", "y"]});
        let b = json!({"tags": ["y", "x"]});
        assert_ne!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_maps_inside_lists_are_sorted() {
        let value = json!([{"b": null, "a": "q\"uote"}]);
        assert_eq!(canonical_json(&value), r#"[{"a":"q\"uote","b":null}]"#);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(false)), "false");
        assert_eq!(canonical_json(&json!(-12)), "-12");
        assert_eq!(canonical_json(&json!(1.5)), "1.5");
        assert_eq!(canonical_json(&json!("line\nbreak")), r#""line\nbreak""#);
    }

    #[test]
    fn test_output_parses_back_to_same_value() {
        let value = json!({"nested": {"k": [1, {"d": 2, "c": 3}]}, "unicode": "héllo"});
        let parsed: Value = serde_json::from_str(&canonical_json(&value)).unwrap();
        assert_eq!(parsed, value);
    }
}
