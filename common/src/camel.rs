//! Snake_case → camelCase JSON key translation, applied when reading
//! persisted rows that predate the wire format's camelCase convention
//! (spec.md §6.3: "when reading persisted JSON written in snake_case for
//! backward compatibility, readers must translate on read").

use serde_json::{Map, Value};

pub fn snake_to_camel_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively rewrite every object key in `value` from snake_case to
/// camelCase. Values that are already camelCase pass through unchanged,
/// so this is safe to run unconditionally on every row read back from
/// storage rather than only on rows known to predate the convention.
pub fn translate_on_read(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(snake_to_camel_key(&k), translate_on_read(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(translate_on_read).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_snake_case_keys_recursively() {
        let input = json!({"segment_id": "s1", "nested": {"job_status": "pending"}});
        let out = translate_on_read(input);
        assert_eq!(out, json!({"segmentId": "s1", "nested": {"jobStatus": "pending"}}));
    }

    #[test]
    fn already_camel_case_is_unchanged() {
        let input = json!({"segmentId": "s1"});
        assert_eq!(translate_on_read(input.clone()), input);
    }
}
