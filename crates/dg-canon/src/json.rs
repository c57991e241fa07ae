use serde_json::Value;

/// Remove `null` values from maps, recursively. Sequence order is preserved;
/// nulls inside arrays are kept (positional meaning), only map entries drop.
pub fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                out.insert(k.clone(), strip_nulls(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON string: sorted keys, compact separators, nulls omitted.
///
/// `serde_json::Map` is a BTreeMap, so key order is already lexicographic and
/// `to_string` emits no optional whitespace. Integers stay integers; decimals
/// keep their shortest round-trip form (ryu), matching the published golden
/// vectors.
pub fn canonical_json_string(value: &Value) -> String {
    serde_json::to_string(&strip_nulls(value)).expect("canonical JSON serialization is infallible")
}

/// Canonical JSON as UTF-8 bytes — the input to every content hash and
/// signature in the graph.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    canonical_json_string(value).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_compact() {
        let v = json!({"b": 1, "a": "2"});
        assert_eq!(canonical_json_string(&v), r#"{"a":"2","b":1}"#);
    }

    #[test]
    fn nulls_dropped_from_maps_only() {
        let v = json!({"a": null, "b": [null, 1], "c": {"d": null, "e": 2}});
        assert_eq!(canonical_json_string(&v), r#"{"b":[null,1],"c":{"e":2}}"#);
    }

    #[test]
    fn nested_key_ordering() {
        let v = json!({"z": {"y": 1, "x": 2}, "a": [3, 2, 1]});
        assert_eq!(canonical_json_string(&v), r#"{"a":[3,2,1],"z":{"x":2,"y":1}}"#);
    }

    #[test]
    fn sequences_preserve_order() {
        let v = json!(["b", "a", "c"]);
        assert_eq!(canonical_json_string(&v), r#"["b","a","c"]"#);
    }

    #[test]
    fn decimals_keep_exact_form() {
        let v = json!({"confidence": 0.85, "count": 3});
        assert_eq!(canonical_json_string(&v), r#"{"confidence":0.85,"count":3}"#);
    }
}
