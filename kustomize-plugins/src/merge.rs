//! Deep merging of plain values, following the semantics of go's `mergo` library.

use serde_json::{Value, map::Entry};

/// Merges `src` into `dst`.
///
/// Mappings are merged recursively. For any other pair, `dst` keeps its value unless it is
/// empty, or unless `overwrite` is set and `src` is not empty.
pub fn merge_values(dst: &mut Value, src: Value, overwrite: bool) {
    match (dst, src) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.entry(key) {
                    Entry::Vacant(entry) => drop(entry.insert(value)),
                    Entry::Occupied(entry) => merge_values(entry.into_mut(), value, overwrite),
                }
            }
        }
        (dst, src) => {
            if (overwrite && !is_empty(&src)) || is_empty(dst) {
                *dst = src;
            }
        }
    }
}

/// The go zero value check used by `mergo`.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(obj) => obj.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn destination_wins_without_overwrite() {
        let mut dst = json!({"a": 1, "b": {"c": "keep", "d": ""}, "e": [1]});
        merge_values(&mut dst, json!({"a": 2, "b": {"c": "new", "d": "filled", "x": true}, "e": [2]}), false);
        assert_eq!(dst, json!({"a": 1, "b": {"c": "keep", "d": "filled", "x": true}, "e": [1]}));
    }

    #[test]
    fn source_wins_with_overwrite_unless_empty() {
        let mut dst = json!({"a": 1, "b": {"c": "old"}, "e": [1]});
        merge_values(&mut dst, json!({"a": 0, "b": {"c": "new"}, "e": [2, 3], "f": null}), true);
        assert_eq!(dst, json!({"a": 1, "b": {"c": "new"}, "e": [2, 3], "f": null}));
    }

    #[test]
    fn mapping_replaces_empty_destination() {
        let mut dst = json!({"values": null});
        merge_values(&mut dst, json!({"values": {"x": 1}}), false);
        assert_eq!(dst, json!({"values": {"x": 1}}));
    }
}
