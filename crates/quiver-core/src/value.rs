//! Path traversal and id extraction over semi-structured values
//!
//! These are the generic helpers the edge matcher relies on: reading a
//! dotted field path out of a JSON body, and collecting every document id
//! referenced by the value found there.

use serde_json::Value;

/// Read a dotted field path out of a JSON value.
///
/// A segment applied to an array maps over its elements and flattens the
/// hits into a new array (so `Lines.Product` works against an array of
/// order lines); the explicit `Lines[].Product` spelling is accepted too.
/// Returns `None` when any segment is missing.
pub fn traverse(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }

    let mut current = value.clone();
    for raw_segment in path.split('.') {
        let segment = raw_segment.strip_suffix("[]").unwrap_or(raw_segment);
        current = match current {
            Value::Object(ref map) => map.get(segment)?.clone(),
            Value::Array(items) => {
                let hits: Vec<Value> = items
                    .iter()
                    .filter_map(|item| item.as_object().and_then(|m| m.get(segment)).cloned())
                    .collect();
                if hits.is_empty() {
                    return None;
                }
                Value::Array(hits)
            }
            _ => return None,
        };
    }

    Some(current)
}

/// Collect every document id referenced by `value` at `path`.
///
/// Strings are ids, arrays are walked element-wise, and nested objects are
/// walked recursively. A string that ends with the identity-part separator
/// is a collection prefix rather than an id and is skipped.
pub fn extract_referenced_ids(
    value: &Value,
    path: &str,
    identity_part_separator: char,
) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(target) = traverse(value, path) {
        collect_ids(&target, identity_part_separator, &mut ids);
    }
    ids
}

fn collect_ids(value: &Value, separator: char, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if !s.is_empty() && !s.ends_with(separator) {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ids(item, separator, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_ids(item, separator, out);
            }
        }
        _ => {}
    }
}
