//! Structural delta between two JSON-like documents.
//!
//! The patch produced by [`diff`] contains only keys whose value changed. Arrays are
//! never patched element-wise: if any element differs the whole new array is emitted.

use serde_json::{Map, Value};

/// Returns the keys of `new_value` that differ from `old_value`.
///
/// Non-object inputs are compared as a whole: an empty object means "no change",
/// otherwise the new value itself is the patch.
pub fn diff(old_value: &Value, new_value: &Value) -> Value {
    match (old_value, new_value) {
        (Value::Object(old), Value::Object(new)) => Value::Object(diff_objects(old, new)),
        _ if values_differ(old_value, new_value) => new_value.clone(),
        _ => Value::Object(Map::new()),
    }
}

/// Shallow-recursive merge of a patch produced by [`diff`] onto `base`.
pub fn merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(target), Value::Object(fields)) => {
            for (key, value) in fields {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, value) => *target = value.clone(),
    }
}

pub fn is_empty(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, new_field) in new {
        let Some(old_field) = old.get(key) else {
            patch.insert(key.clone(), new_field.clone());
            continue;
        };
        match (old_field, new_field) {
            (Value::Object(old_inner), Value::Object(new_inner)) => {
                let nested = diff_objects(old_inner, new_inner);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            _ => {
                if values_differ(old_field, new_field) {
                    patch.insert(key.clone(), new_field.clone());
                }
            }
        }
    }
    patch
}

fn values_differ(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Array(old_items), Value::Array(new_items)) => {
            old_items.len() != new_items.len()
                || old_items.iter().zip(new_items).any(|(a, b)| values_differ(a, b))
        }
        (Value::Object(old_inner), Value::Object(new_inner)) => !diff_objects(old_inner, new_inner).is_empty(),
        (Value::Number(a), Value::Number(b)) => a.as_f64() != b.as_f64(),
        _ => old != new,
    }
}
