//! Minimal, deterministic diffs between document snapshots.
//!
//! Objects are compared key by key in sorted order; arrays and leaves are
//! replaced wholesale. Applying `diff(old, new)` to `old` yields `new`.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::{Document, FieldPath, Patch, PatchOp};

/// Patch that turns `parent` into `current`.
pub fn diff(parent: &Document, current: &Document) -> Patch {
    diff_values(parent.as_value(), current.as_value())
}

/// Patch between two JSON objects. Non-object roots yield an empty patch:
/// documents are always objects.
pub fn diff_values(parent: &Value, current: &Value) -> Patch {
    let mut patch = Patch::new();
    if let (Value::Object(old), Value::Object(new)) = (parent, current) {
        diff_objects(&FieldPath::default(), old, new, &mut patch);
    }
    patch
}

fn diff_objects(
    prefix: &FieldPath,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    patch: &mut Patch,
) {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    for key in keys {
        let path = prefix.child(key);
        match (old.get(key), new.get(key)) {
            (Some(_), None) => patch.push(PatchOp::Remove { path }),
            (None, Some(value)) => patch.push(PatchOp::Add {
                path,
                value: value.clone(),
            }),
            (Some(a), Some(b)) if a == b => {}
            (Some(Value::Object(a)), Some(Value::Object(b))) => {
                diff_objects(&path, a, b, patch);
            }
            (Some(_), Some(value)) => patch.push(PatchOp::Replace {
                path,
                value: value.clone(),
            }),
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_identical_documents_diff_empty() {
        let a = doc(json!({"x": {"y": [1, 2]}, "z": {"_text": "1"}}));
        assert!(diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_nested_changes() {
        let old = doc(json!({"a": {"b": 1, "c": 2}, "gone": true}));
        let new = doc(json!({"a": {"b": 1, "c": 3, "d": 4}, "list": [1]}));
        let patch = diff(&old, &new);

        let wire = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            wire,
            json!([
                {"op": "replace", "path": "/a/c", "value": 3},
                {"op": "add", "path": "/a/d", "value": 4},
                {"op": "remove", "path": "/gone"},
                {"op": "add", "path": "/list", "value": [1]}
            ])
        );
    }

    #[test]
    fn test_type_change_replaces_whole_node() {
        let old = doc(json!({"a": {"b": 1}}));
        let new = doc(json!({"a": [1]}));
        let patch = diff(&old, &new);
        assert!(matches!(patch.ops(), [PatchOp::Replace { .. }]));
    }

    #[test]
    fn test_diff_applies_back() {
        let old = doc(json!({"a": {"b": {"_text": "1"}}, "k": 1}));
        let new = doc(json!({
            "a": {"b": {"_attributes": {"xsi:nil": "true", "NV": "7701003"}}},
            "m": {}
        }));
        let mut target = old.clone();
        target.apply_patch(&diff(&old, &new)).unwrap();
        assert_eq!(target, new);
    }
}
