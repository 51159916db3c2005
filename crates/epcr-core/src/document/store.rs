//! The nested clinical document behind every record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::{FieldPath, Patch, PatchError, PatchOp};
use crate::models::ValueCell;

/// What a path resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(ValueCell),
    List(Vec<ValueCell>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&ValueCell> {
        match self {
            FieldValue::Scalar(cell) => Some(cell),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ValueCell]> {
        match self {
            FieldValue::List(cells) => Some(cells),
            FieldValue::Scalar(_) => None,
        }
    }
}

/// A JSON object document mutated only through patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document {
    root: Value,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Wrap an existing JSON object.
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        if !value.is_object() {
            return Err(PatchError::NotAnObject("/".into()));
        }
        Ok(Self { root: value })
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_object().map_or(true, Map::is_empty)
    }

    /// Raw JSON at `path`.
    pub fn raw(&self, path: &FieldPath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    /// Resolve `path` to a cell or a list of cells. Anything that is absent,
    /// or not shaped like a cell, reads as `None`.
    pub fn get(&self, path: &FieldPath) -> Option<FieldValue> {
        match self.raw(path)? {
            Value::Array(items) => items
                .iter()
                .map(|item| ValueCell::from_wire(item).ok())
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::List),
            value => ValueCell::from_wire(value).ok().map(FieldValue::Scalar),
        }
    }

    pub fn get_cell(&self, path: &FieldPath) -> Option<ValueCell> {
        match self.get(path)? {
            FieldValue::Scalar(cell) => Some(cell),
            FieldValue::List(_) => None,
        }
    }

    pub fn get_list(&self, path: &FieldPath) -> Option<Vec<ValueCell>> {
        match self.get(path)? {
            FieldValue::List(cells) => Some(cells),
            FieldValue::Scalar(_) => None,
        }
    }

    /// Build the patch that writes `cell` at `path`.
    ///
    /// Missing intermediate objects are added. An unset cell on an optional
    /// field removes the leaf (if present) instead of writing a nil.
    pub fn plan_scalar(&self, path: &FieldPath, cell: &ValueCell, optional: bool) -> Patch {
        let remove = cell.is_unset() && optional;
        self.plan_value(path, cell.to_wire(), remove)
    }

    /// Build the patch that writes `cells` as an array at `path`. An empty
    /// list on an optional field removes the leaf.
    pub fn plan_list(&self, path: &FieldPath, cells: &[ValueCell], optional: bool) -> Patch {
        let remove = optional && cells.iter().all(ValueCell::is_unset);
        let value = Value::Array(cells.iter().map(ValueCell::to_wire).collect());
        self.plan_value(path, value, remove)
    }

    fn plan_value(&self, path: &FieldPath, value: Value, remove: bool) -> Patch {
        let mut patch = Patch::new();
        let Some(parent) = path.parent() else {
            return patch;
        };

        let mut node = Some(&self.root);
        for depth in 1..=parent.len() {
            let segment = &parent.segments()[depth - 1];
            node = node.and_then(|n| n.get(segment));
            if node.is_none() {
                if remove {
                    return patch;
                }
                patch.push(PatchOp::Add {
                    path: path.prefix(depth),
                    value: Value::Object(Map::new()),
                });
            }
        }

        let existing = node.and_then(|n| n.get(path.leaf().unwrap_or_default()));
        match (existing, remove) {
            (Some(_), true) => patch.push(PatchOp::Remove { path: path.clone() }),
            (None, true) => {}
            (Some(current), false) if *current == value => {}
            (Some(_), false) => patch.push(PatchOp::Replace {
                path: path.clone(),
                value,
            }),
            (None, false) => patch.push(PatchOp::Add {
                path: path.clone(),
                value,
            }),
        }
        patch
    }

    /// Apply `patch` atomically.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<(), PatchError> {
        patch.apply_to(&mut self.root)
    }

    /// Plan and apply a scalar write, returning the applied patch.
    pub fn set_scalar(
        &mut self,
        path: &FieldPath,
        cell: &ValueCell,
        optional: bool,
    ) -> Result<Patch, PatchError> {
        let patch = self.plan_scalar(path, cell, optional);
        self.apply_patch(&patch)?;
        Ok(patch)
    }

    /// Plan and apply a list write, returning the applied patch.
    pub fn set_list(
        &mut self,
        path: &FieldPath,
        cells: &[ValueCell],
        optional: bool,
    ) -> Result<Patch, PatchError> {
        let patch = self.plan_list(path, cells, optional);
        self.apply_patch(&patch)?;
        Ok(patch)
    }

    /// SHA-256 (hex) of the document's JSON. Object keys serialize in
    /// sorted order, so equal documents hash equally.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.root).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

impl TryFrom<Value> for Document {
    type Error = PatchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Document::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        document.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotValue, PertinentNegative};
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_set_scalar_creates_intermediates() {
        let mut doc = Document::new();
        let patch = doc
            .set_scalar(&path("/a/b/c"), &ValueCell::text("5"), false)
            .unwrap();

        assert_eq!(patch.len(), 3);
        assert!(matches!(&patch.ops()[0], PatchOp::Add { path, .. } if path.to_string() == "/a"));
        assert!(matches!(&patch.ops()[1], PatchOp::Add { path, .. } if path.to_string() == "/a/b"));
        assert_eq!(doc.as_value(), &json!({"a": {"b": {"c": {"_text": "5"}}}}));
    }

    #[test]
    fn test_set_scalar_replaces_existing() {
        let mut doc = Document::new();
        doc.set_scalar(&path("/a"), &ValueCell::text("1"), false).unwrap();
        let patch = doc.set_scalar(&path("/a"), &ValueCell::text("2"), false).unwrap();
        assert!(matches!(patch.ops(), [PatchOp::Replace { .. }]));
        assert_eq!(doc.get_cell(&path("/a")), Some(ValueCell::text("2")));
    }

    #[test]
    fn test_unchanged_write_is_empty_patch() {
        let mut doc = Document::new();
        doc.set_scalar(&path("/a"), &ValueCell::text("1"), false).unwrap();
        let patch = doc.set_scalar(&path("/a"), &ValueCell::text("1"), false).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_required_unset_writes_nil() {
        let mut doc = Document::new();
        doc.set_scalar(&path("/g/x"), &ValueCell::unset(), false).unwrap();
        assert_eq!(
            doc.as_value(),
            &json!({"g": {"x": {"_attributes": {"xsi:nil": "true", "NV": "7701003"}}}})
        );
    }

    #[test]
    fn test_optional_unset_removes_leaf_only() {
        let mut doc = Document::new();
        doc.set_scalar(&path("/g/x"), &ValueCell::text("1"), true).unwrap();
        let patch = doc.set_scalar(&path("/g/x"), &ValueCell::unset(), true).unwrap();
        assert!(matches!(patch.ops(), [PatchOp::Remove { .. }]));
        assert_eq!(doc.as_value(), &json!({"g": {}}));

        // Nothing left to remove, nothing created.
        let patch = doc.set_scalar(&path("/g/x"), &ValueCell::unset(), true).unwrap();
        assert!(patch.is_empty());
        let patch = doc.set_scalar(&path("/h/y"), &ValueCell::unset(), true).unwrap();
        assert!(patch.is_empty());
        assert_eq!(doc.as_value(), &json!({"g": {}}));
    }

    #[test]
    fn test_optional_negative_is_written() {
        let mut doc = Document::new();
        doc.set_scalar(&path("/x"), &ValueCell::negative(NotValue::NotApplicable), true)
            .unwrap();
        assert!(doc.raw(&path("/x")).is_some());
    }

    #[test]
    fn test_write_through_scalar_fails_atomically() {
        let mut doc = Document::from_value(json!({"a": 5, "z": 1})).unwrap();
        let before = doc.clone();
        let result = doc.set_scalar(&path("/a/b/c"), &ValueCell::text("1"), false);
        assert!(result.is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_get_through_non_object_is_none() {
        let doc = Document::from_value(json!({"a": 5})).unwrap();
        assert!(doc.get(&path("/a/b")).is_none());
        assert!(doc.get(&path("/missing")).is_none());
        // Present but not a cell
        assert!(doc.get(&path("/a")).is_none());
    }

    #[test]
    fn test_list_set_and_get() {
        let mut doc = Document::new();
        let cells = vec![ValueCell::text("R07.9"), ValueCell::text("R06.02")];
        doc.set_list(&path("/s/list"), &cells, true).unwrap();
        assert_eq!(doc.get_list(&path("/s/list")), Some(cells));
        assert!(doc.get_cell(&path("/s/list")).is_none());

        doc.set_list(&path("/s/list"), &[], true).unwrap();
        assert!(doc.raw(&path("/s/list")).is_none());
    }

    #[test]
    fn test_required_list_keeps_negative() {
        let mut doc = Document::new();
        let cells = vec![ValueCell::negative(PertinentNegative::NoKnownDrugAllergy)];
        doc.set_list(&path("/eHistory.06"), &cells, false).unwrap();
        assert_eq!(
            doc.as_value(),
            &json!({"eHistory.06": [{"_attributes": {"xsi:nil": "true", "PN": "8801013"}}]})
        );
    }

    #[test]
    fn test_digest_stable() {
        let a = Document::from_value(json!({"b": 1, "a": 2})).unwrap();
        let b = Document::from_value(json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_ne!(a.digest(), Document::new().digest());
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        let doc: Result<Document, _> = serde_json::from_value(json!("x"));
        assert!(doc.is_err());
    }
}
