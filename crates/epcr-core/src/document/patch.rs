//! Patch operations and atomic application.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::FieldPath;

/// A patch that could not be applied. The target document is left untouched.
#[derive(Error, Debug, PartialEq)]
pub enum PatchError {
    #[error("Parent of {0} does not exist")]
    MissingParent(String),

    #[error("Parent of {0} is not an object")]
    NotAnObject(String),

    #[error("Nothing to {op} at {path}")]
    MissingTarget { op: &'static str, path: String },

    #[error("Cannot patch the document root")]
    RootPath,
}

/// One add/replace/remove step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: FieldPath, value: Value },
    Replace { path: FieldPath, value: Value },
    Remove { path: FieldPath },
}

impl PatchOp {
    pub fn path(&self) -> &FieldPath {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Replace { path, .. }
            | PatchOp::Remove { path } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Remove { .. } => "remove",
        }
    }

    fn apply(&self, root: &mut Value) -> Result<(), PatchError> {
        let path = self.path();
        let (parent_path, leaf) = match (path.parent(), path.leaf()) {
            (Some(parent), Some(leaf)) => (parent, leaf),
            _ => return Err(PatchError::RootPath),
        };
        let parent = resolve_object(root, &parent_path, path)?;

        match self {
            PatchOp::Add { value, .. } => {
                parent.insert(leaf.to_string(), value.clone());
            }
            PatchOp::Replace { value, .. } => {
                let slot = parent.get_mut(leaf).ok_or_else(|| PatchError::MissingTarget {
                    op: "replace",
                    path: path.to_string(),
                })?;
                *slot = value.clone();
            }
            PatchOp::Remove { .. } => {
                parent.remove(leaf).ok_or_else(|| PatchError::MissingTarget {
                    op: "remove",
                    path: path.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

fn resolve_object<'v>(
    root: &'v mut Value,
    parent: &FieldPath,
    target: &FieldPath,
) -> Result<&'v mut Map<String, Value>, PatchError> {
    let mut node = root;
    for segment in parent.segments() {
        node = match node {
            Value::Object(map) => map
                .get_mut(segment)
                .ok_or_else(|| PatchError::MissingParent(target.to_string()))?,
            _ => return Err(PatchError::NotAnObject(target.to_string())),
        };
    }
    node.as_object_mut()
        .ok_or_else(|| PatchError::NotAnObject(target.to_string()))
}

/// An ordered list of operations, applied all-or-nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PatchOp) {
        self.ops.push(op);
    }

    pub fn extend(&mut self, other: Patch) {
        self.ops.extend(other.ops);
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply to `target`. On any failing op, `target` is unchanged.
    pub fn apply_to(&self, target: &mut Value) -> Result<(), PatchError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let mut working = target.clone();
        for (index, op) in self.ops.iter().enumerate() {
            if let Err(e) = op.apply(&mut working) {
                tracing::debug!(
                    index,
                    op = op.name(),
                    path = %op.path(),
                    error = %e,
                    "Patch rejected"
                );
                return Err(e);
            }
        }
        *target = working;
        Ok(())
    }
}

impl From<Vec<PatchOp>> for Patch {
    fn from(ops: Vec<PatchOp>) -> Self {
        Self { ops }
    }
}

impl IntoIterator for Patch {
    type Item = PatchOp;
    type IntoIter = std::vec::IntoIter<PatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
