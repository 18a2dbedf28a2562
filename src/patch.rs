//! JSON-Patch changeset entries.

use crate::value::Value;

/// One entry in a layer's changeset journal.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPatch {
    pub op: PatchOp,
    pub path: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl JsonPatch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    /// Apply this patch to `tree`: add/replace perform `set_path`; remove
    /// performs `delete_path`.
    pub fn apply(&self, tree: &mut Value) -> Result<(), crate::path::PathError> {
        match self.op {
            PatchOp::Add | PatchOp::Replace => {
                let value = self.value.clone().unwrap_or(Value::Null);
                crate::path::set_path(tree, &self.path, value)?;
            }
            PatchOp::Remove => {
                crate::path::delete_path(tree, &self.path)?;
            }
        }
        Ok(())
    }
}

/// Replay an ordered changeset against a freshly-loaded tree, reapplying
/// every edit made since the last load.
pub fn replay(tree: &mut Value, changeset: &[JsonPatch]) -> Result<(), crate::path::PathError> {
    for patch in changeset {
        patch.apply(tree)?;
    }
    Ok(())
}
