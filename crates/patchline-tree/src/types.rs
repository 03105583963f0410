//! Structural-mutation records and the reasons a tree can reject them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("NOT_FOUND")]
    NotFound,
    #[error("INVALID_INDEX")]
    InvalidIndex,
    #[error("INVALID_TARGET")]
    InvalidTarget,
    #[error("MISSING_VALUE")]
    MissingValue,
    #[error("ROOT")]
    Root,
}

/// The mutation kind of a [`Patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One ordered structural mutation of a state tree.
///
/// `path` is a JSON Pointer string, either absolute (`/a/x`) or root-relative
/// (`./a/x`) when it was rewritten by a branch-filtered producer. The record
/// is opaque to the patch log, which only stores and replays it; the tree
/// engine is the sole interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub path: String,
    pub op: PatchOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "oldValue", default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

impl Patch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Add,
            value: Some(value),
            old_value: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value, old_value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Replace,
            value: Some(value),
            old_value,
        }
    }

    pub fn remove(path: impl Into<String>, old_value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Remove,
            value: None,
            old_value,
        }
    }
}
