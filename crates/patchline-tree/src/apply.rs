//! Patch application over a `serde_json::Value` document.
//!
//! One function per mutation kind, all routed through [`apply_one`]. The
//! atomicity of a multi-patch range is the caller's concern (see
//! `StateTree::apply_patches`, which works on a copy and commits on success).

use patchline_pointer::{get_mut, parse_root_relative};
use serde_json::Value;

use crate::types::{Patch, PatchOp, TreeError};

/// Apply a single patch to the document, in place.
///
/// Returns the value displaced by the mutation, if any: the previous value
/// for `replace`, the removed value for `remove`, or the overwritten object
/// value for an `add` that lands on an existing key.
pub fn apply_one(doc: &mut Value, patch: &Patch) -> Result<Option<Value>, TreeError> {
    let path = parse_root_relative(&patch.path);
    match patch.op {
        PatchOp::Add => {
            let value = patch.value.clone().ok_or(TreeError::MissingValue)?;
            add(doc, &path, value)
        }
        PatchOp::Replace => {
            let value = patch.value.clone().ok_or(TreeError::MissingValue)?;
            replace(doc, &path, value)
        }
        PatchOp::Remove => remove(doc, &path),
    }
}

fn add(doc: &mut Value, path: &[String], value: Value) -> Result<Option<Value>, TreeError> {
    if path.is_empty() {
        return Ok(Some(std::mem::replace(doc, value)));
    }
    let (parent_path, key) = path.split_at(path.len() - 1);
    let key = &key[0];
    let parent = get_mut(doc, parent_path).ok_or(TreeError::NotFound)?;
    match parent {
        Value::Object(map) => Ok(map.insert(key.clone(), value)),
        Value::Array(arr) => {
            if key == "-" {
                arr.push(value);
                return Ok(None);
            }
            let idx: usize = key.parse().map_err(|_| TreeError::InvalidIndex)?;
            if idx > arr.len() {
                return Err(TreeError::InvalidIndex);
            }
            arr.insert(idx, value);
            Ok(None)
        }
        _ => Err(TreeError::InvalidTarget),
    }
}

fn replace(doc: &mut Value, path: &[String], value: Value) -> Result<Option<Value>, TreeError> {
    if path.is_empty() {
        return Ok(Some(std::mem::replace(doc, value)));
    }
    let (parent_path, key) = path.split_at(path.len() - 1);
    let key = &key[0];
    let parent = get_mut(doc, parent_path).ok_or(TreeError::NotFound)?;
    match parent {
        Value::Object(map) => {
            if !map.contains_key(key) {
                return Err(TreeError::NotFound);
            }
            Ok(map.insert(key.clone(), value))
        }
        Value::Array(arr) => {
            let idx: usize = key.parse().map_err(|_| TreeError::InvalidIndex)?;
            if idx >= arr.len() {
                return Err(TreeError::NotFound);
            }
            Ok(Some(std::mem::replace(&mut arr[idx], value)))
        }
        _ => Err(TreeError::InvalidTarget),
    }
}

fn remove(doc: &mut Value, path: &[String]) -> Result<Option<Value>, TreeError> {
    if path.is_empty() {
        return Err(TreeError::Root);
    }
    let (parent_path, key) = path.split_at(path.len() - 1);
    let key = &key[0];
    let parent = get_mut(doc, parent_path).ok_or(TreeError::NotFound)?;
    match parent {
        Value::Object(map) => map.remove(key).ok_or(TreeError::NotFound).map(Some),
        Value::Array(arr) => {
            let idx: usize = key.parse().map_err(|_| TreeError::InvalidIndex)?;
            if idx >= arr.len() {
                return Err(TreeError::NotFound);
            }
            Ok(Some(arr.remove(idx)))
        }
        _ => Err(TreeError::InvalidTarget),
    }
}
