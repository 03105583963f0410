//! Consumer-side reconciliation: applying a delta to a replica tree.
//!
//! Snapshots land wholesale (or branch-by-branch under a branch filter);
//! patch ranges land atomically behind a session-id guard. Any failure
//! resets the consumer session to `{None, None}`, which makes the next delta
//! query present an unrecognized id and receive a snapshot. The session
//! cursor is never advanced past a failed apply, and the replica is never
//! left partially patched.

use patchline_tree::{StateTree, TreeError};
use thiserror::Error;

use crate::delta::{DeltaBody, DeltaResult, Session};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("delta session {delta} does not match local session {local:?}")]
    SessionMismatch { delta: i64, local: Option<i64> },
    #[error("patch apply rejected: {0}")]
    Tree(#[from] TreeError),
}

impl ApplyError {
    /// True for the session-consistency class of failures, the one that
    /// warrants a single immediate corrective re-sync.
    pub fn is_desync(&self) -> bool {
        matches!(self, ApplyError::SessionMismatch { .. })
    }
}

/// Applies `delta` to the replica and advances the session cursor.
pub fn apply_delta(
    tree: &StateTree,
    session: &mut Session,
    delta: &DeltaResult,
) -> Result<(), ApplyError> {
    match &delta.body {
        DeltaBody::Snapshot(snapshot) => {
            match &delta.branches {
                Some(branch_keys) => {
                    for key in branch_keys {
                        let Some(value) = snapshot.get(key) else {
                            continue;
                        };
                        let applied = if value.is_object() || value.is_array() {
                            tree.apply_branch_snapshot(key, value.clone())
                        } else {
                            tree.set_branch(key, value.clone())
                        };
                        if let Err(err) = applied {
                            session.reset();
                            return Err(err.into());
                        }
                    }
                }
                None => tree.apply_snapshot(snapshot.clone()),
            }
            session.id = Some(delta.id);
            session.patch_id = delta.patch_id;
            Ok(())
        }
        DeltaBody::Patch(patches) => {
            if session.id != Some(delta.id) {
                let local = session.id;
                session.reset();
                return Err(ApplyError::SessionMismatch {
                    delta: delta.id,
                    local,
                });
            }
            if delta.patch_id == session.patch_id {
                // Caught up already; nothing to apply.
                return Ok(());
            }
            if let Err(err) = tree.apply_patches(patches) {
                session.reset();
                return Err(err.into());
            }
            session.patch_id = delta.patch_id;
            Ok(())
        }
    }
}
