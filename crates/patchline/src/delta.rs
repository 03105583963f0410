//! The delta wire contract and the per-consumer session cursor.
//!
//! A [`DeltaResult`] crosses the transport boundary as pass-through JSON:
//!
//! ```text
//! { id: number, branches: string[] | null, patchId: number | null,
//!   type: "patch" | "snapshot",
//!   result: Patch[] | object }
//! ```

use patchline_tree::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of a delta query: a contiguous patch range, or a full (possibly
/// branch-restricted) snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "lowercase")]
pub enum DeltaBody {
    Patch(Vec<Patch>),
    Snapshot(Value),
}

/// Response to a delta query.
///
/// `patch_id` is the producer's last known patch id once this delta is
/// applied (`None` when nothing has been recorded yet); `branches` echoes the
/// producer's branch filter for consumer-side validation and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaResult {
    pub id: i64,
    pub branches: Option<Vec<String>>,
    #[serde(rename = "patchId")]
    pub patch_id: Option<i64>,
    #[serde(flatten)]
    pub body: DeltaBody,
}

impl DeltaResult {
    pub fn is_snapshot(&self) -> bool {
        matches!(self.body, DeltaBody::Snapshot(_))
    }
}

/// Per-consumer sync cursor: the producer session last synced against and the
/// last applied patch id.
///
/// Starts at `{None, None}` (never synced) and is reset to that state only as
/// part of apply-failure handling; resynchronization is driven by the
/// mismatch the producer sees on the next query, never by eager resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    pub id: Option<i64>,
    pub patch_id: Option<i64>,
}

impl Session {
    pub fn reset(&mut self) {
        self.id = None;
        self.patch_id = None;
    }

    pub fn is_synced(&self) -> bool {
        self.id.is_some()
    }
}
