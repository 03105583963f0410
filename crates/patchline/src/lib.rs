//! patchline — incremental state synchronization for a shared JSON state
//! tree.
//!
//! One producer owns an authoritative [`StateTree`] and runs a [`PatchLog`]
//! beside it; many independent consumers each keep a replica tree and pull
//! catch-up deltas through a [`DeltaSource`]. A delta is either the
//! contiguous patch range recorded since the consumer's last known patch id,
//! or a full snapshot when the producer restarted (new session id) or the
//! consumer's cursor fell out of the retained history window. The
//! [`Syncer`] drives the fetch/apply cycle, serializes concurrent sync
//! attempts, and recovers once from a detected desynchronization.
//!
//! ```
//! use std::sync::Arc;
//! use patchline::{LocalDeltaSource, PatchLog, StateTree, Syncer};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let shared = StateTree::new(json!({"downloads": {}}));
//! let log = Arc::new(PatchLog::new(shared.clone(), None));
//!
//! let syncer = Syncer::new(
//!     Arc::new(LocalDeltaSource::new(log)),
//!     StateTree::default(),
//! );
//! syncer.sync().await; // first sync adopts a snapshot
//!
//! shared.add("/downloads/t1", json!({"progress": 0.5})).unwrap();
//! syncer.sync().await; // later syncs apply patch ranges
//!
//! assert_eq!(syncer.tree().snapshot(), shared.snapshot());
//! # }
//! ```

pub mod branches;
pub mod delta;
pub mod patch_log;
pub mod reconcile;
pub mod sync;

pub use branches::BranchFilter;
pub use delta::{DeltaBody, DeltaResult, Session};
pub use patch_log::PatchLog;
pub use reconcile::{apply_delta, ApplyError};
pub use sync::{DeltaSource, LocalDeltaSource, SyncError, Syncer, TransportError};

pub use patchline_tree::{Patch, PatchOp, StateTree, TreeError};
