//! Producer-side patch log.
//!
//! A [`PatchLog`] subscribes to the mutation stream of an authoritative
//! [`StateTree`], assigns each retained patch a monotonically increasing id,
//! keeps a sliding time-windowed history of recent mutations, and answers
//! delta queries with either a contiguous patch range or a full snapshot.
//!
//! Consumer staleness is never an error here: an unknown session id or a
//! patch cursor that has been pruned out of the window both fall back to the
//! snapshot branch of the response. That fallback is the designed recovery
//! path, not a failure.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use patchline_tree::{ListenerId, Patch, StateTree};
use rand::Rng;
use tokio::time::Instant;

use crate::branches::BranchFilter;
use crate::delta::{DeltaBody, DeltaResult};

/// Patch ids wrap back to 0 past this ceiling. Internal tunable, not a
/// protocol-visible constant.
const PATCH_ID_CEILING: i64 = 1_000_000_000;

/// Entries older than this are pruned from the history window.
const HISTORY_WINDOW: Duration = Duration::from_secs(60);

/// Prunes are coalesced to at most one per this interval.
const PRUNE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Floor of the session-id range, matching the logical-clock convention of
/// keeping small integers out of the id space.
const MIN_SESSION_ID: i64 = 65_536;

fn generate_session_id() -> i64 {
    rand::thread_rng().gen_range(MIN_SESSION_ID..=i64::MAX)
}

struct LogEntry {
    patch: Patch,
    id: i64,
    recorded_at: Instant,
}

struct LogInner {
    entries: VecDeque<LogEntry>,
    counter: i64,
    prune_pending: bool,
}

impl LogInner {
    fn next_id(&mut self) -> i64 {
        self.next_id_with(PATCH_ID_CEILING)
    }

    // The skip loop terminates only while the retained window is far smaller
    // than the id space; the window is time-bounded, so this holds by a wide
    // margin.
    fn next_id_with(&mut self, ceiling: i64) -> i64 {
        assert!(
            (self.entries.len() as i64) < ceiling / 2,
            "patch history window too large for the id ceiling"
        );
        loop {
            let candidate = self.counter;
            self.counter = if self.counter >= ceiling {
                0
            } else {
                self.counter + 1
            };
            if !self.entries.iter().any(|entry| entry.id == candidate) {
                return candidate;
            }
        }
    }

    fn prune(&mut self, now: Instant) {
        // Entries are time-ordered, so the stale ones form a contiguous
        // prefix.
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.recorded_at) > HISTORY_WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn last_id(&self) -> Option<i64> {
        self.entries.back().map(|entry| entry.id)
    }
}

/// Producer-side patch history for one authoritative tree.
///
/// Created once per producer-tree lifetime; its random session id is what
/// lets consumers detect a producer restart. Dropping the log unsubscribes
/// from the tree and clears the history.
pub struct PatchLog {
    id: i64,
    filter: Option<BranchFilter>,
    tree: StateTree,
    inner: Arc<Mutex<LogInner>>,
    listener: Option<ListenerId>,
}

impl PatchLog {
    /// Attaches a new log to `tree`. With `branches` set, only mutations
    /// under those top-level keys are retained (with their paths rewritten to
    /// the root-relative form) and snapshots are restricted to those keys.
    pub fn new(tree: StateTree, branches: Option<Vec<String>>) -> Self {
        let mut log = Self {
            id: generate_session_id(),
            filter: branches.map(BranchFilter::new),
            tree,
            inner: Arc::new(Mutex::new(LogInner {
                entries: VecDeque::new(),
                counter: 1,
                prune_pending: false,
            })),
            listener: None,
        };
        log.subscribe();
        log
    }

    /// The session id consumers sync against.
    pub fn session_id(&self) -> i64 {
        self.id
    }

    fn subscribe(&mut self) {
        // Re-subscribing drops the previous listener first; the tree never
        // sees duplicate registrations from one log.
        if let Some(id) = self.listener.take() {
            self.tree.unobserve(id);
        }
        let inner = Arc::downgrade(&self.inner);
        let filter = self.filter.clone();
        let id = self.tree.observe(move |patch| {
            if let Some(inner) = inner.upgrade() {
                record_patch(&inner, filter.as_ref(), patch);
            }
        });
        self.listener = Some(id);
    }

    /// Answers a consumer catch-up query.
    ///
    /// An unrecognized `consumer_id` (never synced, or this producer
    /// restarted) yields a snapshot. A recognized session with a cursor still
    /// in the retained window yields the patch range recorded strictly after
    /// that cursor, empty when the consumer is already caught up. A cursor
    /// that fell out of the window yields a snapshot again.
    pub fn get_delta(
        &self,
        consumer_id: Option<i64>,
        consumer_patch_id: Option<i64>,
    ) -> DeltaResult {
        let branches = self.filter.as_ref().map(|filter| filter.keys());
        let inner = self.inner.lock();

        if consumer_id != Some(self.id) {
            return self.snapshot_delta(inner.last_id(), branches);
        }

        let last = inner.last_id();
        if consumer_patch_id == last {
            return DeltaResult {
                id: self.id,
                branches,
                patch_id: last,
                body: DeltaBody::Patch(Vec::new()),
            };
        }
        if let Some(cursor) = consumer_patch_id {
            if let Some(pos) = inner.entries.iter().position(|entry| entry.id == cursor) {
                let patches = inner
                    .entries
                    .iter()
                    .skip(pos + 1)
                    .map(|entry| entry.patch.clone())
                    .collect();
                return DeltaResult {
                    id: self.id,
                    branches,
                    patch_id: last,
                    body: DeltaBody::Patch(patches),
                };
            }
        }

        tracing::debug!(
            cursor = ?consumer_patch_id,
            "patch cursor outside the retained window, serving snapshot"
        );
        self.snapshot_delta(last, branches)
    }

    // Called with the log inner lock held; safe because the tree document
    // lock is never held while anyone takes the log lock (lock order:
    // tree observers -> log inner -> tree doc). Keeping the lock pairs the
    // snapshot with the patch id it reflects.
    fn snapshot_delta(&self, patch_id: Option<i64>, branches: Option<Vec<String>>) -> DeltaResult {
        let snapshot = match &branches {
            Some(keys) => self.tree.snapshot_branches(keys),
            None => self.tree.snapshot(),
        };
        DeltaResult {
            id: self.id,
            branches,
            patch_id,
            body: DeltaBody::Snapshot(snapshot),
        }
    }
}

impl Drop for PatchLog {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.tree.unobserve(id);
        }
        self.inner.lock().entries.clear();
    }
}

fn record_patch(inner: &Arc<Mutex<LogInner>>, filter: Option<&BranchFilter>, raw: &Patch) {
    let patch = match filter {
        Some(filter) => {
            if !filter.matches(&raw.path) {
                return;
            }
            let mut patch = raw.clone();
            patch.path = filter.rewrite(&raw.path);
            patch
        }
        None => raw.clone(),
    };
    let mut guard = inner.lock();
    let id = guard.next_id();
    guard.entries.push_back(LogEntry {
        patch,
        id,
        recorded_at: Instant::now(),
    });
    schedule_prune(inner, &mut guard);
}

// One pending prune at a time; the deferred task re-arms only by a later
// record finding the flag cleared. Without a runtime the prune runs inline
// (not coalesced, still correct).
fn schedule_prune(inner: &Arc<Mutex<LogInner>>, guard: &mut LogInner) {
    if guard.prune_pending {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            guard.prune_pending = true;
            let weak = Arc::downgrade(inner);
            handle.spawn(async move {
                tokio::time::sleep(PRUNE_DEBOUNCE).await;
                if let Some(inner) = weak.upgrade() {
                    let mut guard = inner.lock();
                    guard.prune(Instant::now());
                    guard.prune_pending = false;
                }
            });
        }
        Err(_) => guard.prune(Instant::now()),
    }
}
