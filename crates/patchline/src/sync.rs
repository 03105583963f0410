//! Consumer-side sync driver.
//!
//! [`Syncer`] owns a replica tree and its session cursor, and drives
//! fetch-then-apply cycles against a [`DeltaSource`]. At most one cycle runs
//! at a time per session: a `sync()` call that arrives while another is in
//! flight waits behind the gate and, once a cycle has completed in the
//! meantime, returns without issuing a duplicate request, so both callers
//! converge on the same settled outcome.
//!
//! When an apply fails with the session-consistency kind, the syncer retries
//! exactly once: the reconciler has already reset the session, so the retry
//! fetch presents an unrecognized id and comes back as a snapshot. Every
//! remaining failure (transport, apply, the retry itself) is logged and
//! swallowed; the UI keeps rendering the last good replica state until the
//! next scheduled cycle succeeds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use patchline_tree::StateTree;
use thiserror::Error;

use crate::delta::{DeltaResult, Session};
use crate::patch_log::PatchLog;
use crate::reconcile::{apply_delta, ApplyError};

/// Opaque transport failure. The core neither inspects nor recovers it;
/// timeouts and rejections all surface here.
#[derive(Debug, Error)]
#[error("transport: {0}")]
pub struct TransportError(pub String);

/// The RPC boundary to a producer's patch log.
#[async_trait]
pub trait DeltaSource: Send + Sync {
    async fn get_delta(
        &self,
        consumer_id: Option<i64>,
        consumer_patch_id: Option<i64>,
    ) -> Result<DeltaResult, TransportError>;
}

/// In-process delta source, for consumers living beside the producer.
pub struct LocalDeltaSource {
    log: Arc<PatchLog>,
}

impl LocalDeltaSource {
    pub fn new(log: Arc<PatchLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl DeltaSource for LocalDeltaSource {
    async fn get_delta(
        &self,
        consumer_id: Option<i64>,
        consumer_patch_id: Option<i64>,
    ) -> Result<DeltaResult, TransportError> {
        Ok(self.log.get_delta(consumer_id, consumer_patch_id))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Drives a replica tree against one producer session.
pub struct Syncer {
    source: Arc<dyn DeltaSource>,
    tree: StateTree,
    session: tokio::sync::Mutex<Session>,
    generation: AtomicU64,
    alive: AtomicBool,
}

impl Syncer {
    pub fn new(source: Arc<dyn DeltaSource>, tree: StateTree) -> Self {
        Self {
            source,
            tree,
            session: tokio::sync::Mutex::new(Session::default()),
            generation: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        }
    }

    /// The replica this syncer reconciles into.
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Current session cursor (test and diagnostics surface).
    pub async fn session(&self) -> Session {
        *self.session.lock().await
    }

    /// Marks the owning replica context as torn down: in-flight results are
    /// dropped instead of applied, and later cycles fetch but skip the apply.
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Runs one sync cycle. Failures are terminal here: logged, swallowed.
    pub async fn sync(&self) {
        let generation = self.generation.load(Ordering::Acquire);
        let mut session = self.session.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            // A cycle completed while this call waited at the gate; its
            // outcome is ours.
            tracing::debug!("sync call coalesced with a completed cycle");
            return;
        }
        if let Err(err) = self.cycle(&mut session).await {
            tracing::warn!(error = %err, "sync cycle failed, keeping last good replica state");
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    async fn cycle(&self, session: &mut Session) -> Result<(), SyncError> {
        match self.attempt(session).await {
            Err(SyncError::Apply(err)) if err.is_desync() => {
                // The session was reset by the failed apply; the refetch
                // presents an unrecognized id and yields a snapshot.
                tracing::debug!("session desynchronized, refetching as snapshot");
                self.attempt(session).await
            }
            result => result,
        }
    }

    async fn attempt(&self, session: &mut Session) -> Result<(), SyncError> {
        let delta = self
            .source
            .get_delta(session.id, session.patch_id)
            .await?;
        if !self.alive.load(Ordering::Acquire) {
            return Ok(());
        }
        apply_delta(&self.tree, session, &delta)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaBody;
    use parking_lot::Mutex;
    use patchline_tree::Patch;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Replays a scripted sequence of responses and counts calls.
    struct ScriptedSource {
        responses: Mutex<Vec<Result<DeltaResult, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<DeltaResult, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl DeltaSource for ScriptedSource {
        async fn get_delta(
            &self,
            _consumer_id: Option<i64>,
            _consumer_patch_id: Option<i64>,
        ) -> Result<DeltaResult, TransportError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(TransportError("script exhausted".to_string()));
            }
            responses.remove(0)
        }
    }

    /// Delegates to a local patch log after a short delay, so concurrent
    /// callers genuinely overlap.
    struct SlowLocalSource {
        inner: LocalDeltaSource,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeltaSource for SlowLocalSource {
        async fn get_delta(
            &self,
            consumer_id: Option<i64>,
            consumer_patch_id: Option<i64>,
        ) -> Result<DeltaResult, TransportError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inner.get_delta(consumer_id, consumer_patch_id).await
        }
    }

    fn snapshot_delta(id: i64, patch_id: Option<i64>) -> DeltaResult {
        DeltaResult {
            id,
            branches: None,
            patch_id,
            body: DeltaBody::Snapshot(json!({"a": 1})),
        }
    }

    #[tokio::test]
    async fn first_sync_adopts_the_producer_snapshot() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot_delta(7, Some(3)))]));
        let syncer = Syncer::new(source.clone(), StateTree::default());

        syncer.sync().await;

        assert_eq!(syncer.tree().snapshot(), json!({"a": 1}));
        assert_eq!(
            syncer.session().await,
            Session {
                id: Some(7),
                patch_id: Some(3)
            }
        );
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn desync_triggers_exactly_one_corrective_refetch() {
        // First response claims a foreign session via a patch delta; the
        // apply fails with the consistency kind and the retry snapshot heals.
        let stale_patch = DeltaResult {
            id: 9,
            branches: None,
            patch_id: Some(5),
            body: DeltaBody::Patch(vec![Patch::add("/x", json!(1))]),
        };
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(stale_patch),
            Ok(snapshot_delta(9, Some(5))),
        ]));
        let syncer = Syncer::new(source.clone(), StateTree::default());

        syncer.sync().await;

        assert_eq!(source.calls(), 2);
        assert_eq!(syncer.tree().snapshot(), json!({"a": 1}));
        assert_eq!(syncer.session().await.id, Some(9));
    }

    #[tokio::test]
    async fn repeated_desync_gives_up_after_one_retry() {
        let stale = || DeltaResult {
            id: 9,
            branches: None,
            patch_id: Some(5),
            body: DeltaBody::Patch(vec![Patch::add("/x", json!(1))]),
        };
        let source = Arc::new(ScriptedSource::new(vec![Ok(stale()), Ok(stale())]));
        let syncer = Syncer::new(source.clone(), StateTree::default());

        syncer.sync().await;

        assert_eq!(source.calls(), 2, "exactly one corrective retry");
        assert_eq!(syncer.session().await, Session::default());
        assert_eq!(syncer.tree().snapshot(), json!({}));
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed() {
        let source = Arc::new(ScriptedSource::new(vec![Err(TransportError(
            "port closed".to_string(),
        ))]));
        let syncer = Syncer::new(source.clone(), StateTree::default());

        syncer.sync().await;

        assert_eq!(source.calls(), 1, "no retry for transport failures");
        assert_eq!(syncer.session().await, Session::default());
    }

    #[tokio::test]
    async fn non_desync_apply_failure_is_not_retried() {
        let broken = DeltaResult {
            id: 7,
            branches: None,
            patch_id: Some(2),
            body: DeltaBody::Patch(vec![Patch::remove("/missing", None)]),
        };
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snapshot_delta(7, Some(1))),
            Ok(broken),
        ]));
        let syncer = Syncer::new(source.clone(), StateTree::default());

        syncer.sync().await;
        syncer.sync().await;

        assert_eq!(source.calls(), 2);
        // The failed apply reset the session; the next natural cycle heals.
        assert_eq!(syncer.session().await, Session::default());
    }

    #[tokio::test]
    async fn shutdown_skips_applying_fetched_deltas() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot_delta(7, Some(3)))]));
        let syncer = Syncer::new(source.clone(), StateTree::default());

        syncer.shutdown();
        syncer.sync().await;

        assert_eq!(source.calls(), 1);
        assert_eq!(syncer.tree().snapshot(), json!({}));
        assert_eq!(syncer.session().await, Session::default());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sync_calls_coalesce() {
        let tree = StateTree::new(json!({"a": 1}));
        let log = Arc::new(PatchLog::new(tree, None));
        let source = Arc::new(SlowLocalSource {
            inner: LocalDeltaSource::new(log),
            calls: AtomicUsize::new(0),
        });
        let syncer = Arc::new(Syncer::new(source.clone(), StateTree::default()));

        tokio::join!(syncer.sync(), syncer.sync());

        assert_eq!(
            source.calls.load(Ordering::Relaxed),
            1,
            "second caller must converge on the first cycle's outcome"
        );
        assert_eq!(syncer.tree().snapshot(), json!({"a": 1}));
    }
}
