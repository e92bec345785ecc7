//! Sync engine
//!
//! Replays the pending mutation queue against the remote document store in
//! insertion order. One drain runs at a time; a second trigger arriving
//! mid-drain is dropped, not queued, and the next enqueue or reconnect picks
//! up anything missed. The first failure aborts the whole batch and leaves
//! the entire queue intact, so a later drain replays from the start. That
//! replay is safe because every remote operation is idempotent by id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::backend::RemoteBackend;
use crate::config::Config;
use crate::error::StoreError;
use crate::sync::connectivity::NetworkSource;
use crate::sync::queue::{Mutation, MutationKind, MutationQueue};

/// Tuning for drain behavior
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Per-request timeout for one backend call
    pub request_timeout: std::time::Duration,
    /// Attempts per mutation before the drain gives up (minimum 1)
    pub max_attempts: u32,
    /// Delay between attempts on the same mutation
    pub retry_delay: std::time::Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: std::time::Duration::from_secs(10),
            max_attempts: 3,
            retry_delay: std::time::Duration::from_millis(500),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }
}

/// What a drain call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Device is offline, nothing attempted
    Offline,
    /// Another drain is already running
    Busy,
    /// Queue was empty
    Empty,
    /// Every pending mutation was applied and the queue cleared
    Completed { applied: usize },
}

/// Replays queued mutations against the remote store
pub struct SyncEngine {
    queue: MutationQueue,
    backend: Arc<dyn RemoteBackend>,
    network: Arc<dyn NetworkSource>,
    options: SyncOptions,
    draining: AtomicBool,
}

/// Releases the single-flight flag on every exit path out of a drain
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(
        queue: MutationQueue,
        backend: Arc<dyn RemoteBackend>,
        network: Arc<dyn NetworkSource>,
        options: SyncOptions,
    ) -> Self {
        Self {
            queue,
            backend,
            network,
            options,
            draining: AtomicBool::new(false),
        }
    }

    pub fn network(&self) -> &Arc<dyn NetworkSource> {
        &self.network
    }

    /// Validate and append a mutation to the durable queue.
    ///
    /// The caller has already written the local record store, so a failure
    /// here means that write will never reach the remote store. It is logged
    /// loudly and propagated.
    pub fn enqueue(&self, mutation: Mutation) -> Result<(), StoreError> {
        if let Err(e) = self.queue.enqueue(mutation) {
            warn!(error = %e, "Failed to enqueue mutation; local write will not sync");
            return Err(e);
        }
        Ok(())
    }

    /// UI-facing entry point: enqueue, then kick a best-effort background
    /// drain if the device reports itself online. Drain failures stay in the
    /// logs; they are never surfaced to the caller.
    pub fn submit(self: &Arc<Self>, mutation: Mutation) -> Result<(), StoreError> {
        self.enqueue(mutation)?;

        if self.network.is_online() {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = engine.drain().await {
                    warn!(error = %e, "Background sync failed, queue left intact");
                }
            });
        }
        Ok(())
    }

    /// Number of mutations waiting to sync
    pub fn pending(&self) -> Result<usize, StoreError> {
        self.queue.pending()
    }

    /// Replay the whole queue in order.
    ///
    /// No-op when offline or when another drain is in flight. On the first
    /// failure the replay stops, the queue keeps all of its entries
    /// (including the ones already applied this round), and the error goes to
    /// the caller. A fully successful pass removes exactly the entries it
    /// replayed; mutations enqueued while the drain was in flight stay
    /// queued for the next one.
    pub async fn drain(&self) -> Result<DrainOutcome, StoreError> {
        if !self.network.is_online() {
            return Ok(DrainOutcome::Offline);
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(DrainOutcome::Busy);
        }
        let _guard = DrainGuard(&self.draining);

        let pending = self.queue.load()?;
        if pending.is_empty() {
            return Ok(DrainOutcome::Empty);
        }

        info!(pending = pending.len(), "Draining sync queue");
        for (index, mutation) in pending.iter().enumerate() {
            if let Err(e) = self.apply_with_retry(mutation).await {
                warn!(
                    index,
                    kind = ?mutation.kind,
                    collection = %mutation.collection,
                    id = %mutation.entity_id,
                    error = %e,
                    "Sync halted, queue left intact"
                );
                return Err(e);
            }
        }

        // Shrink past the drained snapshot only: a mutation enqueued while a
        // backend call was suspended is not applied yet and must survive
        let remaining = self.queue.remove_prefix(pending.len())?;
        info!(applied = pending.len(), remaining, "Sync queue drained");
        Ok(DrainOutcome::Completed {
            applied: pending.len(),
        })
    }

    async fn apply_with_retry(&self, mutation: &Mutation) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.options.request_timeout, self.apply(mutation)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(format!(
                    "{:?} {}/{} took longer than {:?}",
                    mutation.kind,
                    mutation.collection,
                    mutation.entity_id,
                    self.options.request_timeout
                ))),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.options.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.options.max_attempts,
                        error = %e,
                        "Backend call failed, retrying"
                    );
                    sleep(self.options.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply(&self, mutation: &Mutation) -> Result<(), StoreError> {
        // Entries persisted before id validation moved to the enqueue
        // boundary may still be malformed; refuse them rather than write a
        // broken document remotely.
        if mutation.entity_id.trim().is_empty() {
            return Err(StoreError::MissingIdentifier(format!(
                "{:?} mutation for {} has no usable id",
                mutation.kind, mutation.collection
            )));
        }

        match mutation.kind {
            MutationKind::Create => {
                let fields = mutation.fields.as_ref().ok_or_else(|| {
                    StoreError::InvalidMutation(format!(
                        "create mutation for {}/{} carries no fields",
                        mutation.collection, mutation.entity_id
                    ))
                })?;
                self.backend
                    .put(mutation.collection, &mutation.entity_id, fields, false)
                    .await
            }
            MutationKind::Update => {
                let fields = mutation.fields.as_ref().ok_or_else(|| {
                    StoreError::InvalidMutation(format!(
                        "update mutation for {}/{} carries no fields",
                        mutation.collection, mutation.entity_id
                    ))
                })?;
                self.backend
                    .put(mutation.collection, &mutation.entity_id, fields, true)
                    .await
            }
            MutationKind::Delete => {
                self.backend
                    .delete(mutation.collection, &mutation.entity_id)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteDocument;
    use crate::records::Collection;
    use crate::sync::connectivity::NetworkState;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Applied {
        Put {
            collection: Collection,
            id: String,
            merge: bool,
            fields: Map<String, Value>,
        },
        Delete {
            collection: Collection,
            id: String,
        },
    }

    /// Backend double that records applied operations in call order and can
    /// inject failures per call index.
    #[derive(Default)]
    struct RecordingBackend {
        applied: Mutex<Vec<Applied>>,
        calls: AtomicUsize,
        unavailable_calls: Mutex<HashSet<usize>>,
        rejected_calls: Mutex<HashSet<usize>>,
        delay: Option<Duration>,
    }

    impl RecordingBackend {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn fail_unavailable(&self, calls: impl IntoIterator<Item = usize>) {
            self.unavailable_calls.lock().unwrap().extend(calls);
        }

        fn fail_rejected(&self, calls: impl IntoIterator<Item = usize>) {
            self.rejected_calls.lock().unwrap().extend(calls);
        }

        fn clear_failures(&self) {
            self.unavailable_calls.lock().unwrap().clear();
            self.rejected_calls.lock().unwrap().clear();
        }

        fn applied(&self) -> Vec<Applied> {
            self.applied.lock().unwrap().clone()
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn invoke(&self, op: Applied) -> Result<(), StoreError> {
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }

            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable_calls.lock().unwrap().contains(&call) {
                return Err(StoreError::BackendUnavailable("injected outage".into()));
            }
            if self.rejected_calls.lock().unwrap().contains(&call) {
                return Err(StoreError::Rejected {
                    status: 400,
                    message: "injected rejection".into(),
                });
            }

            self.applied.lock().unwrap().push(op);
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteBackend for RecordingBackend {
        async fn put(
            &self,
            collection: Collection,
            id: &str,
            fields: &Map<String, Value>,
            merge: bool,
        ) -> Result<(), StoreError> {
            self.invoke(Applied::Put {
                collection,
                id: id.to_string(),
                merge,
                fields: fields.clone(),
            })
            .await
        }

        async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
            self.invoke(Applied::Delete {
                collection,
                id: id.to_string(),
            })
            .await
        }

        async fn fetch_all(
            &self,
            _collection: Collection,
        ) -> Result<Vec<RemoteDocument>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fast_options() -> SyncOptions {
        SyncOptions {
            request_timeout: Duration::from_secs(5),
            max_attempts: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn engine(
        dir: &TempDir,
        backend: Arc<RecordingBackend>,
        network: Arc<NetworkState>,
        options: SyncOptions,
    ) -> Arc<SyncEngine> {
        let queue = MutationQueue::open(dir.path().join("sync.sled")).unwrap();
        Arc::new(SyncEngine::new(queue, backend, network, options))
    }

    #[tokio::test]
    async fn offline_enqueue_then_online_drain_preserves_order() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let network = Arc::new(NetworkState::new(false));
        let engine = engine(&dir, backend.clone(), network.clone(), fast_options());

        let pole = fields(&[("brand", json!("X")), ("length", json!(156))]);
        engine
            .enqueue(Mutation::create(Collection::Poles, "p1", pole.clone()))
            .unwrap();
        engine
            .enqueue(Mutation::delete(Collection::Poles, "p1"))
            .unwrap();

        // Offline: nothing happens, queue holds both
        assert_eq!(engine.drain().await.unwrap(), DrainOutcome::Offline);
        assert!(backend.applied().is_empty());
        assert_eq!(engine.pending().unwrap(), 2);

        network.set_online(true);
        assert_eq!(
            engine.drain().await.unwrap(),
            DrainOutcome::Completed { applied: 2 }
        );

        assert_eq!(
            backend.applied(),
            vec![
                Applied::Put {
                    collection: Collection::Poles,
                    id: "p1".into(),
                    merge: false,
                    fields: pole,
                },
                Applied::Delete {
                    collection: Collection::Poles,
                    id: "p1".into(),
                },
            ]
        );

        // Idempotent clear: queue is empty and a second drain is a no-op
        assert_eq!(engine.pending().unwrap(), 0);
        assert_eq!(engine.drain().await.unwrap(), DrainOutcome::Empty);
        assert_eq!(backend.applied().len(), 2);
    }

    #[tokio::test]
    async fn update_uses_merge_write() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let network = Arc::new(NetworkState::new(true));
        let engine = engine(&dir, backend.clone(), network, fast_options());

        engine
            .enqueue(Mutation::update(
                Collection::Athletes,
                "a1",
                fields(&[("grade", json!(11))]),
            ))
            .unwrap();
        engine.drain().await.unwrap();

        match &backend.applied()[0] {
            Applied::Put { merge, fields, .. } => {
                assert!(*merge);
                assert_eq!(fields.len(), 1);
                assert_eq!(fields["grade"], json!(11));
            }
            other => panic!("expected merge put, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_failure_keeps_entire_queue() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        backend.fail_rejected([1]);
        let network = Arc::new(NetworkState::new(true));
        let engine = engine(&dir, backend.clone(), network, fast_options());

        for id in ["m1", "m2", "m3"] {
            engine
                .enqueue(Mutation::create(
                    Collection::Meets,
                    id,
                    fields(&[("name", json!("Sectionals"))]),
                ))
                .unwrap();
        }

        let err = engine.drain().await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));

        // Nothing was dropped, including the already-applied first entry
        assert_eq!(engine.pending().unwrap(), 3);
        assert_eq!(backend.applied().len(), 1);

        // A later drain replays all three from the start
        backend.clear_failures();
        assert_eq!(
            engine.drain().await.unwrap(),
            DrainOutcome::Completed { applied: 3 }
        );
        assert_eq!(engine.pending().unwrap(), 0);

        let applied = backend.applied();
        let ids: Vec<&str> = applied
            .iter()
            .map(|op| match op {
                Applied::Put { id, .. } => id.as_str(),
                Applied::Delete { id, .. } => id.as_str(),
            })
            .collect();
        assert_eq!(ids, vec!["m1", "m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn concurrent_drain_is_dropped() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::with_delay(Duration::from_millis(50)));
        let network = Arc::new(NetworkState::new(true));
        let engine = engine(&dir, backend.clone(), network, fast_options());

        engine
            .enqueue(Mutation::delete(Collection::Attempts, "t1"))
            .unwrap();

        let first = engine.clone();
        let second = engine.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.drain().await.unwrap() }),
            async move {
                // Give the first drain time to take the flag
                sleep(Duration::from_millis(10)).await;
                second.drain().await.unwrap()
            }
        );

        assert_eq!(a.unwrap(), DrainOutcome::Completed { applied: 1 });
        assert_eq!(b, DrainOutcome::Busy);
        assert_eq!(backend.applied().len(), 1);
    }

    #[tokio::test]
    async fn mutation_enqueued_mid_drain_survives() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::with_delay(Duration::from_millis(80)));
        let network = Arc::new(NetworkState::new(true));
        let engine = engine(&dir, backend.clone(), network, fast_options());

        engine
            .enqueue(Mutation::delete(Collection::Poles, "p1"))
            .unwrap();

        let drainer = engine.clone();
        let drain = tokio::spawn(async move { drainer.drain().await.unwrap() });

        // Let the drain take its snapshot and suspend in the backend call,
        // then enqueue behind its back
        sleep(Duration::from_millis(20)).await;
        engine
            .enqueue(Mutation::delete(Collection::Poles, "p2"))
            .unwrap();

        assert_eq!(
            drain.await.unwrap(),
            DrainOutcome::Completed { applied: 1 }
        );

        // The late mutation was not applied, so it must still be queued
        assert_eq!(backend.applied().len(), 1);
        assert_eq!(engine.pending().unwrap(), 1);

        assert_eq!(
            engine.drain().await.unwrap(),
            DrainOutcome::Completed { applied: 1 }
        );
        assert_eq!(engine.pending().unwrap(), 0);

        let applied = backend.applied();
        let ids: Vec<&str> = applied
            .iter()
            .map(|op| match op {
                Applied::Put { id, .. } => id.as_str(),
                Applied::Delete { id, .. } => id.as_str(),
            })
            .collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn legacy_entry_without_id_halts_drain() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let network = Arc::new(NetworkState::new(true));

        let queue = MutationQueue::open(dir.path().join("sync.sled")).unwrap();
        // Write directly past enqueue validation, as an old persisted queue
        // from before the boundary check would look
        queue
            .replace(&[
                Mutation::delete(Collection::Poles, "p1"),
                Mutation {
                    kind: MutationKind::Delete,
                    collection: Collection::Poles,
                    entity_id: String::new(),
                    fields: None,
                },
                Mutation::delete(Collection::Poles, "p3"),
            ])
            .unwrap();

        let engine = Arc::new(SyncEngine::new(
            queue,
            backend.clone(),
            network,
            fast_options(),
        ));
        let err = engine.drain().await.unwrap_err();
        assert!(matches!(err, StoreError::MissingIdentifier(_)));

        // The malformed entry and everything after it are still queued
        assert_eq!(engine.pending().unwrap(), 3);
        assert_eq!(backend.applied().len(), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_within_bounds() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        backend.fail_unavailable([0, 1]);
        let network = Arc::new(NetworkState::new(true));
        let options = SyncOptions {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
            ..fast_options()
        };
        let engine = engine(&dir, backend.clone(), network, options);

        engine
            .enqueue(Mutation::delete(Collection::Poles, "p1"))
            .unwrap();

        assert_eq!(
            engine.drain().await.unwrap(),
            DrainOutcome::Completed { applied: 1 }
        );
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.applied().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_queue_intact() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        backend.fail_unavailable([0, 1, 2]);
        let network = Arc::new(NetworkState::new(true));
        let options = SyncOptions {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
            ..fast_options()
        };
        let engine = engine(&dir, backend.clone(), network, options);

        engine
            .enqueue(Mutation::delete(Collection::Poles, "p1"))
            .unwrap();

        let err = engine.drain().await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
        assert_eq!(engine.pending().unwrap(), 1);
    }

    #[tokio::test]
    async fn slow_backend_call_times_out() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::with_delay(Duration::from_millis(100)));
        let network = Arc::new(NetworkState::new(true));
        let options = SyncOptions {
            request_timeout: Duration::from_millis(10),
            max_attempts: 1,
            retry_delay: Duration::from_millis(1),
        };
        let engine = engine(&dir, backend.clone(), network, options);

        engine
            .enqueue(Mutation::delete(Collection::Poles, "p1"))
            .unwrap();

        let err = engine.drain().await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
        assert_eq!(engine.pending().unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_kicks_background_drain_when_online() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let network = Arc::new(NetworkState::new(true));
        let engine = engine(&dir, backend.clone(), network, fast_options());

        engine
            .submit(Mutation::delete(Collection::Poles, "p1"))
            .unwrap();

        for _ in 0..100 {
            if engine.pending().unwrap() == 0 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.pending().unwrap(), 0);
        assert_eq!(backend.applied().len(), 1);
    }
}
