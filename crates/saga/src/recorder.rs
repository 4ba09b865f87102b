//! Confirmed snapshot writes.

use std::time::Duration;

use common::SagaId;
use domain::SagaInstance;
use saga_store::{SnapshotStore, StoreError};

use crate::config::OrchestratorConfig;
use crate::error::{Result, SagaError};

/// Persists saga instances, retrying until a write is confirmed.
///
/// The orchestrator never advances past a transition whose snapshot has not
/// been confirmed by the store.
#[derive(Debug, Clone)]
pub struct SnapshotRecorder<S> {
    store: S,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl<S: SnapshotStore> SnapshotRecorder<S> {
    pub fn new(store: S, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            timeout: config.snapshot_timeout,
            attempts: config.snapshot_retry_attempts.max(1),
            backoff: config.snapshot_retry_backoff,
        }
    }

    /// Writes a snapshot of `saga` and records the new ETag on it.
    ///
    /// Timeouts and backend errors are retried with exponential backoff.
    /// A conflict aborts, unless it proves that an earlier attempt of this
    /// same write already landed.
    pub async fn persist(&self, saga: &mut SagaInstance) -> Result<()> {
        let snapshot = saga.to_snapshot()?;
        let expected = snapshot.etag;
        let saga_id = saga.id();
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.timeout, self.store.save(snapshot.clone())).await {
                Ok(Ok(etag)) => {
                    tracing::trace!(%saga_id, %etag, state = %saga.state(), "snapshot saved");
                    saga.record_etag(etag);
                    return Ok(());
                }
                Ok(Err(StoreError::ConcurrencyConflict { actual, .. })) => {
                    if attempt > 1
                        && actual == expected.next()
                        && self.landed(saga_id, &snapshot.state).await
                    {
                        tracing::debug!(%saga_id, %actual, "retried snapshot write had already landed");
                        saga.record_etag(actual);
                        return Ok(());
                    }
                    tracing::warn!(%saga_id, %expected, %actual, "snapshot write conflict");
                    return Err(SagaError::ConcurrencyConflict {
                        saga_id,
                        expected,
                        actual,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(%saga_id, attempt, error = %e, "snapshot write failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(%saga_id, attempt, "snapshot write timed out");
                    last_error = format!("timed out after {:?}", self.timeout);
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt - 1)).await;
            }
        }

        Err(SagaError::SnapshotWrite {
            saga_id,
            attempts: self.attempts,
            reason: last_error,
        })
    }

    /// Loads the latest persisted instance.
    pub async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let snapshot = self.store.load(saga_id).await.map_err(|e| match e {
            StoreError::SnapshotNotFound(id) => SagaError::SnapshotNotFound(id),
            other => other.into(),
        })?;
        Ok(SagaInstance::from_snapshot(snapshot)?)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    async fn landed(&self, saga_id: SagaId, state: &serde_json::Value) -> bool {
        matches!(self.store.load(saga_id).await, Ok(stored) if &stored.state == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::EntityId;
    use domain::{CommandTemplate, ExpectedResult, SagaConfig, StepDefinition};
    use saga_store::{ETag, InMemorySagaStore, Snapshot, SnapshotQuery};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Delays the first `slow_saves` saves past the recorder timeout, either
    /// before or after writing through to the inner store.
    #[derive(Clone)]
    struct SlowStore {
        inner: InMemorySagaStore,
        slow_saves: u32,
        write_before_stall: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl SnapshotStore for SlowStore {
        async fn save(&self, snapshot: Snapshot) -> saga_store::Result<ETag> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.slow_saves {
                if self.write_before_stall {
                    self.inner.save(snapshot.clone()).await?;
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.save(snapshot).await
        }

        async fn load(&self, saga_id: SagaId) -> saga_store::Result<Snapshot> {
            self.inner.load(saga_id).await
        }

        async fn query(&self, query: SnapshotQuery) -> saga_store::Result<Vec<Snapshot>> {
            self.inner.query(query).await
        }
    }

    fn slow(slow_saves: u32, write_before_stall: bool) -> SlowStore {
        SlowStore {
            inner: InMemorySagaStore::new(),
            slow_saves,
            write_before_stall,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            snapshot_timeout: Duration::from_millis(100),
            ..OrchestratorConfig::default()
        }
        .with_snapshot_retries(3, Duration::from_millis(10))
    }

    fn instance() -> SagaInstance {
        let config = SagaConfig::new("single", "Single step").with_step(StepDefinition::new(
            1,
            CommandTemplate::new("Ping", "exact", ExpectedResult::Absent),
        ));
        SagaInstance::from_config(SagaId::new(), &config, EntityId::new()).unwrap()
    }

    #[tokio::test]
    async fn persist_records_new_etag() {
        let recorder = SnapshotRecorder::new(InMemorySagaStore::new(), &config());
        let mut saga = instance();

        recorder.persist(&mut saga).await.unwrap();
        assert_eq!(saga.etag(), ETag::new(1));

        saga.start().unwrap();
        recorder.persist(&mut saga).await.unwrap();
        assert_eq!(saga.etag(), ETag::new(2));

        let loaded = recorder.load(saga.id()).await.unwrap();
        assert_eq!(loaded, saga);
    }

    #[tokio::test]
    async fn stale_instance_conflicts() {
        let recorder = SnapshotRecorder::new(InMemorySagaStore::new(), &config());
        let mut saga = instance();
        recorder.persist(&mut saga).await.unwrap();

        let mut stale = saga.clone();
        saga.start().unwrap();
        recorder.persist(&mut saga).await.unwrap();

        stale.start().unwrap();
        let err = recorder.persist(&mut stale).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::ConcurrencyConflict { expected, actual, .. }
                if expected == ETag::new(1) && actual == ETag::new(2)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_write_is_retried() {
        let store = slow(1, false);
        let recorder = SnapshotRecorder::new(store.clone(), &config());
        let mut saga = instance();

        recorder.persist(&mut saga).await.unwrap();
        assert_eq!(saga.etag(), ETag::new(1));
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recognizes_a_write_that_landed() {
        let store = slow(1, true);
        let recorder = SnapshotRecorder::new(store.clone(), &config());
        let mut saga = instance();

        recorder.persist(&mut saga).await.unwrap();
        assert_eq!(saga.etag(), ETag::new(1));
        assert_eq!(store.inner.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let store = slow(u32::MAX, false);
        let recorder = SnapshotRecorder::new(store.clone(), &config());
        let mut saga = instance();

        let err = recorder.persist(&mut saga).await.unwrap_err();
        assert!(matches!(err, SagaError::SnapshotWrite { attempts: 3, .. }));
        assert!(saga.etag().is_initial());
        assert_eq!(store.inner.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn load_missing_saga() {
        let recorder = SnapshotRecorder::new(InMemorySagaStore::new(), &config());
        let err = recorder.load(SagaId::new()).await.unwrap_err();
        assert!(matches!(err, SagaError::SnapshotNotFound(_)));
    }
}
