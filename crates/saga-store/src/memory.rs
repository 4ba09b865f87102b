use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ETag, EntityId, LockToken, Result, SagaId, Snapshot, SnapshotQuery, StoreError,
    store::{EntityLockStore, LockRecord, SnapshotStore},
};

/// In-memory saga store for tests and single-process deployments.
///
/// Implements both [`SnapshotStore`] and [`EntityLockStore`] with the same
/// semantics as the PostgreSQL implementation. Clones share state, so one
/// clone can play the orchestrator's store while a test inspects another.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    snapshots: Arc<RwLock<HashMap<SagaId, Snapshot>>>,
    locks: Arc<RwLock<HashMap<EntityId, LockRecord>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of snapshots stored.
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Returns the number of accepted snapshot writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of locks currently held.
    pub async fn lock_count(&self) -> usize {
        self.locks.read().await.len()
    }

    /// Clears all snapshots and locks.
    pub async fn clear(&self) {
        self.snapshots.write().await.clear();
        self.locks.write().await.clear();
    }
}

#[async_trait]
impl SnapshotStore for InMemorySagaStore {
    async fn save(&self, snapshot: Snapshot) -> Result<ETag> {
        let mut snapshots = self.snapshots.write().await;

        let current = snapshots
            .get(&snapshot.saga_id)
            .map(|s| s.etag)
            .unwrap_or(ETag::initial());

        if current != snapshot.etag {
            return Err(StoreError::ConcurrencyConflict {
                saga_id: snapshot.saga_id,
                expected: snapshot.etag,
                actual: current,
            });
        }

        let next = current.next();
        let mut stored = snapshot;
        stored.etag = next;
        snapshots.insert(stored.saga_id, stored);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(next)
    }

    async fn load(&self, saga_id: SagaId) -> Result<Snapshot> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(&saga_id)
            .cloned()
            .ok_or(StoreError::SnapshotNotFound(saga_id))
    }

    async fn query(&self, query: SnapshotQuery) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        let mut matching: Vec<_> = snapshots
            .values()
            .filter(|s| query.matches(s.entity_id, s.terminal))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            a.taken_at
                .cmp(&b.taken_at)
                .then(a.saga_id.cmp(&b.saga_id))
        });

        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }

        Ok(matching)
    }
}

#[async_trait]
impl EntityLockStore for InMemorySagaStore {
    async fn try_acquire(&self, entity_id: EntityId, saga_id: SagaId) -> Result<LockToken> {
        let mut locks = self.locks.write().await;

        if let Some(existing) = locks.get(&entity_id) {
            if existing.saga_id == saga_id {
                return Ok(existing.token);
            }
            return Err(StoreError::LockHeld {
                entity_id,
                holder: existing.saga_id,
            });
        }

        let record = LockRecord::new(entity_id, saga_id);
        let token = record.token;
        locks.insert(entity_id, record);
        Ok(token)
    }

    async fn check(&self, entity_id: EntityId, token: LockToken) -> Result<bool> {
        let locks = self.locks.read().await;
        Ok(locks.get(&entity_id).is_some_and(|l| l.token == token))
    }

    async fn release(&self, entity_id: EntityId, token: LockToken) -> Result<()> {
        let mut locks = self.locks.write().await;
        if locks.get(&entity_id).is_some_and(|l| l.token == token) {
            locks.remove(&entity_id);
        }
        Ok(())
    }

    async fn force_release(&self, entity_id: EntityId) -> Result<()> {
        self.locks.write().await.remove(&entity_id);
        Ok(())
    }

    async fn holder(&self, entity_id: EntityId) -> Result<Option<LockRecord>> {
        Ok(self.locks.read().await.get(&entity_id).cloned())
    }
}
