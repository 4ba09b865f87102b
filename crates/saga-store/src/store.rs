use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ETag, EntityId, LockToken, Result, SagaId, Snapshot, SnapshotQuery};

/// Persistence of saga checkpoints.
///
/// All implementations must be thread-safe (Send + Sync) because several
/// orchestrator tasks, and several orchestrator processes, share one store.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Saves a snapshot using optimistic concurrency.
    ///
    /// `snapshot.etag` is the ETag the writer expects to be persisted:
    /// `ETag::initial()` when the saga has never been written. If the stored
    /// ETag differs, the write fails with `ConcurrencyConflict` and the
    /// persisted snapshot is left unchanged.
    ///
    /// Returns the ETag now persisted.
    async fn save(&self, snapshot: Snapshot) -> Result<ETag>;

    /// Loads the latest snapshot of a saga.
    ///
    /// Fails with `SnapshotNotFound` if the saga was never persisted.
    async fn load(&self, saga_id: SagaId) -> Result<Snapshot>;

    /// Returns snapshots matching a query, oldest first.
    async fn query(&self, query: SnapshotQuery) -> Result<Vec<Snapshot>>;
}

/// A lock held on a business entity by one saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The locked entity.
    pub entity_id: EntityId,
    /// The saga owning the lock.
    pub saga_id: SagaId,
    /// Token proving ownership.
    pub token: LockToken,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Creates a fresh lock record for `saga_id` on `entity_id`.
    pub fn new(entity_id: EntityId, saga_id: SagaId) -> Self {
        Self {
            entity_id,
            saga_id,
            token: LockToken::new(),
            acquired_at: Utc::now(),
        }
    }
}

/// Shared per-entity lock state.
///
/// The lock must live in storage visible to every orchestrator process,
/// not in process memory, so that two processes can never drive sagas on
/// the same entity concurrently.
#[async_trait]
pub trait EntityLockStore: Send + Sync {
    /// Acquires the lock on `entity_id` for `saga_id`.
    ///
    /// Re-entrant for the same saga: if `saga_id` already holds the lock,
    /// its existing token is returned. Fails with `LockHeld` if another saga
    /// holds it.
    async fn try_acquire(&self, entity_id: EntityId, saga_id: SagaId) -> Result<LockToken>;

    /// Returns true if `token` still owns the lock on `entity_id`.
    async fn check(&self, entity_id: EntityId, token: LockToken) -> Result<bool>;

    /// Releases the lock if `token` still owns it. Releasing a lock that is
    /// no longer owned is a no-op.
    async fn release(&self, entity_id: EntityId, token: LockToken) -> Result<()>;

    /// Clears the lock regardless of its owner (administrative action).
    async fn force_release(&self, entity_id: EntityId) -> Result<()>;

    /// Returns the current lock on `entity_id`, if any.
    async fn holder(&self, entity_id: EntityId) -> Result<Option<LockRecord>>;
}
