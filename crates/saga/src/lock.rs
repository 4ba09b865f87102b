//! Per-entity mutual exclusion for saga runs.

use std::time::Duration;

use common::{EntityId, LockToken, SagaId};
use saga_store::{EntityLockStore, StoreError};

use crate::error::{Result, SagaError};

/// Acquires, checks and releases entity locks with a bounded wait.
#[derive(Debug, Clone)]
pub struct LockGuard<L> {
    locks: L,
    timeout: Duration,
}

impl<L: EntityLockStore> LockGuard<L> {
    pub fn new(locks: L, timeout: Duration) -> Self {
        Self { locks, timeout }
    }

    /// Acquires the lock on `entity_id` for `saga_id`.
    ///
    /// A lock held by another saga, or an acquisition that does not finish
    /// within the timeout, is reported as `SagaAlreadyRunning`.
    pub async fn acquire(&self, entity_id: EntityId, saga_id: SagaId) -> Result<LockToken> {
        match tokio::time::timeout(self.timeout, self.locks.try_acquire(entity_id, saga_id)).await
        {
            Ok(Ok(token)) => {
                tracing::debug!(%entity_id, %saga_id, "entity lock acquired");
                Ok(token)
            }
            Ok(Err(StoreError::LockHeld { holder, .. })) => {
                tracing::info!(%entity_id, %saga_id, %holder, "entity lock denied");
                Err(SagaError::SagaAlreadyRunning { entity_id })
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!(%entity_id, %saga_id, timeout = ?self.timeout, "entity lock acquisition timed out");
                Err(SagaError::SagaAlreadyRunning { entity_id })
            }
        }
    }

    /// Returns true if `token` still owns the lock.
    ///
    /// A check that errors or times out counts as a lost lock.
    pub async fn is_held(&self, entity_id: EntityId, token: LockToken) -> bool {
        match tokio::time::timeout(self.timeout, self.locks.check(entity_id, token)).await {
            Ok(Ok(held)) => held,
            Ok(Err(e)) => {
                tracing::warn!(%entity_id, error = %e, "entity lock check failed");
                false
            }
            Err(_) => {
                tracing::warn!(%entity_id, "entity lock check timed out");
                false
            }
        }
    }

    /// Releases the lock. Failures are logged; an unreleased lock can be
    /// cleared with `force_release`.
    pub async fn release(&self, entity_id: EntityId, token: LockToken) {
        match tokio::time::timeout(self.timeout, self.locks.release(entity_id, token)).await {
            Ok(Ok(())) => tracing::debug!(%entity_id, "entity lock released"),
            Ok(Err(e)) => tracing::warn!(%entity_id, error = %e, "entity lock release failed"),
            Err(_) => tracing::warn!(%entity_id, "entity lock release timed out"),
        }
    }

    /// Clears the lock regardless of its owner.
    pub async fn force_release(&self, entity_id: EntityId) -> Result<()> {
        tracing::warn!(%entity_id, "forcing entity lock release");
        Ok(self.locks.force_release(entity_id).await?)
    }

    pub fn store(&self) -> &L {
        &self.locks
    }

    pub fn into_store(self) -> L {
        self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_store::InMemorySagaStore;

    fn guard() -> LockGuard<InMemorySagaStore> {
        LockGuard::new(InMemorySagaStore::new(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn second_saga_is_denied() {
        let guard = guard();
        let entity = EntityId::new();

        guard.acquire(entity, SagaId::new()).await.unwrap();
        let err = guard.acquire(entity, SagaId::new()).await.unwrap_err();
        assert!(matches!(err, SagaError::SagaAlreadyRunning { entity_id } if entity_id == entity));
    }

    #[tokio::test]
    async fn same_saga_reacquires_its_token() {
        let guard = guard();
        let entity = EntityId::new();
        let saga = SagaId::new();

        let first = guard.acquire(entity, saga).await.unwrap();
        let second = guard.acquire(entity, saga).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn release_and_force_release() {
        let guard = guard();
        let entity = EntityId::new();

        let token = guard.acquire(entity, SagaId::new()).await.unwrap();
        assert!(guard.is_held(entity, token).await);
        guard.release(entity, token).await;
        assert!(!guard.is_held(entity, token).await);

        let token = guard.acquire(entity, SagaId::new()).await.unwrap();
        guard.force_release(entity).await.unwrap();
        assert!(!guard.is_held(entity, token).await);
        assert!(guard.store().holder(entity).await.unwrap().is_none());
    }
}
