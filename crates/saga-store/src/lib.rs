//! Persistence contracts for the saga orchestrator.
//!
//! Two pieces of shared, externally visible state back every orchestrator
//! process:
//! - saga snapshots, versioned by an [`ETag`] for optimistic concurrency
//! - entity locks, guaranteeing one active saga per business entity
//!
//! Both are expressed as traits ([`SnapshotStore`], [`EntityLockStore`])
//! with an in-memory and a PostgreSQL implementation.

pub mod error;
pub mod etag;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::{EntityId, LockToken, SagaConfigId, SagaId};
pub use error::{Result, StoreError};
pub use etag::ETag;
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use query::SnapshotQuery;
pub use snapshot::Snapshot;
pub use store::{EntityLockStore, LockRecord, SnapshotStore};
