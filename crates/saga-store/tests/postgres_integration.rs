//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need a Docker daemon,
//! so they are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use saga_store::{
    ETag, EntityId, EntityLockStore, PostgresSagaStore, SagaConfigId, SagaId, Snapshot,
    SnapshotQuery, SnapshotStore, StoreError,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresSagaStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_snapshots, entity_locks")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

fn create_test_snapshot(saga_id: SagaId, entity_id: EntityId, etag: ETag) -> Snapshot {
    Snapshot::from_state(
        saga_id,
        entity_id,
        SagaConfigId::new("order-placement"),
        etag,
        false,
        &serde_json::json!({"current_step_index": etag.as_i64()}),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn save_and_load_snapshot() {
    let store = get_test_store().await;
    let saga_id = SagaId::new();
    let entity_id = EntityId::new();

    let etag = store
        .save(create_test_snapshot(saga_id, entity_id, ETag::initial()))
        .await
        .unwrap();
    assert_eq!(etag, ETag::new(1));

    let loaded = store.load(saga_id).await.unwrap();
    assert_eq!(loaded.saga_id, saga_id);
    assert_eq!(loaded.entity_id, entity_id);
    assert_eq!(loaded.etag, ETag::new(1));
    assert_eq!(loaded.config_id.as_str(), "order-placement");
    assert!(!loaded.terminal);
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn stale_etag_is_rejected() {
    let store = get_test_store().await;
    let saga_id = SagaId::new();
    let entity_id = EntityId::new();

    let first = store
        .save(create_test_snapshot(saga_id, entity_id, ETag::initial()))
        .await
        .unwrap();
    let second = store
        .save(create_test_snapshot(saga_id, entity_id, first))
        .await
        .unwrap();
    let before = store.load(saga_id).await.unwrap();

    let result = store
        .save(create_test_snapshot(saga_id, entity_id, first))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == second
    ));

    let after = store.load(saga_id).await.unwrap();
    assert_eq!(after.etag, before.etag);
    assert_eq!(after.state, before.state);
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn duplicate_create_is_rejected() {
    let store = get_test_store().await;
    let saga_id = SagaId::new();
    let entity_id = EntityId::new();

    store
        .save(create_test_snapshot(saga_id, entity_id, ETag::initial()))
        .await
        .unwrap();
    let result = store
        .save(create_test_snapshot(saga_id, entity_id, ETag::initial()))
        .await;

    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn load_missing_snapshot() {
    let store = get_test_store().await;
    let result = store.load(SagaId::new()).await;
    assert!(matches!(result, Err(StoreError::SnapshotNotFound(_))));
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn query_unfinished_snapshots() {
    let store = get_test_store().await;
    let entity_id = EntityId::new();
    let running = SagaId::new();
    let finished = SagaId::new();

    store
        .save(create_test_snapshot(running, entity_id, ETag::initial()))
        .await
        .unwrap();
    let mut done = create_test_snapshot(finished, EntityId::new(), ETag::initial());
    done.terminal = true;
    store.save(done).await.unwrap();

    let unfinished = store.query(SnapshotQuery::unfinished()).await.unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].saga_id, running);

    let by_entity = store
        .query(SnapshotQuery::new().entity_id(entity_id))
        .await
        .unwrap();
    assert_eq!(by_entity.len(), 1);

    let limited = store.query(SnapshotQuery::new().limit(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn entity_lock_lifecycle() {
    let store = get_test_store().await;
    let entity_id = EntityId::new();
    let owner = SagaId::new();
    let intruder = SagaId::new();

    let token = store.try_acquire(entity_id, owner).await.unwrap();
    assert!(store.check(entity_id, token).await.unwrap());

    // Re-entrant for the owning saga.
    assert_eq!(store.try_acquire(entity_id, owner).await.unwrap(), token);

    let denied = store.try_acquire(entity_id, intruder).await;
    assert!(matches!(
        denied,
        Err(StoreError::LockHeld { holder, .. }) if holder == owner
    ));

    let holder = store.holder(entity_id).await.unwrap().unwrap();
    assert_eq!(holder.saga_id, owner);

    store.release(entity_id, token).await.unwrap();
    assert!(store.holder(entity_id).await.unwrap().is_none());

    let token = store.try_acquire(entity_id, intruder).await.unwrap();
    store.force_release(entity_id).await.unwrap();
    assert!(!store.check(entity_id, token).await.unwrap());
}
