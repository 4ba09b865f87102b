use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ETag, EntityId, LockToken, Result, SagaConfigId, SagaId, Snapshot, SnapshotQuery, StoreError,
    store::{EntityLockStore, LockRecord, SnapshotStore},
};

/// PostgreSQL-backed saga store.
///
/// Snapshots live in `saga_snapshots`, entity locks in `entity_locks`
/// (see `migrations/`). Every orchestrator process pointing at the same
/// database shares lock and snapshot state.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_snapshot(row: PgRow) -> Result<Snapshot> {
        Ok(Snapshot {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            entity_id: EntityId::from_uuid(row.try_get::<Uuid, _>("entity_id")?),
            config_id: SagaConfigId::new(row.try_get::<String, _>("config_id")?),
            etag: ETag::new(row.try_get("etag")?),
            terminal: row.try_get("terminal")?,
            taken_at: row.try_get::<DateTime<Utc>, _>("taken_at")?,
            state: row.try_get("state")?,
        })
    }

    fn row_to_lock(row: PgRow) -> Result<LockRecord> {
        Ok(LockRecord {
            entity_id: EntityId::from_uuid(row.try_get::<Uuid, _>("entity_id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            token: LockToken::from_uuid(row.try_get::<Uuid, _>("token")?),
            acquired_at: row.try_get::<DateTime<Utc>, _>("acquired_at")?,
        })
    }

    async fn current_etag(&self, saga_id: SagaId) -> Result<ETag> {
        let etag: Option<i64> =
            sqlx::query_scalar("SELECT etag FROM saga_snapshots WHERE saga_id = $1")
                .bind(saga_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(etag.map(ETag::new).unwrap_or(ETag::initial()))
    }
}

#[async_trait]
impl SnapshotStore for PostgresSagaStore {
    async fn save(&self, snapshot: Snapshot) -> Result<ETag> {
        let expected = snapshot.etag;
        let next = expected.next();

        let result = if expected.is_initial() {
            sqlx::query(
                r#"
                INSERT INTO saga_snapshots (saga_id, entity_id, config_id, etag, terminal, taken_at, state)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (saga_id) DO NOTHING
                "#,
            )
            .bind(snapshot.saga_id.as_uuid())
            .bind(snapshot.entity_id.as_uuid())
            .bind(snapshot.config_id.as_str())
            .bind(next.as_i64())
            .bind(snapshot.terminal)
            .bind(snapshot.taken_at)
            .bind(&snapshot.state)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE saga_snapshots
                SET etag = $3, terminal = $4, taken_at = $5, state = $6
                WHERE saga_id = $1 AND etag = $2
                "#,
            )
            .bind(snapshot.saga_id.as_uuid())
            .bind(expected.as_i64())
            .bind(next.as_i64())
            .bind(snapshot.terminal)
            .bind(snapshot.taken_at)
            .bind(&snapshot.state)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self.current_etag(snapshot.saga_id).await?;
            tracing::debug!(
                saga_id = %snapshot.saga_id,
                %expected,
                %actual,
                "snapshot write rejected"
            );
            return Err(StoreError::ConcurrencyConflict {
                saga_id: snapshot.saga_id,
                expected,
                actual,
            });
        }

        Ok(next)
    }

    async fn load(&self, saga_id: SagaId) -> Result<Snapshot> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT saga_id, entity_id, config_id, etag, terminal, taken_at, state
            FROM saga_snapshots
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_snapshot(row),
            None => Err(StoreError::SnapshotNotFound(saga_id)),
        }
    }

    async fn query(&self, query: SnapshotQuery) -> Result<Vec<Snapshot>> {
        let mut sql = String::from(
            "SELECT saga_id, entity_id, config_id, etag, terminal, taken_at, state FROM saga_snapshots WHERE 1=1",
        );
        let mut param_count = 0;

        if query.entity_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND entity_id = ${param_count}"));
        }
        if query.unfinished_only {
            sql.push_str(" AND NOT terminal");
        }

        sql.push_str(" ORDER BY taken_at ASC, saga_id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.entity_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_snapshot).collect()
    }
}

#[async_trait]
impl EntityLockStore for PostgresSagaStore {
    async fn try_acquire(&self, entity_id: EntityId, saga_id: SagaId) -> Result<LockToken> {
        // The existing lock can disappear between the insert and the lookup;
        // one retry covers that window.
        for _ in 0..2 {
            let record = LockRecord::new(entity_id, saga_id);
            let inserted: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO entity_locks (entity_id, saga_id, token, acquired_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (entity_id) DO NOTHING
                RETURNING token
                "#,
            )
            .bind(entity_id.as_uuid())
            .bind(saga_id.as_uuid())
            .bind(record.token.as_uuid())
            .bind(record.acquired_at)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(token) = inserted {
                return Ok(LockToken::from_uuid(token));
            }

            if let Some(existing) = self.holder(entity_id).await? {
                if existing.saga_id == saga_id {
                    return Ok(existing.token);
                }
                return Err(StoreError::LockHeld {
                    entity_id,
                    holder: existing.saga_id,
                });
            }
        }

        let holder = self
            .holder(entity_id)
            .await?
            .map(|l| l.saga_id)
            .unwrap_or(saga_id);
        Err(StoreError::LockHeld { entity_id, holder })
    }

    async fn check(&self, entity_id: EntityId, token: LockToken) -> Result<bool> {
        let owned: Option<bool> = sqlx::query_scalar(
            "SELECT token = $2 FROM entity_locks WHERE entity_id = $1",
        )
        .bind(entity_id.as_uuid())
        .bind(token.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(owned.unwrap_or(false))
    }

    async fn release(&self, entity_id: EntityId, token: LockToken) -> Result<()> {
        sqlx::query("DELETE FROM entity_locks WHERE entity_id = $1 AND token = $2")
            .bind(entity_id.as_uuid())
            .bind(token.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn force_release(&self, entity_id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM entity_locks WHERE entity_id = $1")
            .bind(entity_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn holder(&self, entity_id: EntityId) -> Result<Option<LockRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT entity_id, saga_id, token, acquired_at
            FROM entity_locks
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_lock).transpose()
    }
}
