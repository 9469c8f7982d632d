//! Durable storage for scheduled tasks, with the transactional
//! find-due/mark-queued pair and per-task advisory locking the Scheduler
//! needs to run safely across multiple processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::model::ScheduledTask;

/// Deterministic 64-bit hash used to derive a Postgres advisory lock key
/// from a task name. `DefaultHasher` is explicitly not used here: its
/// output is allowed to change across Rust versions/process restarts,
/// which would make the lock key unstable.
pub fn fnv1a_64(input: &str) -> i64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash as i64
}

#[async_trait]
pub trait ScheduledTaskStore: Send + Sync {
    /// Returns up to `limit` due tasks, skip-locked so concurrent
    /// schedulers do not select the same rows. Must run inside the same
    /// transaction as the subsequent `mark_queued` calls.
    async fn find_due<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>>;

    async fn mark_queued<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        id: Uuid,
        now: DateTime<Utc>,
        active_fire_key: Option<&str>,
    ) -> Result<bool>;

    async fn update_active_fire_key<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        id: Uuid,
        active_fire_key: Option<&str>,
    ) -> Result<()>;

    async fn begin(&self) -> Result<Transaction<'_, Postgres>>;

    /// Acquires a non-blocking per-task advisory lock, derived from a
    /// stable hash of `task_name`, for the lifetime of `tx`. The lock
    /// releases automatically at transaction end. Returns `false` without
    /// running `f` if the lock could not be acquired.
    async fn try_with_task_lock<'a, F, Fut, T>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        task_name: &str,
        f: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&mut Transaction<'a, Postgres>) -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send;
}

pub struct PostgresScheduledTaskStore {
    pool: PgPool,
}

impl PostgresScheduledTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduledTaskStore for PostgresScheduledTaskStore {
    async fn find_due<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query_as::<_, ScheduledTask>(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE last_queued_at IS NULL
               OR last_queued_at + (interval_seconds || ' seconds')::interval <= $1
            ORDER BY last_queued_at ASC NULLS FIRST, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }

    async fn mark_queued<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        id: Uuid,
        now: DateTime<Utc>,
        active_fire_key: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET last_queued_at = $2, active_fire_key = $3, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(active_fire_key)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_active_fire_key<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        id: Uuid,
        active_fire_key: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET active_fire_key = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active_fire_key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    async fn try_with_task_lock<'a, F, Fut, T>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        task_name: &str,
        f: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&mut Transaction<'a, Postgres>) -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let key = fnv1a_64(task_name);
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_one(&mut **tx)
            .await?;

        if !acquired {
            return Ok(None);
        }

        Ok(Some(f(tx).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_deterministic() {
        assert_eq!(fnv1a_64("site:a"), fnv1a_64("site:a"));
        assert_ne!(fnv1a_64("site:a"), fnv1a_64("site:b"));
    }
}
