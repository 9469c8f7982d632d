//! Durable job storage: reserve/heartbeat/complete/fail primitives plus
//! admin-facing stats/list/delete.
//!
//! [`PostgresJobStore`] is the production implementation, grounded on a
//! `FOR UPDATE SKIP LOCKED` CTE claim exactly like this codebase's other
//! job-queue implementations. [`InMemoryJobStore`] is a test double with
//! the same semantics plus an inspection API, grounded on the in-memory
//! `RwLock<HashMap<..>>` test-manager pattern used elsewhere in this
//! codebase's test suites.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{MerrymakerError, Result};
use crate::jobs::model::{
    truncate_error_message, ErrorClass, Job, JobStats, JobStatus, JobType,
};

#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_retries: i32,
    pub site_id: Option<Uuid>,
    pub scheduled_fire_key: Option<String>,
    pub test_run: bool,
}

impl CreateJobRequest {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            payload,
            priority: 0,
            max_retries: 3,
            site_id: None,
            scheduled_fire_key: None,
            test_run: false,
        }
    }
}

/// Outcome of a `fail` call: whether the job is going back to `pending`
/// for a retry, or has reached a terminal `failed` state. Callers (the
/// Job Service) use this to decide whether to notify the failure sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    WillRetry,
    Terminal,
}

/// The three job states the scheduler's overrun mask can name. `Retrying`
/// and `Pending` are both stored as [`JobStatus::Pending`]; they are
/// distinguished by whether `retry_count` is greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunState {
    Running,
    Pending,
    Retrying,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, req: CreateJobRequest) -> Result<Job>;

    /// Same as [`JobStore::create`], but runs against a caller-supplied
    /// transaction rather than this store's own pool, so the insert
    /// commits or rolls back atomically with whatever else the caller is
    /// doing in `tx` (e.g. the scheduler's `mark_queued`).
    async fn create_in_tx<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        req: CreateJobRequest,
    ) -> Result<Job>;

    async fn reserve_next(&self, job_type: JobType, lease_seconds: i64) -> Result<Option<Job>>;

    async fn heartbeat(&self, job_id: Uuid, lease_seconds: i64) -> Result<bool>;

    async fn complete(&self, job_id: Uuid) -> Result<bool>;

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        error_class: Option<ErrorClass>,
    ) -> Result<Option<FailOutcome>>;

    async fn stats(&self, job_type: JobType) -> Result<JobStats>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    async fn delete(&self, job_id: Uuid) -> Result<bool>;

    /// Count of jobs whose `scheduled_fire_key` belongs to `task_name`
    /// (keys are minted as `"{task_name}:{random}"`) and whose state
    /// matches one of `states`, restricted to jobs with a live or absent
    /// lease. Used by the scheduler's overrun policy.
    async fn count_by_overrun_states(&self, task_name: &str, states: &[OverrunState]) -> Result<i64>;

    async fn fail_stale_pending(&self, older_than: DateTime<Utc>, batch_size: i64) -> Result<u64>;

    async fn delete_terminal_older_than(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64>;
}

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Shared `INSERT` used by both [`JobStore::create`] (against the pool)
/// and [`JobStore::create_in_tx`] (against a caller's transaction).
async fn insert_job<'e, E>(executor: E, req: &CreateJobRequest) -> Result<Job>
where
    E: PgExecutor<'e>,
{
    if req.payload.is_null() {
        return Err(MerrymakerError::validation("job payload must not be null"));
    }

    let row = sqlx::query_as::<_, Job>(
        r#"
        INSERT INTO jobs (
            id, job_type, status, payload, priority, retry_count,
            max_retries, site_id, scheduled_fire_key, test_run,
            created_at, updated_at
        )
        VALUES (
            gen_random_uuid(), $1, 'pending', $2, $3, 0,
            $4, $5, $6, $7,
            now(), now()
        )
        RETURNING *
        "#,
    )
    .bind(req.job_type)
    .bind(&req.payload)
    .bind(req.priority)
    .bind(req.max_retries)
    .bind(req.site_id)
    .bind(&req.scheduled_fire_key)
    .bind(req.test_run)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        insert_job(&self.pool, &req).await
    }

    async fn create_in_tx<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        req: CreateJobRequest,
    ) -> Result<Job> {
        insert_job(&mut **tx, &req).await
    }

    async fn reserve_next(&self, job_type: JobType, lease_seconds: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>(
            r#"
            WITH next_job AS (
                SELECT id FROM jobs
                WHERE job_type = $1 AND status = 'pending'
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE jobs
            SET status = 'running',
                started_at = now(),
                lease_expires_at = now() + ($2 || ' seconds')::interval,
                updated_at = now()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING *
            "#,
        )
        .bind(job_type)
        .bind(lease_seconds.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn heartbeat(&self, job_id: Uuid, lease_seconds: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = now() + ($2 || ' seconds')::interval,
                updated_at = now()
            WHERE id = $1 AND status = 'running' AND lease_expires_at > now()
            "#,
        )
        .bind(job_id)
        .bind(lease_seconds.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        error_class: Option<ErrorClass>,
    ) -> Result<Option<FailOutcome>> {
        let message = truncate_error_message(error);

        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            return Ok(None);
        };

        if job.is_terminal() {
            return Ok(None);
        }

        let outcome = if job.retry_count < job.max_retries {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    error = $2,
                    error_class = $3,
                    lease_expires_at = NULL,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(&message)
            .bind(error_class)
            .execute(&mut *tx)
            .await?;
            FailOutcome::WillRetry
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed',
                    error = $2,
                    error_class = $3,
                    completed_at = now(),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(&message)
            .bind(error_class)
            .execute(&mut *tx)
            .await?;
            FailOutcome::Terminal
        };

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn stats(&self, job_type: JobType) -> Result<JobStats> {
        #[derive(sqlx::FromRow)]
        struct Row {
            pending: i64,
            running: i64,
            completed_last_24h: i64,
            failed_last_24h: i64,
            avg_duration_ms: Option<f64>,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                count(*) FILTER (WHERE status = 'pending') AS pending,
                count(*) FILTER (WHERE status = 'running') AS running,
                count(*) FILTER (WHERE status = 'completed' AND completed_at > now() - interval '24 hours') AS completed_last_24h,
                count(*) FILTER (WHERE status = 'failed' AND completed_at > now() - interval '24 hours') AS failed_last_24h,
                avg(extract(epoch FROM (completed_at - started_at)) * 1000)
                    FILTER (WHERE status = 'completed' AND started_at IS NOT NULL) AS avg_duration_ms
            FROM jobs
            WHERE job_type = $1
            "#,
        )
        .bind(job_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            pending: row.pending,
            running: row.running,
            completed_last_24h: row.completed_last_24h,
            failed_last_24h: row.failed_last_24h,
            avg_duration_ms: row.avg_duration_ms,
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_overrun_states(&self, task_name: &str, states: &[OverrunState]) -> Result<i64> {
        if states.is_empty() {
            return Ok(0);
        }

        let want_running = states.contains(&OverrunState::Running);
        let want_pending = states.contains(&OverrunState::Pending);
        let want_retrying = states.contains(&OverrunState::Retrying);

        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM jobs
            WHERE scheduled_fire_key LIKE $1
              AND (lease_expires_at IS NULL OR lease_expires_at > now())
              AND (
                ($2 AND status = 'running')
                OR ($3 AND status = 'pending' AND retry_count = 0)
                OR ($4 AND status = 'pending' AND retry_count > 0)
              )
            "#,
        )
        .bind(format!("{task_name}:%"))
        .bind(want_running)
        .bind(want_pending)
        .bind(want_retrying)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn fail_stale_pending(&self, older_than: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH stale AS (
                SELECT id FROM jobs
                WHERE status = 'pending' AND created_at < $1
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'failed',
                error = 'stale',
                error_class = 'reaper_stale',
                completed_at = now(),
                updated_at = now()
            WHERE id IN (SELECT id FROM stale)
            "#,
        )
        .bind(older_than)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_terminal_older_than(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH aged AS (
                SELECT id FROM jobs
                WHERE (status = 'completed' AND completed_at < $1)
                   OR (status IN ('failed', 'cancelled') AND completed_at < $2)
                ORDER BY completed_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM jobs WHERE id IN (SELECT id FROM aged)
            "#,
        )
        .bind(completed_before)
        .bind(failed_before)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory test double with the same reservation/lease/retry semantics
/// as [`PostgresJobStore`], plus inspection helpers for assertions.
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn clear(&self) {
        self.jobs.write().await.clear();
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        if req.payload.is_null() {
            return Err(MerrymakerError::validation("job payload must not be null"));
        }
        let job = Job::builder()
            .job_type(req.job_type)
            .payload(req.payload)
            .priority(req.priority)
            .max_retries(req.max_retries)
            .build();
        let mut job = job;
        job.site_id = req.site_id;
        job.scheduled_fire_key = req.scheduled_fire_key;
        job.test_run = req.test_run;

        self.jobs.write().await.insert(job.id.into_uuid(), job.clone());
        Ok(job)
    }

    /// The in-memory store has no real transactions to join; `tx` is
    /// accepted only so callers can be generic over [`JobStore`] and is
    /// otherwise ignored.
    async fn create_in_tx<'a>(
        &self,
        _tx: &mut Transaction<'a, Postgres>,
        req: CreateJobRequest,
    ) -> Result<Job> {
        self.create(req).await
    }

    async fn reserve_next(&self, job_type: JobType, lease_seconds: i64) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().await;
        let mut candidates: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|j| j.job_type == job_type && j.status == JobStatus::Pending)
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));

        if let Some(job) = candidates.into_iter().next() {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.lease_expires_at = Some(Utc::now() + ChronoDuration::seconds(lease_seconds));
            job.updated_at = Utc::now();
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn heartbeat(&self, job_id: Uuid, lease_seconds: i64) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            let leased = job.status == JobStatus::Running
                && job.lease_expires_at.map(|t| t > Utc::now()).unwrap_or(false);
            if leased {
                job.lease_expires_at = Some(Utc::now() + ChronoDuration::seconds(lease_seconds));
                job.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn complete(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        error_class: Option<ErrorClass>,
    ) -> Result<Option<FailOutcome>> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.is_terminal() {
            return Ok(None);
        }

        let message = truncate_error_message(error);
        job.error = Some(message);
        job.error_class = error_class;
        job.updated_at = Utc::now();

        if job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Pending;
            job.lease_expires_at = None;
            Ok(Some(FailOutcome::WillRetry))
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            Ok(Some(FailOutcome::Terminal))
        }
    }

    async fn stats(&self, job_type: JobType) -> Result<JobStats> {
        let jobs = self.jobs.read().await;
        let relevant: Vec<&Job> = jobs.values().filter(|j| j.job_type == job_type).collect();
        let pending = relevant.iter().filter(|j| j.status == JobStatus::Pending).count() as i64;
        let running = relevant.iter().filter(|j| j.status == JobStatus::Running).count() as i64;
        let day_ago = Utc::now() - ChronoDuration::hours(24);
        let completed_last_24h = relevant
            .iter()
            .filter(|j| j.status == JobStatus::Completed && j.completed_at.map(|t| t > day_ago).unwrap_or(false))
            .count() as i64;
        let failed_last_24h = relevant
            .iter()
            .filter(|j| j.status == JobStatus::Failed && j.completed_at.map(|t| t > day_ago).unwrap_or(false))
            .count() as i64;

        Ok(JobStats {
            pending,
            running,
            completed_last_24h,
            failed_last_24h,
            avg_duration_ms: None,
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.jobs.write().await.remove(&job_id).is_some())
    }

    async fn count_by_overrun_states(&self, task_name: &str, states: &[OverrunState]) -> Result<i64> {
        let jobs = self.jobs.read().await;
        let prefix = format!("{task_name}:");
        let want_running = states.contains(&OverrunState::Running);
        let want_pending = states.contains(&OverrunState::Pending);
        let want_retrying = states.contains(&OverrunState::Retrying);

        let count = jobs
            .values()
            .filter(|j| {
                let matches_key = j
                    .scheduled_fire_key
                    .as_deref()
                    .map(|k| k.starts_with(&prefix))
                    .unwrap_or(false);
                let lease_live = j.lease_expires_at.map(|t| t > Utc::now()).unwrap_or(true);
                let matches_state = (want_running && j.status == JobStatus::Running)
                    || (want_pending && j.status == JobStatus::Pending && j.retry_count == 0)
                    || (want_retrying && j.status == JobStatus::Pending && j.retry_count > 0);
                matches_key && lease_live && matches_state
            })
            .count();
        Ok(count as i64)
    }

    async fn fail_stale_pending(&self, older_than: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let mut ids: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.created_at < older_than)
            .map(|j| j.id.into_uuid())
            .collect();
        ids.sort();
        ids.truncate(batch_size as usize);

        for id in &ids {
            if let Some(job) = jobs.get_mut(id) {
                job.status = JobStatus::Failed;
                job.error = Some("stale".into());
                job.error_class = Some(ErrorClass::ReaperStale);
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
            }
        }
        Ok(ids.len() as u64)
    }

    async fn delete_terminal_older_than(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let mut ids: Vec<Uuid> = jobs
            .values()
            .filter(|j| match j.status {
                JobStatus::Completed => j.completed_at.map(|t| t < completed_before).unwrap_or(false),
                JobStatus::Failed | JobStatus::Cancelled => {
                    j.completed_at.map(|t| t < failed_before).unwrap_or(false)
                }
                _ => false,
            })
            .map(|j| j.id.into_uuid())
            .collect();
        ids.sort();
        ids.truncate(batch_size as usize);

        for id in &ids {
            jobs.remove(id);
        }
        Ok(ids.len() as u64)
    }
}

pub type SharedJobStore = Arc<dyn JobStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(job_type: JobType) -> CreateJobRequest {
        CreateJobRequest::new(job_type, json!({"k": "v"}))
    }

    #[tokio::test]
    async fn reserve_next_returns_none_when_empty() {
        let store = InMemoryJobStore::new();
        assert!(store.reserve_next(JobType::Rules, 30).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserve_next_prefers_higher_priority() {
        let store = InMemoryJobStore::new();
        let mut low = req(JobType::Rules);
        low.priority = 10;
        let mut high = req(JobType::Rules);
        high.priority = 50;
        store.create(low).await.unwrap();
        store.create(high).await.unwrap();

        let reserved = store.reserve_next(JobType::Rules, 30).await.unwrap().unwrap();
        assert_eq!(reserved.priority, 50);
    }

    #[tokio::test]
    async fn heartbeat_fails_after_lease_expires() {
        let store = InMemoryJobStore::new();
        let job = store.create(req(JobType::Browser)).await.unwrap();
        let reserved = store.reserve_next(JobType::Browser, 30).await.unwrap().unwrap();
        assert_eq!(reserved.id, job.id);

        // simulate lease expiry by reserving with a negative window directly
        {
            let mut jobs = store.jobs.write().await;
            let row = jobs.get_mut(&job.id.into_uuid()).unwrap();
            row.lease_expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
        }

        assert!(!store.heartbeat(job.id.into_uuid(), 30).await.unwrap());
    }

    #[tokio::test]
    async fn fail_retries_until_max_then_terminal() {
        let store = InMemoryJobStore::new();
        let mut r = req(JobType::Rules);
        r.max_retries = 2;
        let job = store.create(r).await.unwrap();
        let id = job.id.into_uuid();

        store.reserve_next(JobType::Rules, 30).await.unwrap();
        assert_eq!(store.fail(id, "e1", None).await.unwrap(), Some(FailOutcome::WillRetry));
        store.reserve_next(JobType::Rules, 30).await.unwrap();
        assert_eq!(store.fail(id, "e2", None).await.unwrap(), Some(FailOutcome::WillRetry));
        store.reserve_next(JobType::Rules, 30).await.unwrap();
        assert_eq!(store.fail(id, "e3", None).await.unwrap(), Some(FailOutcome::Terminal));

        let final_job = store.get(id).await.unwrap().unwrap();
        assert_eq!(final_job.status, JobStatus::Failed);
        assert_eq!(final_job.retry_count, 2);
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let store = InMemoryJobStore::new();
        let job = store.create(req(JobType::Alert)).await.unwrap();
        let id = job.id.into_uuid();
        store.reserve_next(JobType::Alert, 30).await.unwrap();
        assert!(store.complete(id).await.unwrap());
        assert!(!store.complete(id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_terminal_older_than_never_touches_a_running_job() {
        let store = InMemoryJobStore::new();
        let job = store.create(req(JobType::Browser)).await.unwrap();
        let id = job.id.into_uuid();
        store.reserve_next(JobType::Browser, 30).await.unwrap();

        // Backdate the job as if it had been running for a very long time;
        // a running job must never be swept regardless of age.
        {
            let mut jobs = store.jobs.write().await;
            let row = jobs.get_mut(&id).unwrap();
            row.created_at = Utc::now() - ChronoDuration::days(365);
            row.updated_at = row.created_at;
        }

        let far_future = Utc::now() + ChronoDuration::days(1);
        let deleted = store.delete_terminal_older_than(far_future, far_future, 100).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(store.get(id).await.unwrap().is_some());
    }
}
