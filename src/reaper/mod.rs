//! Garbage-collects stale pending jobs and ages out terminal jobs and
//! job-result rows, in three independent bounded-batch steps per tick. A
//! failure in one step still lets the other two run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ReaperConfig;
use crate::error::Result;
use crate::jobs::store::JobStore;
use crate::kernel::service_host::Service;

pub struct Reaper {
    job_store: Arc<dyn JobStore>,
    pool: PgPool,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(job_store: Arc<dyn JobStore>, pool: PgPool, config: ReaperConfig) -> Self {
        Self {
            job_store,
            pool,
            config,
        }
    }

    pub async fn tick(&self) -> ReaperTickReport {
        let now = Utc::now();
        let mut report = ReaperTickReport::default();

        match self
            .job_store
            .fail_stale_pending(now - self.config.pending_max_age, self.config.batch_size)
            .await
        {
            Ok(count) => report.stale_pending_failed = count,
            Err(err) => error!(error = %err, "reaper: fail_stale_pending step failed"),
        }

        match self
            .job_store
            .delete_terminal_older_than(
                now - self.config.completed_max_age,
                now - self.config.failed_max_age,
                self.config.batch_size,
            )
            .await
        {
            Ok(count) => report.terminal_jobs_deleted = count,
            Err(err) => error!(error = %err, "reaper: delete_terminal_older_than step failed"),
        }

        match delete_aged_job_results(&self.pool, now - self.config.job_results_max_age, self.config.batch_size).await
        {
            Ok(count) => report.job_results_deleted = count,
            Err(err) => error!(error = %err, "reaper: delete_aged_job_results step failed"),
        }

        report
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReaperTickReport {
    pub stale_pending_failed: u64,
    pub terminal_jobs_deleted: u64,
    pub job_results_deleted: u64,
}

async fn delete_aged_job_results(
    pool: &PgPool,
    older_than: chrono::DateTime<Utc>,
    batch_size: i64,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        WITH aged AS (
            SELECT id FROM job_results
            WHERE created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        DELETE FROM job_results WHERE id IN (SELECT id FROM aged)
        "#,
    )
    .bind(older_than)
    .bind(batch_size)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl Service for Reaper {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.interval);
        info!("reaper started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reaper stopping");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if report.stale_pending_failed > 0 || report.terminal_jobs_deleted > 0 || report.job_results_deleted > 0 {
                        info!(
                            stale_pending_failed = report.stale_pending_failed,
                            terminal_jobs_deleted = report.terminal_jobs_deleted,
                            job_results_deleted = report.job_results_deleted,
                            "reaper tick complete"
                        );
                    } else {
                        debug!("reaper tick found nothing to reap");
                    }
                }
            }
        }
    }
}
