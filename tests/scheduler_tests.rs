//! Scheduler ticks against a real Postgres instance (S2, properties 4-5):
//! advisory-lock-backed overrun skip and interval gating can't be faithfully
//! exercised by an in-memory double since they depend on row locking.

mod common;

use chrono::Utc;
use common::PgContext;
use merrymaker_core::config::{OverrunPolicy, OverrunStateMask, SchedulerConfig};
use merrymaker_core::jobs::store::JobStore;
use merrymaker_core::jobs::{JobService, LeasePolicy, PostgresJobStore};
use merrymaker_core::kernel::Notifier;
use merrymaker_core::failure_notifier::FailureNotifier;
use merrymaker_core::scheduler::{PostgresScheduledTaskStore, Scheduler};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_context::test_context;
use uuid::Uuid;

async fn insert_task(ctx: &PgContext, task_name: &str, overrun_policy: &str, overrun_state_mask: i32) -> Uuid {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO scheduled_jobs (task_name, payload, interval_seconds, overrun_policy, overrun_state_mask)
        VALUES ($1, $2, 3600, $3::overrun_policy, $4)
        RETURNING id
        "#,
    )
    .bind(task_name)
    .bind(json!({"site": "A"}))
    .bind(overrun_policy)
    .bind(overrun_state_mask)
    .fetch_one(&ctx.pool)
    .await
    .expect("insert scheduled task");
    row.0
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_secs(1),
        batch_size: 25,
        overrun_policy: OverrunPolicy::Skip,
        overrun_state_mask: OverrunStateMask::RUNNING,
    }
}

/// S2 / property 4: a running job for the task suppresses enqueues across
/// ticks; once it completes, the next tick enqueues exactly one more.
#[test_context(PgContext)]
#[tokio::test]
async fn overrun_skip_suppresses_enqueue_while_job_is_running(ctx: &PgContext) {
    let job_store = Arc::new(PostgresJobStore::new(ctx.pool.clone()));
    let job_service = Arc::new(JobService::new(
        job_store.clone(),
        Notifier::new(),
        LeasePolicy::new(Duration::from_secs(30)),
        Arc::new(FailureNotifier::new()),
    ));
    let task_store = Arc::new(PostgresScheduledTaskStore::new(ctx.pool.clone()));
    let scheduler = Scheduler::new(task_store, job_store.clone(), job_service, scheduler_config());

    insert_task(ctx, "site:A", "skip", 0b001).await;

    let enqueued_first = scheduler.tick().await.expect("first tick");
    assert_eq!(enqueued_first, 1, "the task is due on its first tick and nothing is running yet");

    let job = job_store
        .reserve_next(merrymaker_core::jobs::JobType::Browser, 30)
        .await
        .expect("reserve")
        .expect("the job the scheduler just enqueued should be reservable");

    let enqueued_second = scheduler.tick().await.expect("second tick while job is running");
    let enqueued_third = scheduler.tick().await.expect("third tick while job is still running");
    assert_eq!(enqueued_second, 0, "a running job for this task must suppress enqueue");
    assert_eq!(enqueued_third, 0, "a running job for this task must suppress enqueue");

    job_store.complete(job.id.into_uuid()).await.expect("complete job");

    sqlx::query("UPDATE scheduled_jobs SET last_queued_at = $1 WHERE task_name = 'site:A'")
        .bind(Utc::now() - chrono::Duration::hours(2))
        .execute(&ctx.pool)
        .await
        .expect("force task due again");

    let enqueued_after_completion = scheduler.tick().await.expect("tick after completion");
    assert_eq!(enqueued_after_completion, 1, "once the running job completes the next tick enqueues exactly one");
}

/// Property 5: a task whose interval has not yet elapsed is not re-queued.
#[test_context(PgContext)]
#[tokio::test]
async fn tick_does_not_enqueue_before_interval_elapses(ctx: &PgContext) {
    let job_store = Arc::new(PostgresJobStore::new(ctx.pool.clone()));
    let job_service = Arc::new(JobService::new(
        job_store.clone(),
        Notifier::new(),
        LeasePolicy::new(Duration::from_secs(30)),
        Arc::new(FailureNotifier::new()),
    ));
    let task_store = Arc::new(PostgresScheduledTaskStore::new(ctx.pool.clone()));
    let scheduler = Scheduler::new(task_store, job_store, job_service, scheduler_config());

    let id = insert_task(ctx, "site:B", "skip", 0b001).await;
    sqlx::query("UPDATE scheduled_jobs SET last_queued_at = now() WHERE id = $1")
        .bind(id)
        .execute(&ctx.pool)
        .await
        .expect("mark just queued");

    let enqueued = scheduler.tick().await.expect("tick immediately after queuing");
    assert_eq!(enqueued, 0, "the 3600s interval has not elapsed yet");
}
