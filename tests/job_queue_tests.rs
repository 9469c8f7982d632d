//! Postgres-backed job queue scenarios (S1, S3) that an in-memory store
//! can't exercise: real row locking under `FOR UPDATE SKIP LOCKED` and a
//! real lease clock.

mod common;

use common::PgContext;
use merrymaker_core::jobs::store::{CreateJobRequest, JobStore};
use merrymaker_core::jobs::{JobStatus, JobType, PostgresJobStore};
use serde_json::json;
use std::time::Duration;
use test_context::test_context;

/// S1: a higher-priority job reserved first, then the lower-priority one
/// on the next reservation, even though both were enqueued a millisecond
/// apart.
#[test_context(PgContext)]
#[tokio::test]
async fn reserve_next_orders_by_priority_then_age(ctx: &PgContext) {
    let store = PostgresJobStore::new(ctx.pool.clone());

    let low = store
        .create(CreateJobRequest {
            priority: 10,
            ..CreateJobRequest::new(JobType::Rules, json!({"task": "low"}))
        })
        .await
        .expect("create low priority job");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let high = store
        .create(CreateJobRequest {
            priority: 50,
            ..CreateJobRequest::new(JobType::Rules, json!({"task": "high"}))
        })
        .await
        .expect("create high priority job");

    let first = store
        .reserve_next(JobType::Rules, 30)
        .await
        .expect("reserve first")
        .expect("a job should be available");
    assert_eq!(first.id, high.id);

    let second = store
        .reserve_next(JobType::Rules, 30)
        .await
        .expect("reserve second")
        .expect("a second job should be available");
    assert_eq!(second.id, low.id);
}

/// S3: once a lease expires, a different reservation can claim the job,
/// and the original holder's heartbeat against the stale lease fails.
#[test_context(PgContext)]
#[tokio::test]
async fn expired_lease_allows_another_worker_to_reserve(ctx: &PgContext) {
    let store = PostgresJobStore::new(ctx.pool.clone());

    let job = store
        .create(CreateJobRequest::new(JobType::Browser, json!({"task": "lease"})))
        .await
        .expect("create job");

    let reserved = store
        .reserve_next(JobType::Browser, 1)
        .await
        .expect("reserve with short lease")
        .expect("job should be reserved");
    assert_eq!(reserved.id, job.id);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let reclaimed = store
        .reserve_next(JobType::Browser, 30)
        .await
        .expect("reserve after lease expiry")
        .expect("a second worker should be able to reserve the expired job");
    assert_eq!(reclaimed.id, job.id);

    let heartbeat_ok = store
        .heartbeat(job.id.into_uuid(), 30)
        .await
        .expect("heartbeat call should not error");
    assert!(
        !heartbeat_ok,
        "the first worker's heartbeat must fail once its lease has been reassigned"
    );

    let current = store.get(job.id.into_uuid()).await.expect("get job").expect("job still exists");
    assert_eq!(current.status, JobStatus::Running);
}
