//! Thin orchestration over the Job Store, Notifier and Lease Policy — the
//! single entry point worker runners use. Also the seam that turns a
//! terminal job failure into a Failure Notifier event.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::failure_notifier::{FailureNotifier, JobFailurePayload};
use crate::jobs::lease::LeasePolicy;
use crate::jobs::model::{ErrorClass, Job, JobType};
use crate::jobs::store::{CreateJobRequest, FailOutcome, JobStore};
use crate::kernel::notifier::{Notifier, Subscription};

pub struct JobService {
    store: Arc<dyn JobStore>,
    notifier: Notifier,
    lease_policy: LeasePolicy,
    failure_notifier: Arc<FailureNotifier>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        notifier: Notifier,
        lease_policy: LeasePolicy,
        failure_notifier: Arc<FailureNotifier>,
    ) -> Self {
        Self {
            store,
            notifier,
            lease_policy,
            failure_notifier,
        }
    }

    pub async fn enqueue(&self, req: CreateJobRequest) -> Result<Job> {
        let job_type = req.job_type;
        let job = self.store.create(req).await?;
        self.notifier.notify(job_type).await;
        Ok(job)
    }

    /// Enqueues `req` against `tx` rather than the store's own pool, so
    /// the insert commits or rolls back atomically with the rest of the
    /// caller's transaction. Unlike [`JobService::enqueue`], this does
    /// not notify subscribers — the job isn't visible to other
    /// connections until `tx` commits, so the caller must call
    /// [`JobService::notify_enqueued`] itself once it has.
    pub async fn enqueue_in_tx<'a>(
        &self,
        tx: &mut Transaction<'a, Postgres>,
        req: CreateJobRequest,
    ) -> Result<Job> {
        self.store.create_in_tx(tx, req).await
    }

    /// Wakes subscribers waiting on `job_type`. Intended for callers of
    /// [`JobService::enqueue_in_tx`] to invoke after their transaction
    /// has committed.
    pub async fn notify_enqueued(&self, job_type: JobType) {
        self.notifier.notify(job_type).await;
    }

    /// Resolves `requested_lease_seconds` through the Lease Policy and
    /// reserves the next available job of `job_type`, if any.
    pub async fn reserve(&self, job_type: JobType, requested_lease_seconds: i64) -> Result<Option<Job>> {
        let resolved = self.lease_policy.resolve_seconds(requested_lease_seconds);
        self.store.reserve_next(job_type, resolved.seconds).await
    }

    pub async fn heartbeat(&self, job_id: Uuid, requested_lease_seconds: i64) -> Result<bool> {
        let resolved = self.lease_policy.resolve_seconds(requested_lease_seconds);
        self.store.heartbeat(job_id, resolved.seconds).await
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<bool> {
        self.store.complete(job_id).await
    }

    /// Fails `job_id`. If this transitions the job to a terminal `failed`
    /// state, emits a failure notification unless the job is test-marked.
    /// The Failure Notifier is never allowed to make this call fail or
    /// block longer than its own dispatch budget.
    pub async fn fail_with_details(
        &self,
        job_id: Uuid,
        error: &str,
        error_class: Option<ErrorClass>,
    ) -> Result<Option<FailOutcome>> {
        let outcome = self.store.fail(job_id, error, error_class).await?;

        if outcome == Some(FailOutcome::Terminal) {
            if let Ok(Some(job)) = self.store.get(job_id).await {
                if !job.test_run {
                    self.failure_notifier
                        .notify(JobFailurePayload {
                            job_id,
                            job_type: job.job_type,
                            error: error.to_string(),
                            error_class,
                            retry_count: job.retry_count,
                        })
                        .await;
                } else {
                    warn!(job_id = %job_id, "suppressing failure notification for test-marked job");
                }
            }
        }

        Ok(outcome)
    }

    pub async fn subscribe(&self, job_type: JobType) -> Subscription {
        self.notifier.subscribe(job_type).await
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_secs(self.lease_policy.resolve_seconds(0).seconds as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use serde_json::json;

    fn service() -> JobService {
        JobService::new(
            Arc::new(InMemoryJobStore::new()),
            Notifier::new(),
            LeasePolicy::new(Duration::from_secs(30)),
            Arc::new(FailureNotifier::new()),
        )
    }

    #[tokio::test]
    async fn enqueue_then_reserve_round_trips() {
        let svc = service();
        svc.enqueue(CreateJobRequest::new(JobType::Rules, json!({"a": 1})))
            .await
            .unwrap();
        let reserved = svc.reserve(JobType::Rules, 0).await.unwrap();
        assert!(reserved.is_some());
    }

    #[tokio::test]
    async fn fail_with_details_surfaces_terminal_outcome() {
        let svc = service();
        let job = svc
            .enqueue(CreateJobRequest::new(JobType::Alert, json!({})))
            .await
            .unwrap();
        let mut job_id = job.id.into_uuid();
        for _ in 0..=3 {
            svc.reserve(JobType::Alert, 0).await.unwrap();
            let outcome = svc.fail_with_details(job_id, "boom", None).await.unwrap();
            if outcome == Some(FailOutcome::Terminal) {
                return;
            }
            job_id = job.id.into_uuid();
        }
        panic!("expected a terminal outcome within max_retries + 1 attempts");
    }
}
