//! Ticks at a fixed interval, atomically claims due scheduled tasks, and
//! turns them into jobs while respecting each task's overrun policy.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{OverrunPolicy, OverrunStateMask, SchedulerConfig};
use crate::error::Result;
use crate::jobs::model::JobType;
use crate::jobs::service::JobService;
use crate::jobs::store::{CreateJobRequest, JobStore, OverrunState};
use crate::kernel::service_host::Service;
use crate::scheduler::model::ScheduledTask;
use crate::scheduler::store::ScheduledTaskStore;

fn mask_to_states(mask: OverrunStateMask) -> Vec<OverrunState> {
    let mut states = Vec::new();
    if mask.contains(OverrunStateMask::RUNNING) {
        states.push(OverrunState::Running);
    }
    if mask.contains(OverrunStateMask::PENDING) {
        states.push(OverrunState::Pending);
    }
    if mask.contains(OverrunStateMask::RETRYING) {
        states.push(OverrunState::Retrying);
    }
    states
}

enum Decision {
    Enqueue,
    RescheduleOnly,
    Skip,
}

pub struct Scheduler {
    task_store: Arc<dyn ScheduledTaskStore>,
    job_store: Arc<dyn JobStore>,
    job_service: Arc<JobService>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        task_store: Arc<dyn ScheduledTaskStore>,
        job_store: Arc<dyn JobStore>,
        job_service: Arc<JobService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            task_store,
            job_store,
            job_service,
            config,
        }
    }

    async fn decide(&self, task: &ScheduledTask) -> Result<Decision> {
        let policy = task.effective_overrun_policy(self.config.overrun_policy);
        match policy {
            OverrunPolicy::Queue => Ok(Decision::Enqueue),
            OverrunPolicy::Reschedule => Ok(Decision::RescheduleOnly),
            OverrunPolicy::Skip => {
                let mask = task.effective_overrun_mask(self.config.overrun_state_mask);
                let states = mask_to_states(mask);
                let count = self
                    .job_store
                    .count_by_overrun_states(&task.task_name, &states)
                    .await?;
                if count > 0 {
                    Ok(Decision::Skip)
                } else {
                    Ok(Decision::Enqueue)
                }
            }
        }
    }

    /// Runs exactly one scheduler tick: finds due tasks, decides and
    /// applies an action for each within a single transaction, and
    /// returns the number of jobs enqueued. A task-level failure is
    /// logged and does not abort the rest of the batch; a failure to open
    /// the transaction propagates so the caller can wait for the next
    /// tick. The job insert and the task's `mark_queued` commit together:
    /// job creation runs against this same transaction via
    /// `JobService::enqueue_in_tx`, so a job can never be inserted
    /// without `last_queued_at` advancing alongside it, or vice versa.
    pub async fn tick(&self) -> Result<usize> {
        let mut tx = self.task_store.begin().await?;
        let now = Utc::now();
        let due = self.task_store.find_due(&mut tx, now, self.config.batch_size).await?;

        let mut enqueued = 0usize;
        let mut enqueued_job_types = Vec::new();

        for task in due {
            let outcome = self
                .task_store
                .try_with_task_lock(&mut tx, &task.task_name, |tx| {
                    let task = task.clone();
                    async move {
                        let decision = self.decide(&task).await?;
                        match decision {
                            Decision::Enqueue => {
                                let fire_key = format!("{}:{}", task.task_name, Uuid::new_v4().simple());
                                let req = CreateJobRequest {
                                    job_type: JobType::Browser,
                                    payload: task.payload.clone(),
                                    priority: 0,
                                    max_retries: 3,
                                    site_id: None,
                                    scheduled_fire_key: Some(fire_key.clone()),
                                    test_run: false,
                                };
                                self.job_service.enqueue_in_tx(tx, req).await?;
                                self.task_store
                                    .mark_queued(tx, task.id, now, Some(&fire_key))
                                    .await?;
                                Ok(true)
                            }
                            Decision::RescheduleOnly => {
                                self.task_store.mark_queued(tx, task.id, now, None).await?;
                                Ok(false)
                            }
                            Decision::Skip => Ok(false),
                        }
                    }
                })
                .await;

            match outcome {
                Ok(Some(Ok(true))) => {
                    enqueued += 1;
                    enqueued_job_types.push(JobType::Browser);
                }
                Ok(Some(Ok(false))) => {}
                Ok(Some(Err(err))) => error!(task = %task.task_name, error = %err, "scheduler task failed"),
                Ok(None) => debug!(task = %task.task_name, "task lock held by another scheduler, skipping"),
                Err(err) => error!(task = %task.task_name, error = %err, "scheduler task lock attempt failed"),
            }
        }

        tx.commit().await?;

        for job_type in enqueued_job_types {
            self.job_service.notify_enqueued(job_type).await;
        }

        Ok(enqueued)
    }
}

#[async_trait]
impl Service for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.interval);
        info!("scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(enqueued) if enqueued > 0 => debug!(enqueued, "scheduler tick enqueued jobs"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "scheduler tick failed"),
                    }
                }
            }
        }
    }
}
