//! Reserves `rules` jobs and drives the [`RulesPipeline`] over the event
//! ids each payload names, reporting the outcome back through the Job
//! Service. Structured the same way as [`crate::rules::dispatcher::AlertRunner`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{MerrymakerError, Result};
use crate::jobs::model::{ErrorClass, JobType};
use crate::jobs::service::JobService;
use crate::kernel::service_host::Service;
use crate::rules::pipeline::RulesPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesJobPayload {
    pub site_id: Uuid,
    pub scope: String,
    pub event_ids: Vec<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
}

pub struct RulesEngineRunner {
    job_service: Arc<JobService>,
    pipeline: Arc<RulesPipeline>,
    lease: Duration,
}

impl RulesEngineRunner {
    pub fn new(job_service: Arc<JobService>, pipeline: Arc<RulesPipeline>, lease: Duration) -> Self {
        Self {
            job_service,
            pipeline,
            lease,
        }
    }

    async fn process_one(&self, payload: RulesJobPayload, shutdown: &CancellationToken) -> Result<()> {
        let results = self
            .pipeline
            .run(payload.site_id, &payload.scope, &payload.event_ids, payload.dry_run, shutdown)
            .await?;

        info!(
            site_id = %payload.site_id,
            domains_processed = results.domains_processed,
            events_skipped = results.events_skipped,
            alerts_created = results.alerts_created,
            errors_encountered = results.errors_encountered,
            "rules job processed"
        );

        Ok(())
    }
}

#[async_trait]
impl Service for RulesEngineRunner {
    fn name(&self) -> &'static str {
        "rules-engine"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!("rules engine runner started");
        let lease_secs = self.lease.as_secs() as i64;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            match self.job_service.reserve(JobType::Rules, lease_secs).await {
                Ok(Some(job)) => {
                    let payload: Result<RulesJobPayload> = serde_json::from_value(job.payload.clone())
                        .map_err(|e| MerrymakerError::validation(format!("invalid rules job payload: {e}")));

                    match payload {
                        Ok(payload) => match self.process_one(payload, &shutdown).await {
                            Ok(()) => {
                                let _ = self.job_service.complete(job.id.into_uuid()).await;
                            }
                            Err(err) if err.is_cancelled() => {
                                return Ok(());
                            }
                            Err(err) => {
                                warn!(job_id = %job.id, error = %err, "rules engine failed to process job");
                                let _ = self
                                    .job_service
                                    .fail_with_details(job.id.into_uuid(), &err.message, Some(ErrorClass::Unknown))
                                    .await;
                            }
                        },
                        Err(err) => {
                            error!(job_id = %job.id, error = %err, "rules job payload malformed");
                            let _ = self
                                .job_service
                                .fail_with_details(job.id.into_uuid(), &err.message, Some(ErrorClass::Unknown))
                                .await;
                        }
                    }
                }
                Ok(None) => {
                    let mut sub = self.job_service.subscribe(JobType::Rules).await;
                    sub.wait(&shutdown).await;
                }
                Err(err) => {
                    warn!(error = %err, "rules engine reserve failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_job_payload_defaults_dry_run_to_false() {
        let value = serde_json::json!({
            "site_id": "00000000-0000-0000-0000-000000000000",
            "scope": "example.com",
            "event_ids": [],
        });
        let payload: RulesJobPayload = serde_json::from_value(value).unwrap();
        assert!(!payload.dry_run);
    }
}
