//! Event ingestion entry point: bulk-inserts events and, when enabled,
//! auto-enqueues a rules job over the freshly-ingested batch. Double
//! submission of the same batch (e.g. a retried bulk-ingest call) is
//! suppressed by a fingerprint-keyed dedupe cache rather than relying on
//! the caller not to retry.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::model::JobType;
use crate::jobs::service::JobService;
use crate::jobs::store::CreateJobRequest;
use crate::kernel::cache::Cache;
use crate::rules::pipeline::EventRepo;
use crate::rules::runner::RulesJobPayload;

const RULES_JOB_DEDUPE_TTL: Duration = Duration::from_secs(120);

/// An event as submitted for ingestion, before it has a row id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub session_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub should_process: bool,
}

/// Lowercase hex SHA-256 over `"{site_id}|{scope}|{sorted_event_ids}"`,
/// the deterministic fingerprint documented in DESIGN.md for the
/// rules-job dedupe cache.
pub fn rules_job_fingerprint(site_id: Uuid, scope: &str, event_ids: &[Uuid]) -> String {
    let mut ids: Vec<String> = event_ids.iter().map(Uuid::to_string).collect();
    ids.sort();
    let input = format!("{site_id}|{scope}|{}", ids.join(","));
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Bulk-inserts events for a site/scope and, if `auto_enqueue` is set,
/// mints a `rules` job over the inserted batch unless an identical
/// fingerprint was already enqueued within the last 2 minutes.
pub struct EventIngestor {
    events: Arc<dyn EventRepo>,
    job_service: Arc<JobService>,
    rules_job_dedupe_cache: Arc<dyn Cache>,
    auto_enqueue: bool,
}

impl EventIngestor {
    pub fn new(
        events: Arc<dyn EventRepo>,
        job_service: Arc<JobService>,
        rules_job_dedupe_cache: Arc<dyn Cache>,
        auto_enqueue: bool,
    ) -> Self {
        Self {
            events,
            job_service,
            rules_job_dedupe_cache,
            auto_enqueue,
        }
    }

    pub async fn ingest(&self, site_id: Uuid, scope: &str, items: Vec<NewEvent>) -> Result<Vec<Uuid>> {
        let ids = self.events.insert_batch(items).await?;

        if !self.auto_enqueue || ids.is_empty() {
            return Ok(ids);
        }

        let fingerprint = rules_job_fingerprint(site_id, scope, &ids);
        let is_new = self
            .rules_job_dedupe_cache
            .set_if_absent(&fingerprint, vec![1], RULES_JOB_DEDUPE_TTL)
            .await?;

        if !is_new {
            tracing::debug!(fingerprint, "rules job dedupe cache suppressed duplicate auto-enqueue");
            return Ok(ids);
        }

        let payload = RulesJobPayload {
            site_id,
            scope: scope.to_string(),
            event_ids: ids.clone(),
            dry_run: false,
        };

        let req = CreateJobRequest {
            job_type: JobType::Rules,
            payload: serde_json::to_value(payload).map_err(|e| {
                crate::error::MerrymakerError::internal("failed to serialize rules job payload", e.into())
            })?,
            priority: 0,
            max_retries: 3,
            site_id: Some(site_id),
            scheduled_fire_key: None,
            test_run: false,
        };

        self.job_service.enqueue(req).await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_independent_over_event_ids() {
        let site_id = Uuid::nil();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(
            rules_job_fingerprint(site_id, "scope", &[a, b]),
            rules_job_fingerprint(site_id, "scope", &[b, a])
        );
    }

    #[test]
    fn fingerprint_differs_across_scopes() {
        let site_id = Uuid::nil();
        let ids = [Uuid::from_u128(1)];
        assert_ne!(
            rules_job_fingerprint(site_id, "scope-a", &ids),
            rules_job_fingerprint(site_id, "scope-b", &ids)
        );
    }
}
