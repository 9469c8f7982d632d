//! Given a rules job's event ids, loads the events, extracts a domain per
//! event, runs every configured evaluator, persists alerts (applying
//! dedupe and alert-mode policy), and hands dispatch off to the Alert
//! Dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{MerrymakerError, Result};
use crate::rules::dispatcher::AlertDispatcher;
use crate::rules::evaluators::Evaluator;
use crate::rules::extractor::extract_domain;
use crate::rules::model::{Alert, Event, ProcessingResults, WorkItem};
use crate::site::{AlertMode, Site};

#[async_trait]
pub trait EventRepo: Send + Sync {
    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Event>>;
    async fn mark_processed_by_ids(&self, ids: &[Uuid]) -> Result<()>;

    /// Bulk-inserts freshly ingested events, returning their assigned
    /// ids in insertion order. Used by the event ingestion entry point,
    /// not by the pipeline itself.
    async fn insert_batch(&self, events: Vec<crate::rules::ingest::NewEvent>) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait AlertRepo: Send + Sync {
    /// Persists `alerts`, applying the 24h `(site_id, rule_type, target)`
    /// dedupe window. Returns only the alerts that were actually inserted
    /// (i.e. not suppressed as duplicates).
    async fn create_batch(&self, alerts: Vec<Alert>) -> Result<Vec<Alert>>;
}

#[async_trait]
pub trait SiteRepo: Send + Sync {
    async fn get(&self, site_id: Uuid) -> Result<Option<Site>>;
}

pub struct RulesPipeline {
    events: Arc<dyn EventRepo>,
    alerts: Arc<dyn AlertRepo>,
    sites: Arc<dyn SiteRepo>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    dispatcher: Arc<AlertDispatcher>,
}

impl RulesPipeline {
    pub fn new(
        events: Arc<dyn EventRepo>,
        alerts: Arc<dyn AlertRepo>,
        sites: Arc<dyn SiteRepo>,
        evaluators: Vec<Arc<dyn Evaluator>>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            events,
            alerts,
            sites,
            evaluators,
            dispatcher,
        }
    }

    /// Events whose URL can't be parsed into a domain are counted in
    /// `events_skipped` but still marked processed — an unparseable URL
    /// won't become parseable on a later run, so retrying it forever
    /// would just waste a rules run on the same dead event every time.
    pub async fn run(
        &self,
        site_id: Uuid,
        scope: &str,
        event_ids: &[Uuid],
        dry_run: bool,
        shutdown: &CancellationToken,
    ) -> Result<ProcessingResults> {
        let site = self
            .sites
            .get(site_id)
            .await?
            .ok_or_else(|| MerrymakerError::not_found(format!("site {site_id} not found")))?;

        let events = self.events.get_by_ids(event_ids).await?;

        let mut results = ProcessingResults {
            domains_processed: 0,
            events_skipped: 0,
            alerts_created: 0,
            errors_encountered: 0,
            alert_mode: site.alert_mode,
        };

        let mut pending_alerts = Vec::new();
        let mut processed_event_ids = Vec::new();

        for event in &events {
            if shutdown.is_cancelled() {
                return Err(MerrymakerError::cancelled());
            }

            let Some(domain) = extract_domain(&event.event_data) else {
                results.events_skipped += 1;
                processed_event_ids.push(event.id);
                continue;
            };

            let referrer = event
                .event_data
                .pointer("/request/headers/referer")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let work = WorkItem {
                site_id,
                scope: scope.to_string(),
                domain,
                alert_mode: site.alert_mode,
                referrer,
            };

            results.domains_processed += 1;

            for evaluator in &self.evaluators {
                match evaluator.evaluate(&work).await {
                    Ok(intents) => {
                        for intent in intents {
                            pending_alerts.push(Alert {
                                id: Uuid::new_v4(),
                                site_id,
                                rule_type: intent.rule_type,
                                severity: intent.severity,
                                title: intent.title,
                                description: intent.description,
                                metadata: intent.metadata,
                                target: intent.target,
                                delivery_status: match site.alert_mode {
                                    AlertMode::Active => crate::rules::model::DeliveryStatus::Pending,
                                    AlertMode::Muted => crate::rules::model::DeliveryStatus::Muted,
                                },
                                fired_at: chrono::Utc::now(),
                                resolved_at: None,
                                resolved_by: None,
                            });
                        }
                    }
                    Err(_) => {
                        results.errors_encountered += 1;
                    }
                }
            }

            processed_event_ids.push(event.id);
        }

        if dry_run {
            return Ok(results);
        }

        if !pending_alerts.is_empty() {
            let inserted = self.alerts.create_batch(pending_alerts).await?;
            results.alerts_created = inserted.len() as u64;

            for alert in inserted {
                if alert.delivery_status != crate::rules::model::DeliveryStatus::Muted {
                    if let Err(err) = self.dispatcher.dispatch(&alert).await {
                        tracing::warn!(alert_id = %alert.id, error = %err, "alert dispatch failed to enqueue");
                    }
                }
            }
        }

        if !processed_event_ids.is_empty() {
            self.events.mark_processed_by_ids(&processed_event_ids).await?;
        }

        Ok(results)
    }
}
