//! Fan-out to process-wide sinks (Slack, PagerDuty, ...) whenever a job
//! terminally fails. Dispatch is parallel, best-effort, and never allowed
//! to block or fail the caller — a broken sink only produces a log line.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::jobs::model::{ErrorClass, JobType};

#[derive(Debug, Clone, Serialize)]
pub struct JobFailurePayload {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub error: String,
    pub error_class: Option<ErrorClass>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Critical,
    Warning,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Critical
    }
}

#[async_trait]
pub trait FailureSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send_failure(&self, payload: &JobFailurePayload) -> anyhow::Result<()>;
}

pub struct FailureNotifier {
    sinks: RwLock<Vec<Arc<dyn FailureSink>>>,
}

impl FailureNotifier {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, sink: Arc<dyn FailureSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Dispatches `payload` to every registered sink in parallel. Per-sink
    /// errors are logged and otherwise swallowed; this call always
    /// returns, regardless of how many sinks fail.
    pub async fn notify(&self, payload: JobFailurePayload) {
        let sinks = self.sinks.read().await.clone();
        let futures = sinks.iter().map(|sink| {
            let payload = payload.clone();
            let sink = sink.clone();
            async move {
                if let Err(err) = sink.send_failure(&payload).await {
                    error!(sink = sink.name(), error = %err, job_id = %payload.job_id, "failure sink errored");
                }
            }
        });
        join_all(futures).await;
    }
}

impl Default for FailureNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-backoff, reqwest-backed webhook sink (Slack/PagerDuty-style).
pub struct WebhookFailureSink {
    name: String,
    url: String,
    client: reqwest::Client,
    max_attempts: u32,
    backoff: Duration,
}

impl WebhookFailureSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl FailureSink for WebhookFailureSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_failure(&self, payload: &JobFailurePayload) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.client.post(&self.url).json(payload).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if attempt >= self.max_attempts => {
                    anyhow::bail!("webhook returned {}", resp.status())
                }
                Err(err) if attempt >= self.max_attempts => return Err(err.into()),
                _ => {
                    tokio::time::sleep(self.backoff * attempt).await;
                }
            }
        }
    }
}

/// In-memory sink that records every call, for assertions in tests.
pub struct RecordingFailureSink {
    name: String,
    received: RwLock<Vec<JobFailurePayload>>,
}

impl RecordingFailureSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: RwLock::new(Vec::new()),
        }
    }

    pub async fn notifications(&self) -> Vec<JobFailurePayload> {
        self.received.read().await.clone()
    }

    pub async fn was_notified_for(&self, job_id: Uuid) -> bool {
        self.received.read().await.iter().any(|p| p.job_id == job_id)
    }

    pub async fn clear(&self) {
        self.received.write().await.clear();
    }
}

#[async_trait]
impl FailureSink for RecordingFailureSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_failure(&self, payload: &JobFailurePayload) -> anyhow::Result<()> {
        self.received.write().await.push(payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn payload() -> JobFailurePayload {
        JobFailurePayload {
            job_id: Uuid::new_v4(),
            job_type: JobType::Browser,
            error: "boom".into(),
            error_class: None,
            retry_count: 3,
        }
    }

    #[tokio::test]
    async fn notify_fans_out_to_all_sinks() {
        let notifier = FailureNotifier::new();
        let sink_a = Arc::new(RecordingFailureSink::new("a"));
        let sink_b = Arc::new(RecordingFailureSink::new("b"));
        notifier.register(sink_a.clone()).await;
        notifier.register(sink_b.clone()).await;

        let p = payload();
        notifier.notify(p.clone()).await;

        assert!(sink_a.was_notified_for(p.job_id).await);
        assert!(sink_b.was_notified_for(p.job_id).await);
    }

    #[tokio::test]
    async fn notify_with_no_sinks_does_not_panic() {
        let notifier = FailureNotifier::new();
        notifier.notify(payload()).await;
    }
}
