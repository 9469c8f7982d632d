//! Resolves an alert's site to a sink and enqueues an `alert` job per
//! (alert, sink) pair. The actual HTTP send is performed by
//! [`AlertRunner`], a `Service` that reserves `alert` jobs the same way
//! any other worker reserves jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{MerrymakerError, Result};
use crate::jobs::model::{ErrorClass, JobType};
use crate::jobs::service::JobService;
use crate::jobs::store::CreateJobRequest;
use crate::kernel::service_host::Service;
use crate::rules::model::Alert;
use crate::rules::pipeline::SiteRepo;
use crate::site::HttpAlertSink;

const MAX_RETRY: i32 = 10;

#[async_trait]
pub trait SinkRepo: Send + Sync {
    async fn get(&self, sink_id: Uuid) -> Result<Option<HttpAlertSink>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertJobPayload {
    pub alert_id: Uuid,
    pub sink_id: Uuid,
    pub method: String,
    pub uri: String,
    pub body_template: String,
    pub headers_template: serde_json::Value,
    pub secret_refs: Vec<String>,
    pub ok_status: i32,
    pub attempt: u32,
    /// The firing alert's own metadata, so `body_template`/
    /// `headers_template` can substitute `{{field}}` tokens against it
    /// alongside resolved secrets.
    pub metadata: serde_json::Value,
}

pub struct AlertDispatcher {
    sites: Arc<dyn SiteRepo>,
    sinks: Arc<dyn SinkRepo>,
    job_service: Arc<JobService>,
}

impl AlertDispatcher {
    pub fn new(sites: Arc<dyn SiteRepo>, sinks: Arc<dyn SinkRepo>, job_service: Arc<JobService>) -> Self {
        Self {
            sites,
            sinks,
            job_service,
        }
    }

    /// Looks up the alert's site and sink; if the site has no sink
    /// configured, this is a no-op (the alert stays recorded but
    /// undispatched).
    pub async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let Some(site) = self.sites.get(alert.site_id).await? else {
            return Err(MerrymakerError::not_found(format!("site {} not found", alert.site_id)));
        };

        let Some(sink_id) = site.http_alert_sink_id else {
            return Ok(());
        };

        let Some(sink) = self.sinks.get(sink_id).await? else {
            return Err(MerrymakerError::not_found(format!("sink {sink_id} not found")));
        };

        let payload = AlertJobPayload {
            alert_id: alert.id,
            sink_id,
            method: sink.method.clone(),
            uri: sink.uri.clone(),
            body_template: sink.body_template.clone(),
            headers_template: sink.headers_template.clone(),
            secret_refs: sink.secret_names.clone(),
            ok_status: sink.ok_status,
            attempt: 0,
            metadata: alert.metadata.clone(),
        };

        let req = CreateJobRequest {
            job_type: JobType::Alert,
            payload: serde_json::to_value(payload).map_err(|e| {
                MerrymakerError::internal("failed to serialize alert job payload", e.into())
            })?,
            priority: 10,
            max_retries: sink.retry.clamp(0, MAX_RETRY),
            site_id: Some(alert.site_id),
            scheduled_fire_key: None,
            test_run: false,
        };

        self.job_service.enqueue(req).await?;
        Ok(())
    }
}

/// Resolves a secret reference to its plaintext value. Actual
/// decryption of `v1:`-prefixed envelopes is a named non-goal; this
/// trait is the seam a real secret store plugs into.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<String>;
}

/// Test double backed by a fixed map, matching the `v1:`/`noop:` envelope
/// convention: values are returned verbatim with any such prefix
/// stripped.
pub struct StaticSecretResolver {
    values: HashMap<String, String>,
}

impl StaticSecretResolver {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, name: &str) -> Result<String> {
        let raw = self
            .values
            .get(name)
            .ok_or_else(|| MerrymakerError::not_found(format!("secret {name} not found")))?;
        decode_secret_envelope(raw)
    }
}

fn strip_envelope(value: &str) -> &str {
    value
        .strip_prefix("v1:")
        .or_else(|| value.strip_prefix("noop:"))
        .unwrap_or(value)
}

/// Decodes a secret value carrying the at-rest envelope format: `noop:`
/// is accepted on read as base64 of the plaintext, no decryption
/// needed; `v1:` requires real AES-256-GCM decryption, which is a named
/// non-goal here, so it errors rather than silently returning
/// ciphertext. A value with neither prefix passes through unchanged.
fn decode_secret_envelope(value: &str) -> Result<String> {
    if let Some(encoded) = value.strip_prefix("noop:") {
        let bytes = BASE64_STANDARD
            .decode(encoded)
            .map_err(|e| MerrymakerError::validation(format!("invalid noop secret envelope: {e}")))?;
        return String::from_utf8(bytes)
            .map_err(|e| MerrymakerError::validation(format!("noop secret envelope is not valid utf-8: {e}")));
    }
    if value.starts_with("v1:") {
        return Err(MerrymakerError::internal(
            "decryption of v1 secret envelopes is not implemented by this resolver",
            anyhow::anyhow!("v1 envelope requires a decryption-capable SecretResolver"),
        ));
    }
    Ok(value.to_string())
}

/// Substitutes `{{field}}` tokens in `template` against `metadata`'s
/// string-valued top-level fields.
fn substitute_tokens(template: &str, metadata: &serde_json::Value) -> String {
    let mut out = template.to_string();
    if let Some(map) = metadata.as_object() {
        for (key, value) in map {
            let token = format!("{{{{{key}}}}}");
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&token, &replacement);
        }
    }
    out
}

/// Reserves `alert` jobs, substitutes templates, resolves secrets, and
/// performs the HTTP call, reporting the outcome back through the Job
/// Service.
pub struct AlertRunner {
    job_service: Arc<JobService>,
    secrets: Arc<dyn SecretResolver>,
    client: reqwest::Client,
    lease: std::time::Duration,
}

impl AlertRunner {
    pub fn new(job_service: Arc<JobService>, secrets: Arc<dyn SecretResolver>, lease: std::time::Duration) -> Self {
        Self {
            job_service,
            secrets,
            client: reqwest::Client::new(),
            lease,
        }
    }

    async fn process_one(&self, job_id: Uuid, payload: AlertJobPayload) -> Result<()> {
        let mut substitution_context = match &payload.metadata {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for name in &payload.secret_refs {
            let value = self.secrets.resolve(strip_envelope(name)).await?;
            substitution_context.insert(name.clone(), json!(value));
        }
        let substitution_context = serde_json::Value::Object(substitution_context);

        let body = substitute_tokens(&payload.body_template, &substitution_context);
        let headers_raw = substitute_tokens(&payload.headers_template.to_string(), &substitution_context);

        let method = payload
            .method
            .parse::<reqwest::Method>()
            .map_err(|e| MerrymakerError::validation(format!("invalid alert sink method: {e}")))?;

        let mut request = self.client.request(method, &payload.uri).body(body);

        if let Ok(headers_value) = serde_json::from_str::<serde_json::Value>(&headers_raw) {
            if let Some(map) = headers_value.as_object() {
                for (key, value) in map {
                    if let Some(v) = value.as_str() {
                        request = request.header(key, v);
                    }
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| MerrymakerError::transient("alert webhook request failed", e.into()))?;

        let status = response.status().as_u16() as i32;

        if status == payload.ok_status || response.status().is_success() {
            self.job_service.complete(job_id).await?;
        } else {
            self.job_service
                .fail_with_details(
                    job_id,
                    &format!("webhook returned status {status}"),
                    Some(ErrorClass::NetworkError),
                )
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Service for AlertRunner {
    fn name(&self) -> &'static str {
        "alert-runner"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!("alert runner started");
        let lease_secs = self.lease.as_secs() as i64;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            match self.job_service.reserve(JobType::Alert, lease_secs).await {
                Ok(Some(job)) => {
                    let payload: Result<AlertJobPayload> = serde_json::from_value(job.payload.clone())
                        .map_err(|e| MerrymakerError::validation(format!("invalid alert job payload: {e}")));

                    match payload {
                        Ok(payload) => {
                            if let Err(err) = self.process_one(job.id.into_uuid(), payload).await {
                                warn!(job_id = %job.id, error = %err, "alert runner failed to process job");
                                let _ = self
                                    .job_service
                                    .fail_with_details(job.id.into_uuid(), &err.message, Some(ErrorClass::Unknown))
                                    .await;
                            }
                        }
                        Err(err) => {
                            error!(job_id = %job.id, error = %err, "alert job payload malformed");
                            let _ = self
                                .job_service
                                .fail_with_details(job.id.into_uuid(), &err.message, Some(ErrorClass::Unknown))
                                .await;
                        }
                    }
                }
                Ok(None) => {
                    let mut sub = self.job_service.subscribe(JobType::Alert).await;
                    sub.wait(&shutdown).await;
                }
                Err(err) => {
                    warn!(error = %err, "alert runner reserve failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_envelope_removes_known_prefixes() {
        assert_eq!(strip_envelope("v1:abc"), "abc");
        assert_eq!(strip_envelope("noop:abc"), "abc");
        assert_eq!(strip_envelope("abc"), "abc");
    }

    #[test]
    fn decode_secret_envelope_base64_decodes_noop_values() {
        let encoded = format!("noop:{}", BASE64_STANDARD.encode("hunter2"));
        assert_eq!(decode_secret_envelope(&encoded).unwrap(), "hunter2");
    }

    #[test]
    fn decode_secret_envelope_rejects_v1_without_decrypting() {
        assert!(decode_secret_envelope("v1:ZmFrZQ==").is_err());
    }

    #[test]
    fn decode_secret_envelope_passes_through_bare_values() {
        assert_eq!(decode_secret_envelope("plain").unwrap(), "plain");
    }

    #[test]
    fn substitute_tokens_replaces_known_fields() {
        let template = "Hello {{name}}, token={{token}}";
        let metadata = json!({"name": "alice", "token": "xyz"});
        assert_eq!(substitute_tokens(template, &metadata), "Hello alice, token=xyz");
    }

    #[test]
    fn substitute_tokens_leaves_unknown_fields_untouched() {
        let template = "Hello {{missing}}";
        let metadata = json!({"name": "alice"});
        assert_eq!(substitute_tokens(template, &metadata), "Hello {{missing}}");
    }
}
