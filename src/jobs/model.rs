//! The Job row and its supporting enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::Id;

pub struct JobMarker;
pub type JobId = Id<JobMarker>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
pub enum JobType {
    Browser,
    Rules,
    Alert,
    SecretRefresh,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Browser => "browser",
            JobType::Rules => "rules",
            JobType::Alert => "alert",
            JobType::SecretRefresh => "secret_refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Coarse taxonomy attached to a terminal or retried failure. Distinct
/// from [`crate::error::ErrorKind`], which classifies *this crate's*
/// operations; `ErrorClass` classifies *job outcomes* reported by whatever
/// worker executed the job and is free-form enough to cover browser
/// script failures that never touch this crate's own error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "error_class", rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    NetworkError,
    ScriptError,
    ReaperStale,
    Unknown,
}

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize, sqlx::FromRow)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = JobId::new_v7())]
    pub id: JobId,
    pub job_type: JobType,
    #[builder(default)]
    pub status: JobStatus,
    pub payload: serde_json::Value,
    #[builder(default = 0)]
    pub priority: i32,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_class: Option<ErrorClass>,
    #[builder(default, setter(strip_option))]
    pub site_id: Option<Uuid>,
    #[builder(default, setter(strip_option))]
    pub scheduled_fire_key: Option<String>,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default = false)]
    pub test_run: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// The error-message storage limit named in the Job Store's `fail`
/// contract.
pub const ERROR_MESSAGE_MAX_BYTES: usize = 4096;

pub fn truncate_error_message(message: &str) -> String {
    if message.len() <= ERROR_MESSAGE_MAX_BYTES {
        return message.to_string();
    }
    let mut end = ERROR_MESSAGE_MAX_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub completed_last_24h: i64,
    pub failed_last_24h: i64,
    pub avg_duration_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_message_keeps_short_strings_intact() {
        assert_eq!(truncate_error_message("boom"), "boom");
    }

    #[test]
    fn truncate_error_message_bounds_long_strings() {
        let long = "x".repeat(ERROR_MESSAGE_MAX_BYTES + 500);
        assert_eq!(truncate_error_message(&long).len(), ERROR_MESSAGE_MAX_BYTES);
    }

    #[test]
    fn new_job_defaults_are_pending_with_zero_retries() {
        let job = Job::builder()
            .job_type(JobType::Rules)
            .payload(serde_json::json!({}))
            .build();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(!job.is_terminal());
    }
}
