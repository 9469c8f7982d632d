//! Event, Alert and the small supporting value types the rules pipeline
//! and its evaluators pass between each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub should_process: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_rule_type", rename_all = "snake_case")]
pub enum AlertRuleType {
    UnknownDomain,
    IocDomain,
    Yara,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Dispatched,
    Failed,
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub site_id: Uuid,
    pub rule_type: AlertRuleType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub metadata: serde_json::Value,
    /// The de-duplication target, e.g. the domain or IOC host. Combined
    /// with `(site_id, rule_type)` for the 24h alert-dedupe window.
    pub target: String,
    pub delivery_status: DeliveryStatus,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// An evaluator's description of an alert to create, distinct from the
/// persisted [`Alert`] row: an evaluator never writes to storage itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub rule_type: AlertRuleType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub metadata: serde_json::Value,
    /// The de-duplication target, e.g. the domain or IOC host. Combined
    /// with `(site_id, rule_type)` for the 24h alert-dedupe window.
    pub target: String,
}

/// Per-event unit passed to an [`crate::rules::evaluators::Evaluator`]:
/// the already-extracted domain/host plus enough scan context to decide
/// whether an intent should fire.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub site_id: Uuid,
    pub scope: String,
    pub domain: String,
    pub alert_mode: crate::site::AlertMode,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResults {
    pub domains_processed: u64,
    pub events_skipped: u64,
    pub alerts_created: u64,
    pub errors_encountered: u64,
    pub alert_mode: crate::site::AlertMode,
}
