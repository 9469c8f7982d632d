//! The Scheduled Task row: a recurring specification that mints fresh
//! jobs at a cadence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::config::{OverrunPolicy, OverrunStateMask};

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize, sqlx::FromRow)]
#[builder(field_defaults(setter(into)))]
pub struct ScheduledTask {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub interval_seconds: i64,
    #[builder(default, setter(strip_option))]
    pub last_queued_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub overrun_policy: Option<OverrunPolicyColumn>,
    #[builder(default, setter(strip_option))]
    pub overrun_state_mask: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub active_fire_key: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Storage-level mirror of [`OverrunPolicy`], kept distinct so the
/// scheduler module (which needs serde/sqlx on its config type) does not
/// force those derives onto the env-parsed `config` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "overrun_policy", rename_all = "snake_case")]
pub enum OverrunPolicyColumn {
    Skip,
    Queue,
    Reschedule,
}

impl From<OverrunPolicy> for OverrunPolicyColumn {
    fn from(value: OverrunPolicy) -> Self {
        match value {
            OverrunPolicy::Skip => OverrunPolicyColumn::Skip,
            OverrunPolicy::Queue => OverrunPolicyColumn::Queue,
            OverrunPolicy::Reschedule => OverrunPolicyColumn::Reschedule,
        }
    }
}

impl From<OverrunPolicyColumn> for OverrunPolicy {
    fn from(value: OverrunPolicyColumn) -> Self {
        match value {
            OverrunPolicyColumn::Skip => OverrunPolicy::Skip,
            OverrunPolicyColumn::Queue => OverrunPolicy::Queue,
            OverrunPolicyColumn::Reschedule => OverrunPolicy::Reschedule,
        }
    }
}

impl ScheduledTask {
    /// A task is due iff it has never been queued, or its interval has
    /// elapsed since it was last queued.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_queued_at {
            None => true,
            Some(last) => last + chrono::Duration::seconds(self.interval_seconds) <= now,
        }
    }

    pub fn effective_overrun_mask(&self, default_mask: OverrunStateMask) -> OverrunStateMask {
        match self.overrun_state_mask {
            Some(raw) => OverrunStateMask::from_bits_truncate(raw as u8),
            None => default_mask,
        }
    }

    pub fn effective_overrun_policy(&self, default_policy: OverrunPolicy) -> OverrunPolicy {
        match self.overrun_policy {
            Some(col) => col.into(),
            None => default_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_queued_task_is_due() {
        let task = ScheduledTask::builder()
            .task_name("site:a")
            .payload(serde_json::json!({}))
            .interval_seconds(60)
            .build();
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn recently_queued_task_is_not_due() {
        let mut task = ScheduledTask::builder()
            .task_name("site:a")
            .payload(serde_json::json!({}))
            .interval_seconds(60)
            .build();
        task.last_queued_at = Some(Utc::now());
        assert!(!task.is_due(Utc::now()));
    }

    #[test]
    fn task_becomes_due_once_interval_elapses() {
        let mut task = ScheduledTask::builder()
            .task_name("site:a")
            .payload(serde_json::json!({}))
            .interval_seconds(60)
            .build();
        task.last_queued_at = Some(Utc::now() - chrono::Duration::seconds(61));
        assert!(task.is_due(Utc::now()));
    }
}
