//! Externally-owned entities this crate only reads.
//!
//! Sites, sources and HTTP alert sinks are created and edited through the
//! (out-of-scope) admin surface; the core only needs enough of their shape
//! to route jobs and alerts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_mode", rename_all = "snake_case")]
pub enum AlertMode {
    Active,
    Muted,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub scope: String,
    pub alert_mode: AlertMode,
    pub http_alert_sink_id: Option<Uuid>,
    pub source_id: Uuid,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct HttpAlertSink {
    pub id: Uuid,
    pub method: String,
    pub uri: String,
    pub body_template: String,
    pub headers_template: serde_json::Value,
    pub secret_names: Vec<String>,
    pub ok_status: i32,
    pub retry: i32,
}
