//! Postgres-backed implementations of the small repository traits the
//! rules pipeline and evaluators depend on. Each read-mostly repo is
//! wrapped with the [`Cache`] layer at construction time; the repo itself
//! only ever talks to Postgres.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::kernel::cache::Cache;
use crate::rules::dispatcher::SinkRepo;
use crate::rules::evaluators::{AllowlistRepo, IocEntry, IocRepo, IocType, SeenDomainRepo};
use crate::rules::model::{Alert, Event};
use crate::rules::pipeline::{AlertRepo, EventRepo, SiteRepo};
use crate::site::{HttpAlertSink, Site};

const ALERT_DEDUPE_TTL: Duration = Duration::from_secs(24 * 3600);
const ALLOWLIST_TTL: Duration = Duration::from_secs(5 * 60);
const IOC_TTL: Duration = Duration::from_secs(5 * 60);

pub struct PostgresEventRepo {
    pool: PgPool,
}

impl PostgresEventRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepo for PostgresEventRepo {
    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn mark_processed_by_ids(&self, ids: &[Uuid]) -> Result<()> {
        sqlx::query("UPDATE events SET processed_at = now() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_batch(&self, events: Vec<crate::rules::ingest::NewEvent>) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let row: (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO events (session_id, event_type, event_data, should_process)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(event.session_id)
            .bind(&event.event_type)
            .bind(&event.event_data)
            .bind(event.should_process)
            .fetch_one(&self.pool)
            .await?;
            ids.push(row.0);
        }
        Ok(ids)
    }
}

pub struct PostgresSiteRepo {
    pool: PgPool,
}

impl PostgresSiteRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteRepo for PostgresSiteRepo {
    async fn get(&self, site_id: Uuid) -> Result<Option<Site>> {
        let row = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = $1")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

pub struct PostgresSinkRepo {
    pool: PgPool,
}

impl PostgresSinkRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SinkRepo for PostgresSinkRepo {
    async fn get(&self, sink_id: Uuid) -> Result<Option<HttpAlertSink>> {
        let row = sqlx::query_as::<_, HttpAlertSink>("SELECT * FROM http_alert_sinks WHERE id = $1")
            .bind(sink_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

/// Inserts alerts one at a time, suppressing any whose
/// `(site_id, rule_type, target)` was already seen within the dedupe
/// cache's 24h window.
pub struct CachedAlertRepo {
    pool: PgPool,
    dedupe_cache: Arc<dyn Cache>,
}

impl CachedAlertRepo {
    pub fn new(pool: PgPool, dedupe_cache: Arc<dyn Cache>) -> Self {
        Self { pool, dedupe_cache }
    }

    fn dedupe_key(alert: &Alert) -> String {
        format!("alert-dedupe:{}:{:?}:{}", alert.site_id, alert.rule_type, alert.target)
    }
}

#[async_trait]
impl AlertRepo for CachedAlertRepo {
    async fn create_batch(&self, alerts: Vec<Alert>) -> Result<Vec<Alert>> {
        let mut inserted = Vec::with_capacity(alerts.len());

        for alert in alerts {
            let key = Self::dedupe_key(&alert);
            let is_new = self.dedupe_cache.set_if_absent(&key, vec![1], ALERT_DEDUPE_TTL).await?;
            if !is_new {
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO alerts (
                    id, site_id, rule_type, severity, title, description,
                    metadata, target, delivery_status, fired_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(alert.id)
            .bind(alert.site_id)
            .bind(alert.rule_type)
            .bind(format!("{:?}", alert.severity).to_lowercase())
            .bind(&alert.title)
            .bind(&alert.description)
            .bind(&alert.metadata)
            .bind(&alert.target)
            .bind(alert.delivery_status)
            .bind(alert.fired_at)
            .execute(&self.pool)
            .await?;

            inserted.push(alert);
        }

        Ok(inserted)
    }
}

pub struct CachedAllowlistRepo {
    pool: PgPool,
    cache: Arc<dyn Cache>,
}

impl CachedAllowlistRepo {
    pub fn new(pool: PgPool, cache: Arc<dyn Cache>) -> Self {
        Self { pool, cache }
    }
}

#[async_trait]
impl AllowlistRepo for CachedAllowlistRepo {
    async fn is_allowlisted(&self, scope: &str, domain: &str) -> Result<bool> {
        let key = format!("allowlist:{scope}:{domain}");
        if let Some(cached) = self.cache.get(&key).await? {
            return Ok(cached == [1]);
        }

        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM allow_list WHERE scope = $1 AND value = $2")
            .bind(scope)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;

        let found = row.is_some();
        self.cache.set(&key, vec![if found { 1 } else { 0 }], ALLOWLIST_TTL).await?;
        Ok(found)
    }
}

pub struct PostgresSeenDomainRepo {
    pool: PgPool,
}

impl PostgresSeenDomainRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeenDomainRepo for PostgresSeenDomainRepo {
    async fn has_seen(&self, scope: &str, domain: &str) -> Result<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM seen_strings WHERE scope = $1 AND value = $2")
            .bind(scope)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_seen(&self, scope: &str, domain: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO seen_strings (scope, value) VALUES ($1, $2) ON CONFLICT (scope, value) DO NOTHING",
        )
        .bind(scope)
        .bind(domain)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct CachedIocRepo {
    pool: PgPool,
    cache: Arc<dyn Cache>,
}

impl CachedIocRepo {
    pub fn new(pool: PgPool, cache: Arc<dyn Cache>) -> Self {
        Self { pool, cache }
    }
}

#[async_trait]
impl IocRepo for CachedIocRepo {
    async fn enabled_entries(&self) -> Result<Vec<IocEntry>> {
        const CACHE_KEY: &str = "iocs:enabled";

        if let Some(cached) = self.cache.get(CACHE_KEY).await? {
            if let Ok(entries) = serde_json::from_slice::<Vec<CachedIoc>>(&cached) {
                return Ok(entries.into_iter().map(Into::into).collect());
            }
        }

        let rows = sqlx::query_as::<_, IocRow>("SELECT ioc_type, value, enabled FROM iocs WHERE enabled = true")
            .fetch_all(&self.pool)
            .await?;

        let entries: Vec<IocEntry> = rows.into_iter().map(Into::into).collect();

        let cacheable: Vec<CachedIoc> = entries.iter().map(CachedIoc::from).collect();
        if let Ok(bytes) = serde_json::to_vec(&cacheable) {
            self.cache.set(CACHE_KEY, bytes, IOC_TTL).await?;
        }

        Ok(entries)
    }
}

#[derive(sqlx::FromRow)]
struct IocRow {
    ioc_type: String,
    value: String,
    enabled: bool,
}

impl From<IocRow> for IocEntry {
    fn from(row: IocRow) -> Self {
        IocEntry {
            ioc_type: if row.ioc_type == "ip" { IocType::Ip } else { IocType::Fqdn },
            value: row.value,
            enabled: row.enabled,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedIoc {
    ioc_type: String,
    value: String,
    enabled: bool,
}

impl From<&IocEntry> for CachedIoc {
    fn from(entry: &IocEntry) -> Self {
        Self {
            ioc_type: match entry.ioc_type {
                IocType::Ip => "ip".to_string(),
                IocType::Fqdn => "fqdn".to_string(),
            },
            value: entry.value.clone(),
            enabled: entry.enabled,
        }
    }
}

impl From<CachedIoc> for IocEntry {
    fn from(cached: CachedIoc) -> Self {
        IocEntry {
            ioc_type: if cached.ioc_type == "ip" { IocType::Ip } else { IocType::Fqdn },
            value: cached.value,
            enabled: cached.enabled,
        }
    }
}
