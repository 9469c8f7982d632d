//! Process configuration, loaded once at startup from the environment.
//!
//! Mirrors the `Config::from_env` pattern used across this codebase's
//! services: `.env` is loaded best-effort, required variables fail fast
//! with a descriptive message, optional variables fall back to documented
//! defaults.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Http,
    RulesEngine,
    Scheduler,
    Reaper,
    AlertRunner,
    SecretRefreshRunner,
}

impl ServiceKind {
    fn parse(raw: &str) -> Result<Self> {
        Ok(match raw.trim() {
            "http" => ServiceKind::Http,
            "rules-engine" => ServiceKind::RulesEngine,
            "scheduler" => ServiceKind::Scheduler,
            "reaper" => ServiceKind::Reaper,
            "alert-runner" => ServiceKind::AlertRunner,
            "secret-refresh-runner" => ServiceKind::SecretRefreshRunner,
            other => anyhow::bail!("unrecognised SERVICES entry: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunPolicy {
    Skip,
    Queue,
    Reschedule,
}

impl OverrunPolicy {
    fn parse(raw: &str) -> Result<Self> {
        Ok(match raw.trim() {
            "skip" => OverrunPolicy::Skip,
            "queue" => OverrunPolicy::Queue,
            "reschedule" => OverrunPolicy::Reschedule,
            other => anyhow::bail!("unrecognised SCHEDULER_OVERRUN: {other}"),
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OverrunStateMask: u8 {
        const RUNNING  = 0b001;
        const PENDING  = 0b010;
        const RETRYING = 0b100;
    }
}

impl OverrunStateMask {
    fn parse(raw: &str) -> Result<Self> {
        let mut mask = OverrunStateMask::empty();
        for entry in raw.split(',') {
            mask |= match entry.trim() {
                "running" => OverrunStateMask::RUNNING,
                "pending" => OverrunStateMask::PENDING,
                "retrying" => OverrunStateMask::RETRYING,
                "" => continue,
                other => anyhow::bail!("unrecognised SCHEDULER_OVERRUN_STATES entry: {other}"),
            };
        }
        Ok(mask)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: i64,
    pub overrun_policy: OverrunPolicy,
    pub overrun_state_mask: OverrunStateMask,
}

impl SchedulerConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            interval: parse_duration_secs("SCHEDULER_INTERVAL", 1)?,
            batch_size: parse_i64("SCHEDULER_BATCH_SIZE", 25)?.max(1),
            overrun_policy: match env::var("SCHEDULER_OVERRUN") {
                Ok(v) => OverrunPolicy::parse(&v)?,
                Err(_) => OverrunPolicy::Skip,
            },
            overrun_state_mask: match env::var("SCHEDULER_OVERRUN_STATES") {
                Ok(v) => OverrunStateMask::parse(&v)?,
                Err(_) => OverrunStateMask::RUNNING,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub pending_max_age: Duration,
    pub completed_max_age: Duration,
    pub failed_max_age: Duration,
    pub job_results_max_age: Duration,
    pub batch_size: i64,
}

impl ReaperConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            interval: parse_duration_secs("REAPER_INTERVAL", 300)?.max(Duration::from_secs(60)),
            pending_max_age: parse_duration_secs("REAPER_PENDING_MAX_AGE", 3600)?,
            completed_max_age: parse_duration_secs("REAPER_COMPLETED_MAX_AGE", 7 * 86400)?,
            failed_max_age: parse_duration_secs("REAPER_FAILED_MAX_AGE", 7 * 86400)?,
            job_results_max_age: parse_duration_secs("REAPER_JOB_RESULTS_MAX_AGE", 90 * 86400)?,
            batch_size: parse_i64("REAPER_BATCH_SIZE", 1000)?.clamp(1, 10_000),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RulesEngineConfig {
    pub batch_size: i64,
    pub job_lease: Duration,
    pub auto_enqueue: bool,
}

impl RulesEngineConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            batch_size: parse_i64("RULES_ENGINE_BATCH_SIZE", 100)?.max(1),
            job_lease: parse_duration_secs("RULES_ENGINE_JOB_LEASE", 30)?,
            auto_enqueue: parse_bool("RULES_ENGINE_AUTO_ENQUEUE", true)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AlertRunnerConfig {
    pub concurrency: usize,
    pub job_lease: Duration,
}

impl AlertRunnerConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            concurrency: parse_i64("ALERT_RUNNER_CONCURRENCY", 2)?.max(1) as usize,
            job_lease: parse_duration_secs("ALERT_RUNNER_JOB_LEASE", 30)?
                .max(Duration::from_secs(5)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub services: Vec<ServiceKind>,
    pub scheduler: SchedulerConfig,
    pub reaper: ReaperConfig,
    pub rules_engine: RulesEngineConfig,
    pub alert_runner: AlertRunnerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let services = match env::var("SERVICES") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ServiceKind::parse)
                .collect::<Result<Vec<_>>>()?,
            Err(_) => vec![
                ServiceKind::Scheduler,
                ServiceKind::Reaper,
                ServiceKind::RulesEngine,
                ServiceKind::AlertRunner,
            ],
        };

        Ok(Self {
            database_url,
            services,
            scheduler: SchedulerConfig::from_env()?,
            reaper: ReaperConfig::from_env()?,
            rules_engine: RulesEngineConfig::from_env()?,
            alert_runner: AlertRunnerConfig::from_env()?,
        })
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw.parse::<i64>().with_context(|| format!("{key} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn parse_duration_secs(key: &str, default_secs: u64) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw.parse().with_context(|| format!("{key} must be an integer number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => anyhow::bail!("{key} must be a boolean, got {other}"),
        },
        Err(_) => Ok(default),
    }
}
