//! Process entry point: loads configuration, builds the shared kernel
//! (job store, notifier, caches, failure sinks), and runs whichever
//! workers `SERVICES` names until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use merrymaker_core::config::{Config, ServiceKind};
use merrymaker_core::failure_notifier::FailureNotifier;
use merrymaker_core::jobs::{JobService, LeasePolicy, PostgresJobStore};
use merrymaker_core::kernel::cache::LruCache;
use merrymaker_core::kernel::{Notifier, ServiceHost};
use merrymaker_core::reaper::Reaper;
use merrymaker_core::rules::dispatcher::{AlertDispatcher, AlertRunner, StaticSecretResolver};
use merrymaker_core::rules::evaluators::{IocEvaluator, UnknownDomainEvaluator};
use merrymaker_core::rules::repos::{
    CachedAllowlistRepo, CachedAlertRepo, CachedIocRepo, PostgresEventRepo, PostgresSeenDomainRepo,
    PostgresSiteRepo, PostgresSinkRepo,
};
use merrymaker_core::rules::{Evaluator, RulesEngineRunner, RulesPipeline};
use merrymaker_core::scheduler::{PostgresScheduledTaskStore, Scheduler};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;

    let job_store = Arc::new(PostgresJobStore::new(pool.clone()));
    let notifier = Notifier::new();
    let lease_policy = LeasePolicy::new(Duration::from_secs(30));
    let failure_notifier = Arc::new(FailureNotifier::new());

    let job_service = Arc::new(JobService::new(
        job_store.clone(),
        notifier.clone(),
        lease_policy,
        failure_notifier,
    ));

    let mut host = ServiceHost::new();

    for service in &config.services {
        match service {
            ServiceKind::Scheduler => {
                let task_store = Arc::new(PostgresScheduledTaskStore::new(pool.clone()));
                let scheduler = Scheduler::new(
                    task_store,
                    job_store.clone(),
                    job_service.clone(),
                    config.scheduler.clone(),
                );
                host = host.with_service(Box::new(scheduler));
            }
            ServiceKind::Reaper => {
                let reaper = Reaper::new(job_store.clone(), pool.clone(), config.reaper.clone());
                host = host.with_service(Box::new(reaper));
            }
            ServiceKind::RulesEngine => {
                let events = Arc::new(PostgresEventRepo::new(pool.clone()));
                let sites = Arc::new(PostgresSiteRepo::new(pool.clone()));
                let sinks = Arc::new(PostgresSinkRepo::new(pool.clone()));
                let alert_dedupe_cache: Arc<dyn merrymaker_core::kernel::cache::Cache> =
                    Arc::new(LruCache::new(10_000));
                let allowlist_cache: Arc<dyn merrymaker_core::kernel::cache::Cache> = Arc::new(LruCache::new(10_000));
                let ioc_cache: Arc<dyn merrymaker_core::kernel::cache::Cache> = Arc::new(LruCache::new(1_000));

                let alerts = Arc::new(CachedAlertRepo::new(pool.clone(), alert_dedupe_cache));
                let allowlist = Arc::new(CachedAllowlistRepo::new(pool.clone(), allowlist_cache));
                let seen = Arc::new(PostgresSeenDomainRepo::new(pool.clone()));
                let iocs = Arc::new(CachedIocRepo::new(pool.clone(), ioc_cache));

                let evaluators: Vec<Arc<dyn Evaluator>> = vec![
                    Arc::new(UnknownDomainEvaluator::new(allowlist, seen)),
                    Arc::new(IocEvaluator::new(iocs)),
                ];

                let dispatcher = Arc::new(AlertDispatcher::new(sites.clone(), sinks, job_service.clone()));
                let pipeline = Arc::new(RulesPipeline::new(events, alerts, sites, evaluators, dispatcher));
                let runner = RulesEngineRunner::new(job_service.clone(), pipeline, config.rules_engine.job_lease);
                host = host.with_service(Box::new(runner));
            }
            ServiceKind::AlertRunner => {
                tracing::warn!(
                    "alert-runner is using a no-op secret resolver; wire a real SecretResolver from the owning deployment before enabling real webhook secrets"
                );
                let secrets = Arc::new(StaticSecretResolver::new(Default::default()));
                let runner = AlertRunner::new(job_service.clone(), secrets, config.alert_runner.job_lease);
                host = host.with_service(Box::new(runner));
            }
            ServiceKind::SecretRefreshRunner => {
                tracing::info!("secret-refresh-runner is a documented no-op in this crate");
            }
            ServiceKind::Http => {
                tracing::warn!("the worker-facing HTTP API is out of this crate's scope; skipping");
            }
        }
    }

    host.run_until_shutdown().await?;
    Ok(())
}
