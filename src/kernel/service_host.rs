//! A minimal service runtime: each long-running worker (scheduler, reaper,
//! rules engine, alert runner) implements [`Service`] and is driven to
//! completion or cancellation by a [`ServiceHost`].
//!
//! `ServiceHost` owns the root `CancellationToken`; Ctrl-C (or an explicit
//! `shutdown()` call) cancels it, and every registered service is given up
//! to a grace period to wind down before the host returns.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;

/// A long-running background worker.
#[async_trait]
pub trait Service: Send {
    /// A short, stable name used in logs.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled or the service exits on its own
    /// (an unexpected early return is logged as an error but does not
    /// bring down the other services).
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

pub struct ServiceHost {
    shutdown: CancellationToken,
    services: Vec<Box<dyn Service>>,
    grace_period: Duration,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            services: Vec::new(),
            grace_period: Duration::from_secs(30),
        }
    }

    pub fn with_service(mut self, service: Box<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs every registered service until shutdown is requested (via
    /// `ctrl_c` or [`ServiceHost::shutdown_token`]), then waits up to the
    /// configured grace period for them to finish.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let mut set = JoinSet::new();

        for service in self.services {
            let name = service.name();
            let token = shutdown.clone();
            set.spawn(async move {
                let result = service.run(token).await;
                (name, result)
            });
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, stopping services");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }

        let grace = self.grace_period;
        tokio::select! {
            _ = drain(&mut set) => {}
            _ = tokio::time::sleep(grace) => {
                warn!("grace period elapsed with services still running");
            }
        }

        Ok(())
    }
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain(set: &mut JoinSet<(&'static str, Result<()>)>) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!(service = name, "service stopped cleanly"),
            Ok((name, Err(err))) => error!(service = name, error = %err, "service exited with error"),
            Err(join_err) => error!(error = %join_err, "service task panicked"),
        }
    }
}
