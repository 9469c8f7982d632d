//! Per-process fan-out from "a job was inserted" to any number of local
//! reservation loops waiting on that job type.
//!
//! Grounded on the shape of a topic-keyed pub/sub hub, but deliberately
//! not built on a `broadcast` channel: broadcast fans one message to every
//! receiver and backpressures production on the slowest lagging one. Here
//! each subscriber gets its own single-slot channel; a full slot just means
//! a wakeup got coalesced, which is always safe because callers treat a
//! wakeup as advisory and reserve afterwards regardless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::jobs::model::JobType;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_WAIT_WINDOW: Duration = Duration::from_secs(60);

struct Registry {
    subscribers: HashMap<JobType, Vec<mpsc::Sender<()>>>,
}

/// Handle returned by [`Notifier::subscribe`]. Dropping it does not
/// unsubscribe; call [`Subscription::unsubscribe`] explicitly, mirroring
/// how the reservation loop tears down its subscription only once it is
/// about to wait again.
pub struct Subscription {
    job_type: JobType,
    receiver: mpsc::Receiver<()>,
    notifier: Notifier,
}

impl Subscription {
    /// Waits for a notification, a self-healing backoff tick, or
    /// cancellation, whichever comes first.
    pub async fn wait(&mut self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = self.receiver.recv() => {}
            _ = tokio::time::sleep(DEFAULT_BACKOFF) => {}
            _ = shutdown.cancelled() => {}
        }
    }

    /// Waits up to `wait_window` (bounded by [`DEFAULT_WAIT_WINDOW`]) for a
    /// notification, returning `true` if one arrived before the window or
    /// cancellation elapsed.
    pub async fn wait_bounded(&mut self, wait_window: Duration, shutdown: &CancellationToken) -> bool {
        let window = wait_window.min(DEFAULT_WAIT_WINDOW);
        tokio::select! {
            _ = self.receiver.recv() => true,
            _ = tokio::time::sleep(window) => false,
            _ = shutdown.cancelled() => false,
        }
    }

    pub async fn unsubscribe(mut self) {
        self.receiver.close();
        self.notifier.prune_closed(self.job_type).await;
    }
}

/// Cheaply cloneable handle to the per-process notification hub.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Mutex<Registry>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Registers a new subscriber for `job_type` and returns a handle that
    /// can be awaited for wakeups.
    pub async fn subscribe(&self, job_type: JobType) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let mut registry = self.inner.lock().await;
        registry.subscribers.entry(job_type).or_default().push(tx);
        Subscription {
            job_type,
            receiver: rx,
            notifier: self.clone(),
        }
    }

    /// Signals every subscriber of `job_type` that a new job may be ready.
    /// Non-blocking: a subscriber whose slot is already full simply misses
    /// this particular wakeup and relies on its backoff tick instead.
    pub async fn notify(&self, job_type: JobType) {
        let registry = self.inner.lock().await;
        if let Some(subs) = registry.subscribers.get(&job_type) {
            for sub in subs {
                let _ = sub.try_send(());
            }
        }
    }

    /// Drops every registered subscriber sender, which closes their
    /// receivers and unblocks any `wait`/`wait_bounded` calls in progress.
    pub async fn stop_all(&self) {
        let mut registry = self.inner.lock().await;
        registry.subscribers.clear();
    }

    async fn prune_closed(&self, job_type: JobType) {
        let mut registry = self.inner.lock().await;
        if let Some(subs) = registry.subscribers.get_mut(&job_type) {
            subs.retain(|tx| !tx.is_closed());
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn notify_wakes_a_waiting_subscriber() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe(JobType::Browser).await;
        let shutdown = CancellationToken::new();

        notifier.notify(JobType::Browser).await;
        let woke = sub.wait_bounded(Duration::from_millis(50), &shutdown).await;
        assert!(woke);
    }

    #[tokio::test]
    async fn notify_does_not_cross_job_types() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe(JobType::Browser).await;
        let shutdown = CancellationToken::new();

        notifier.notify(JobType::Rules).await;
        let woke = sub.wait_bounded(Duration::from_millis(20), &shutdown).await;
        assert!(!woke);
    }

    #[tokio::test]
    async fn repeated_notifies_coalesce_to_one_wakeup() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe(JobType::Browser).await;
        let shutdown = CancellationToken::new();

        notifier.notify(JobType::Browser).await;
        notifier.notify(JobType::Browser).await;
        notifier.notify(JobType::Browser).await;

        assert!(sub.wait_bounded(Duration::from_millis(50), &shutdown).await);
        // second wait should time out to the backoff window, not find a
        // second queued signal, confirming the slot truly coalesced.
        assert!(!sub.wait_bounded(Duration::from_millis(20), &shutdown).await);
    }

    #[tokio::test]
    async fn cancellation_unblocks_wait() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe(JobType::Alert).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let woke = sub.wait_bounded(Duration::from_secs(5), &shutdown).await;
        assert!(!woke);
    }
}
