//! Cleanup scheduler
//!
//! Periodic background reclamation of expired, non-main branches. One
//! supervising loop per process; `stop` joins the loop so no cleanup work is
//! in flight when it returns.

use crate::config::CleanupConfig;
use crate::lifecycle::{BranchManager, SYSTEM_ACTOR};
use crate::router::BranchRouter;
use crate::store::MetadataStore;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct CleanupScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MetadataStore>,
    router: Arc<BranchRouter>,
    manager: Arc<BranchManager>,
    config: CleanupConfig,
    running: Mutex<bool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        router: Arc<BranchRouter>,
        manager: Arc<BranchManager>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                router,
                manager,
                config,
                running: Mutex::new(false),
                shutdown: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the supervising loop. Calling `start` while already running is
    /// a no-op.
    pub async fn start(&self) {
        let mut running = self.inner.running.lock().await;
        if *running {
            debug!("cleanup scheduler already running");
            return;
        }
        *running = true;

        let (tx, mut rx) = watch::channel(false);
        *self.inner.shutdown.lock().await = Some(tx);

        let scheduler = self.clone();
        let startup_delay = self.inner.config.startup_delay;
        let interval = self.inner.config.interval;

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(startup_delay) => {}
                _ = rx.changed() => {
                    debug!("cleanup scheduler cancelled during warm-up");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; consume that tick so the first
            // pass follows the warm-up delay, not the delay plus zero
            ticker.tick().await;

            loop {
                scheduler.cleanup(Some(&rx)).await;

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = rx.changed() => break,
                }
            }
        });

        *self.inner.handle.lock().await = Some(handle);
        info!(
            interval_secs = interval.as_secs(),
            startup_delay_secs = startup_delay.as_secs(),
            "cleanup scheduler started"
        );
    }

    /// Cancel the loop and wait for it to exit. No cleanup work is in flight
    /// once `stop` returns.
    pub async fn stop(&self) {
        let sender = self.inner.shutdown.lock().await.take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }

        let handle = self.inner.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "cleanup loop join failed");
            }
        }

        *self.inner.running.lock().await = false;
        info!("cleanup scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.inner.running.lock().await
    }

    /// Fire-and-forget immediate pass, out of band with the ticker
    pub fn run_now(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.cleanup(None).await;
        });
    }

    /// One reclamation pass: tear down every expired branch, tallying
    /// outcomes. One branch's failure never stops the rest; cancellation is
    /// honoured between branches.
    pub async fn cleanup(&self, shutdown: Option<&watch::Receiver<bool>>) -> CleanupOutcome {
        let expired = match self.inner.store.get_expired_branches().await {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "failed to query expired branches");
                return CleanupOutcome::default();
            }
        };

        if expired.is_empty() {
            debug!("no expired branches");
            return CleanupOutcome::default();
        }

        info!(count = expired.len(), "reclaiming expired branches");
        let mut outcome = CleanupOutcome::default();

        for branch in expired {
            if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
                debug!("cleanup interrupted by shutdown");
                break;
            }

            // best-effort pool teardown; deletion closes it again anyway
            self.inner.router.close_pool(&branch.slug).await;

            match self.inner.manager.delete_branch(branch.id, SYSTEM_ACTOR).await {
                Ok(()) => {
                    info!(slug = %branch.slug, "expired branch deleted");
                    outcome.deleted += 1;
                }
                Err(e) => {
                    warn!(slug = %branch.slug, error = %e, "failed to delete expired branch");
                    outcome.failed += 1;
                }
            }
        }

        info!(deleted = outcome.deleted, failed = outcome.failed, "cleanup pass complete");
        outcome
    }
}
