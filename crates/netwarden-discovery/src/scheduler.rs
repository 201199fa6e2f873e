//! Poll scheduler: periodic and on-demand discovery runs
//!
//! Runs never overlap. While one is in flight, at most one more can be
//! pending; further triggers coalesce into that pending run.

use netwarden_core::inventory::Inventory;
use netwarden_core::snapshot::DeviceSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::poller::Poller;

/// Default period between scheduled runs (daily)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of asking for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new run was queued
    Queued,
    /// A run was already pending; this trigger folds into it
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Run once immediately when started
    pub poll_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            poll_on_start: false,
        }
    }
}

/// Drives [`Poller::poll_all`] over the inventory
pub struct Scheduler {
    poller: Poller,
    inventory: Arc<dyn Inventory>,
    config: SchedulerConfig,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<mpsc::Receiver<()>>>>,
    completed_runs: AtomicU64,
}

impl Scheduler {
    pub fn new(poller: Poller, inventory: Arc<dyn Inventory>, config: SchedulerConfig) -> Self {
        // One slot: the pending run
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            poller,
            inventory,
            config,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown_tx,
            task: Mutex::new(None),
            completed_runs: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of runs finished since creation
    pub fn completed_runs(&self) -> u64 {
        self.completed_runs.load(Ordering::SeqCst)
    }

    /// Ask for a run as soon as possible
    pub fn trigger_now(&self) -> TriggerOutcome {
        match self.trigger_tx.try_send(()) {
            Ok(()) => {
                debug!("Poll run queued");
                TriggerOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Poll run already pending");
                TriggerOutcome::Coalesced
            }
            // The receiver lives as long as the scheduler
            Err(mpsc::error::TrySendError::Closed(())) => TriggerOutcome::Coalesced,
        }
    }

    /// Poll every inventory device once, in the caller's task
    pub async fn run_once(&self) -> Vec<DeviceSnapshot> {
        let devices = self.inventory.list_devices().await;
        let snapshots = self.poller.poll_all(&devices).await;
        self.completed_runs.fetch_add(1, Ordering::SeqCst);
        snapshots
    }

    /// Start the background loop. Does nothing if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("Scheduler already running");
            return;
        }
        let Some(mut trigger_rx) = self.trigger_rx.lock().await.take() else {
            warn!("Scheduler trigger channel unavailable");
            return;
        };

        // Clear a stop request left over from a previous run
        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let scheduler = self.clone();
        let period = self.config.interval;

        info!(interval_secs = period.as_secs(), poll_on_start = self.config.poll_on_start, "Poll scheduler started");

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            if scheduler.config.poll_on_start {
                scheduler.run_once().await;
            }

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        info!("Scheduled poll run");
                        scheduler.run_once().await;
                    }
                    Some(()) = trigger_rx.recv() => {
                        info!("On-demand poll run");
                        scheduler.run_once().await;
                    }
                }
            }

            debug!("Poll scheduler loop exited");
            trigger_rx
        }));
    }

    /// Stop the background loop, waiting for an in-flight run to finish
    pub async fn stop(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            return;
        };
        self.shutdown_tx.send_replace(true);
        match handle.await {
            Ok(trigger_rx) => {
                *self.trigger_rx.lock().await = Some(trigger_rx);
            }
            Err(e) => warn!(error = %e, "Poll scheduler task failed"),
        }
        info!("Poll scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}
