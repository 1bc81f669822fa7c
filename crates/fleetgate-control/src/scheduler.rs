//! Background loop lifecycle
//!
//! Runs the health prober and the state reconciler on their own intervals.
//! A cycle always runs to completion; stopping cancels the loops between
//! cycles and waits for the current ones to finish.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prober::HealthProber;
use crate::reconciler::StateReconciler;
use crate::task_tracker::TaskTracker;
use crate::Fleet;

const PROBE_TASK: &str = "health-prober";
const SYNC_TASK: &str = "state-reconciler";

pub struct Scheduler {
    fleet: Fleet,
    token: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(fleet: Fleet) -> Self {
        Self {
            fleet,
            token: Mutex::new(CancellationToken::new()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tracker.is_empty()
    }

    /// Spawn the background loops; must be called within a tokio runtime
    pub fn start(&self) {
        if self.is_running() {
            warn!("Scheduler already running");
            return;
        }

        let token = {
            let mut guard = self.token.lock().unwrap_or_else(|p| p.into_inner());
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };

        let config = &self.fleet.config;
        self.tracker.register(
            PROBE_TASK,
            tokio::spawn(probe_loop(
                self.fleet.prober(),
                config.probe_interval,
                token.clone(),
            )),
        );
        self.tracker.register(
            SYNC_TASK,
            tokio::spawn(sync_loop(
                self.fleet.reconciler(),
                config.sync_interval,
                token,
            )),
        );

        info!(
            "Scheduler started (probe every {:?}, sync every {:?})",
            config.probe_interval, config.sync_interval
        );
    }

    /// Cancel the loops and wait until in-flight cycles have finished
    pub async fn stop(&self) {
        self.token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
        self.tracker.drain().await;
        info!("Scheduler stopped");
    }
}

async fn probe_loop(prober: HealthProber, period: Duration, token: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let report = prober.run_cycle().await;
                debug!(?report, "Probe cycle finished");
            }
        }
    }

    debug!("{} exited", PROBE_TASK);
}

async fn sync_loop(reconciler: StateReconciler, period: Duration, token: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let report = reconciler.run_cycle().await;
                debug!(?report, "Reconcile cycle finished");
            }
        }
    }

    debug!("{} exited", SYNC_TASK);
}
