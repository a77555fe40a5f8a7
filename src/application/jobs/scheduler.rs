//! Periodic driver for [`CounterSync`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::counter_sync::CounterSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running,
    Stopped,
}

/// Owns the background reconciliation task.
pub struct CounterSyncHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SyncState>,
    task: JoinHandle<()>,
}

impl CounterSyncHandle {
    /// Request shutdown. An in-flight cycle finishes first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(
                target = "modverse::jobs::counter_sync",
                error = %err,
                "Counter sync task ended abnormally"
            );
        }
    }
}

impl CounterSync {
    /// Spawn the periodic loop. Cancelling `parent` also stops it.
    pub fn start(self: Arc<Self>, parent: &CancellationToken) -> CounterSyncHandle {
        let cancel = parent.child_token();
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let period = self.config().interval;

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            info!(
                target = "modverse::jobs::counter_sync",
                interval_secs = period.as_secs(),
                pattern = %self.config().key_pattern,
                lock = self.config().enable_lock,
                "Counter sync started"
            );

            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; wait a full period instead.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                state_tx.send_replace(SyncState::Running);
                let report = self.run_cycle().await;
                debug!(
                    target = "modverse::jobs::counter_sync",
                    completed = report.is_some(),
                    "Counter sync tick handled"
                );
                state_tx.send_replace(SyncState::Idle);
            }

            state_tx.send_replace(SyncState::Stopped);
            info!(
                target = "modverse::jobs::counter_sync",
                "Counter sync stopped"
            );
        });

        CounterSyncHandle {
            cancel,
            state: state_rx,
            task,
        }
    }
}
