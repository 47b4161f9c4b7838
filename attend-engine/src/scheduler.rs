//! Recurring sync scheduling.
//!
//! Runs a cycle immediately on start, then every `sync_interval`. The
//! schedule is cancellable: `stop` interrupts the wait (not a running
//! cycle, which finishes first) and joins the task.

use crate::config::DeviceDescriptor;
use crate::orchestrator::SyncOrchestrator;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running recurring-sync task.
pub struct SyncScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start the recurring schedule on the current runtime.
    ///
    /// The first cycle runs immediately; subsequent cycles fire every
    /// `sync_interval`. A cycle that overruns the interval delays the
    /// next tick instead of stacking cycles.
    pub fn start(orchestrator: SyncOrchestrator, devices: Vec<DeviceDescriptor>) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let interval = orchestrator.settings().sync_interval();

        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "sync schedule started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.run_cycle(&devices).await;
                    }
                    _ = rx.changed() => {
                        tracing::info!("sync schedule stopped");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Whether the schedule task is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the schedule and wait for the task to exit.
    ///
    /// A cycle in flight completes before the task exits.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
