//! The sync orchestrator.
//!
//! Drives one cycle across all enabled devices: each device gets an
//! independent worker (bounded by `max_parallel_devices`) that walks
//! the `attend-core` cycle state machine and executes the steps it
//! produces. One device's failure never aborts the cycle for others.
//!
//! The orchestrator is constructed with its collaborators (device
//! client, ledger, cursor store, settings); it holds no global state.

use crate::client::{DeviceClient, DeviceError, DeviceSession};
use crate::config::{DeviceDescriptor, Settings};
use crate::error::SyncError;
use crate::report::{CycleReport, DeviceOutcome, DeviceReport};
use attend_core::{merge, CycleEvent, CyclePhase, CycleStep, MergeInput, MergeOutcome};
use attend_store::{AppendOutcome, CursorStore, RecordLedger, SyncStatistics};
use attend_types::{DeviceInfo, SyncCursor};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Orchestrates sync cycles across all configured terminals.
#[derive(Clone)]
pub struct SyncOrchestrator {
    client: Arc<dyn DeviceClient>,
    ledger: Arc<dyn RecordLedger>,
    cursors: Arc<dyn CursorStore>,
    settings: Settings,
}

/// Result of probing one device with `test_connections`.
#[derive(Debug)]
pub struct ConnectionProbe {
    /// The probed device.
    pub descriptor: DeviceDescriptor,
    /// Metadata on success, the failure otherwise.
    pub result: Result<DeviceInfo, SyncError>,
}

impl SyncOrchestrator {
    /// Build an orchestrator from its collaborators.
    pub fn new(
        client: Arc<dyn DeviceClient>,
        ledger: Arc<dyn RecordLedger>,
        cursors: Arc<dyn CursorStore>,
        settings: Settings,
    ) -> Self {
        Self {
            client,
            ledger,
            cursors,
            settings,
        }
    }

    /// The orchestrator's settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one sync cycle across all enabled devices.
    ///
    /// Devices fan out concurrently up to `max_parallel_devices`; the
    /// call returns when every worker has fanned back in.
    pub async fn run_cycle(&self, devices: &[DeviceDescriptor]) -> CycleReport {
        let started_at = Utc::now();
        let enabled: Vec<_> = devices.iter().filter(|d| d.enabled).cloned().collect();

        if enabled.is_empty() {
            tracing::warn!("no enabled devices to sync");
        } else {
            tracing::info!(devices = enabled.len(), "starting sync cycle");
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_devices.max(1)));
        let mut workers = JoinSet::new();
        // Task id → device, so a panicked worker can still be reported
        // against its device.
        let mut spawned: HashMap<tokio::task::Id, attend_types::DeviceId> = HashMap::new();

        for descriptor in enabled {
            let orchestrator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let device_id = descriptor.device_id.clone();
            let handle = workers.spawn(async move {
                // Holding the Result keeps the permit alive for the
                // worker's lifetime.
                let _permit = semaphore.acquire_owned().await;
                let outcome = orchestrator.sync_device(&descriptor).await;
                DeviceReport {
                    device_id: descriptor.device_id.clone(),
                    outcome,
                }
            });
            spawned.insert(handle.id(), device_id);
        }

        let mut reports = Vec::new();
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    spawned.remove(&id);
                    reports.push(report);
                }
                Err(e) => {
                    tracing::error!("device worker panicked: {e}");
                    if let Some(device_id) = spawned.remove(&e.id()) {
                        reports.push(DeviceReport {
                            device_id,
                            outcome: DeviceOutcome::Failed {
                                reason: format!("worker panicked: {e}"),
                            },
                        });
                    }
                }
            }
        }
        reports.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            devices: reports,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            new_records = report.total_accepted(),
            "sync cycle completed"
        );
        report
    }

    /// Run a single on-demand cycle.
    pub async fn run_once(&self, devices: &[DeviceDescriptor]) -> CycleReport {
        tracing::info!("running on-demand sync");
        self.run_cycle(devices).await
    }

    /// Explicit maintenance: purge records past the retention horizon
    /// and log statistics. Never runs inside a sync cycle.
    pub async fn run_maintenance(&self) -> Result<SyncStatistics, SyncError> {
        let purged = self
            .ledger
            .purge_older_than(self.settings.data_retention_days)
            .await?;
        let stats = self.ledger.statistics().await?;
        tracing::info!(
            purged,
            total_records = stats.total_records,
            records_last_24h = stats.records_last_24h,
            duplicates_skipped = stats.duplicates_skipped,
            "maintenance completed"
        );
        Ok(stats)
    }

    /// Probe every enabled device: connect, fetch metadata, disconnect.
    pub async fn test_connections(&self, devices: &[DeviceDescriptor]) -> Vec<ConnectionProbe> {
        let mut probes = Vec::new();
        for descriptor in devices.iter().filter(|d| d.enabled) {
            let result = self.probe_device(descriptor).await;
            match &result {
                Ok(_) => tracing::info!(device = %descriptor.device_id, "connection test passed"),
                Err(e) => {
                    tracing::error!(device = %descriptor.device_id, error = %e, "connection test failed")
                }
            }
            probes.push(ConnectionProbe {
                descriptor: descriptor.clone(),
                result,
            });
        }
        probes
    }

    async fn probe_device(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<DeviceInfo, SyncError> {
        let session = self.connect_bounded(descriptor).await?;
        let info = session.info().await;
        if let Err(e) = session.disconnect().await {
            tracing::debug!(device = %descriptor.device_id, error = %e, "disconnect failed");
        }
        Ok(info?)
    }

    async fn connect_bounded(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn DeviceSession>, DeviceError> {
        tokio::time::timeout(
            self.settings.connect_timeout(),
            self.client.connect(descriptor),
        )
        .await
        .unwrap_or(Err(DeviceError::Timeout))
    }

    /// Sync one device by walking the cycle state machine.
    async fn sync_device(&self, descriptor: &DeviceDescriptor) -> DeviceOutcome {
        let device_id = &descriptor.device_id;

        let cursor = match self.cursors.get(device_id).await {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::error!(device = %device_id, error = %e, "cursor read failed");
                return DeviceOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        tracing::debug!(
            device = %device_id,
            last_sync = cursor.map(|c| c.last_seen.to_rfc3339()).unwrap_or_else(|| "never".into()),
            "syncing device"
        );

        let mut phase = CyclePhase::new();
        let mut pending: VecDeque<CycleStep> = VecDeque::new();
        let mut session: Option<Box<dyn DeviceSession>> = None;
        let mut fetched: Option<(HashMap<String, String>, Vec<attend_types::RawPunch>)> = None;
        let mut merged: Option<MergeOutcome> = None;
        let mut appended = AppendOutcome::default();

        let (next, steps) = phase.on_event(CycleEvent::CycleStarted, self.settings.max_retries);
        phase = next;
        pending.extend(steps);

        while let Some(step) = pending.pop_front() {
            let event = match step {
                CycleStep::Connect { attempt } => {
                    match self.connect_bounded(descriptor).await {
                        Ok(s) => {
                            session = Some(s);
                            CycleEvent::ConnectSucceeded
                        }
                        Err(e) => {
                            tracing::warn!(
                                device = %device_id, attempt, error = %e,
                                "connection attempt failed"
                            );
                            CycleEvent::ConnectFailed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
                CycleStep::RetryAfter { delay } => {
                    tokio::time::sleep(delay).await;
                    continue;
                }
                CycleStep::Fetch => match &session {
                    Some(open) => {
                        match open.logs(cursor.map(|c| c.last_seen)).await {
                            Ok(raw) => {
                                // User names are best-effort; the merge
                                // falls back to User_<id> for gaps.
                                let users = match open.users().await {
                                    Ok(users) => users
                                        .into_iter()
                                        .map(|u| (u.user_id.clone(), u.display_name()))
                                        .collect(),
                                    Err(e) => {
                                        tracing::warn!(
                                            device = %device_id, error = %e,
                                            "could not fetch user names"
                                        );
                                        HashMap::new()
                                    }
                                };
                                fetched = Some((users, raw));
                                CycleEvent::FetchSucceeded
                            }
                            Err(e) => {
                                self.close_session(&mut session, device_id).await;
                                CycleEvent::FetchFailed {
                                    error: e.to_string(),
                                }
                            }
                        }
                    }
                    None => CycleEvent::FetchFailed {
                        error: DeviceError::NotConnected.to_string(),
                    },
                },
                CycleStep::Merge => match &fetched {
                    Some((users, raw)) => {
                        let outcome = merge(&MergeInput {
                            device_id,
                            raw,
                            users,
                            cursor: cursor.map(|c| c.last_seen),
                        });
                        if outcome.clock_regression {
                            tracing::warn!(
                                device = %device_id,
                                "device reports only timestamps older than its cursor; \
                                 check the terminal clock"
                            );
                        }
                        let any_new = !outcome.accepted.is_empty();
                        merged = Some(outcome);
                        CycleEvent::MergeCompleted { any_new }
                    }
                    None => CycleEvent::FetchFailed {
                        error: "no fetched data to merge".into(),
                    },
                },
                CycleStep::Persist => match &merged {
                    Some(outcome) => match self.ledger.append(&outcome.accepted).await {
                        Ok(result) => {
                            appended = result;
                            CycleEvent::AppendSucceeded
                        }
                        Err(e) => {
                            tracing::error!(device = %device_id, error = %e, "ledger append failed");
                            CycleEvent::AppendFailed {
                                error: e.to_string(),
                            }
                        }
                    },
                    None => CycleEvent::AppendFailed {
                        error: "no merged batch to persist".into(),
                    },
                },
                CycleStep::AdvanceCursor => {
                    // A first sync that absorbed nothing still writes a
                    // cursor row (epoch last_seen), so last_synced_at
                    // records that the device was reached.
                    let last_seen = merged
                        .as_ref()
                        .and_then(|m| m.new_cursor)
                        .or(cursor.map(|c| c.last_seen))
                        .unwrap_or(chrono::DateTime::<Utc>::UNIX_EPOCH);
                    let next = SyncCursor::new(last_seen, Utc::now());
                    match self.cursors.advance(device_id, next).await {
                        Ok(()) => CycleEvent::CursorAdvanced,
                        Err(e) => {
                            tracing::error!(
                                device = %device_id, error = %e,
                                "cursor advance failed"
                            );
                            CycleEvent::CursorAdvanceFailed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
                CycleStep::Finish => {
                    self.close_session(&mut session, device_id).await;
                    let outcome = merged.unwrap_or_else(|| merge(&MergeInput {
                        device_id,
                        raw: &[],
                        users: &HashMap::new(),
                        cursor: None,
                    }));
                    let accepted = appended.inserted;
                    let skipped = outcome.duplicates() as u64 + appended.duplicates;
                    tracing::info!(
                        device = %device_id,
                        new_records = accepted,
                        duplicates = skipped,
                        "device synced"
                    );
                    return DeviceOutcome::Success {
                        records_accepted: accepted,
                        records_skipped_duplicate: skipped,
                        data_quality_issues: outcome.malformed as u64,
                        clock_regression: outcome.clock_regression,
                    };
                }
                CycleStep::Abort { reason } => {
                    self.close_session(&mut session, device_id).await;
                    tracing::error!(device = %device_id, reason = %reason, "device failed this cycle");
                    return DeviceOutcome::Failed { reason };
                }
            };

            let (next, steps) = phase.on_event(event, self.settings.max_retries);
            phase = next;
            pending.extend(steps);
        }

        // The machine always terminates a cycle with Finish or Abort;
        // running out of steps means a transition was rejected.
        DeviceOutcome::Failed {
            reason: "sync ended without completing".into(),
        }
    }

    async fn close_session(
        &self,
        session: &mut Option<Box<dyn DeviceSession>>,
        device_id: &attend_types::DeviceId,
    ) {
        if let Some(open) = session.take() {
            if let Err(e) = open.disconnect().await {
                tracing::debug!(device = %device_id, error = %e, "disconnect failed");
            }
        }
    }
}
