//! Cycle reporting surface.

use attend_types::DeviceId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one full orchestrator pass across all enabled devices.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// When the cycle began.
    pub started_at: DateTime<Utc>,
    /// When the last device worker finished.
    pub finished_at: DateTime<Utc>,
    /// Per-device results, ordered by device id.
    pub devices: Vec<DeviceReport>,
}

/// One device's result within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    /// The device.
    pub device_id: DeviceId,
    /// What happened.
    pub outcome: DeviceOutcome,
}

/// Per-device cycle outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum DeviceOutcome {
    /// The device synced; a pass with zero new records still counts.
    Success {
        /// New records durably appended.
        records_accepted: u64,
        /// Records skipped as duplicates (cursor filter, in-batch, or
        /// ledger key conflict).
        records_skipped_duplicate: u64,
        /// Malformed entries dropped during merge.
        data_quality_issues: u64,
        /// The terminal's newest record predates the cursor; likely a
        /// device clock fault needing operator attention.
        clock_regression: bool,
    },
    /// The device failed this cycle; retried fresh next cycle.
    Failed {
        /// Why.
        reason: String,
    },
}

impl DeviceOutcome {
    /// Whether this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl CycleReport {
    /// Number of devices that synced successfully.
    pub fn succeeded(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.outcome.is_success())
            .count()
    }

    /// Number of devices that failed.
    pub fn failed(&self) -> usize {
        self.devices.len() - self.succeeded()
    }

    /// Total new records appended across all devices.
    pub fn total_accepted(&self) -> u64 {
        self.devices
            .iter()
            .map(|d| match d.outcome {
                DeviceOutcome::Success {
                    records_accepted, ..
                } => records_accepted,
                DeviceOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}
