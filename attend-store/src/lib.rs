//! # attend-store
//!
//! Durable state for the attendance sync engine: an append-only punch
//! ledger and a per-device cursor map, both backed by one SQLite
//! database and readable independently for troubleshooting tooling.
//!
//! The ledger append is transactional per batch (all-or-nothing), so a
//! crash mid-write can never leave a cursor advanced past a
//! partially-written batch. Cursor advancement is monotonic:
//! `last_seen` never moves backward, guarding against a terminal
//! returning stale data after a clock change.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use attend_types::{AttendancePunch, DeviceId, SyncCursor};
use std::time::Duration;

/// Result of one ledger append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Records durably written by this batch.
    pub inserted: u64,
    /// Records skipped because their dedup key already existed.
    pub duplicates: u64,
}

/// Sync statistics derived from the ledger and cursor map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatistics {
    /// Total punches in the ledger.
    pub total_records: u64,
    /// Punches with timestamps in the last 24 hours.
    pub records_last_24h: u64,
    /// Cumulative count of appends skipped on the dedup key, across all
    /// devices. Duplicates are never stored, so this counter is the
    /// only trace they leave.
    pub duplicates_skipped: u64,
    /// Per-device breakdown.
    pub devices: Vec<DeviceStatistics>,
}

/// One device's slice of the statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatistics {
    /// The device.
    pub device_id: DeviceId,
    /// Punches stored for this device.
    pub record_count: u64,
    /// Cumulative appends skipped on the dedup key for this device.
    pub duplicates_skipped: u64,
    /// The device's cursor, `None` if it has never synced.
    pub cursor: Option<SyncCursor>,
}

/// The append-only ledger of normalized punches.
#[async_trait]
pub trait RecordLedger: Send + Sync {
    /// Append a batch of punches in one transaction.
    ///
    /// All-or-nothing: either every record in the batch is durably
    /// written (or skipped as a dedup-key duplicate) or the batch has
    /// no effect. Callers advance cursors only after this returns Ok.
    async fn append(&self, records: &[AttendancePunch]) -> StoreResult<AppendOutcome>;

    /// Punches with timestamps inside the trailing window, oldest first.
    async fn recent(&self, window: Duration) -> StoreResult<Vec<AttendancePunch>>;

    /// Derive statistics from the ledger and cursor map.
    async fn statistics(&self) -> StoreResult<SyncStatistics>;

    /// Delete punches older than the retention horizon.
    ///
    /// Explicit maintenance only; never called from a sync cycle.
    /// Returns the number of records removed.
    async fn purge_older_than(&self, retention_days: u32) -> StoreResult<u64>;
}

/// The per-device sync cursor map.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Fetch a device's cursor, `None` before its first sync.
    async fn get(&self, device_id: &DeviceId) -> StoreResult<Option<SyncCursor>>;

    /// Advance a device's cursor.
    ///
    /// Monotonic: an older `last_seen` no-ops that column while still
    /// refreshing `last_synced_at`. The stored `last_seen` never
    /// decreases.
    async fn advance(&self, device_id: &DeviceId, cursor: SyncCursor) -> StoreResult<()>;

    /// All cursors, for statistics and troubleshooting tooling.
    async fn all(&self) -> StoreResult<Vec<(DeviceId, SyncCursor)>>;
}
