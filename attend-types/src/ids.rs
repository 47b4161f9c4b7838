//! Identity and sync bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for one attendance terminal.
///
/// Device ids come from configuration and are opaque strings
/// (e.g. `"lobby-01"`). They key the cursor map and every stored punch.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a DeviceId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (invalid in configuration).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Per-device sync progress marker.
///
/// `last_seen` is the timestamp of the newest punch durably absorbed
/// from the device; fetches are bounded to records strictly newer than
/// it. `last_synced_at` is the wall-clock time of the last successful
/// cycle, kept for statistics.
///
/// Cursors advance monotonically: `last_seen` never moves backward.
/// Timestamps are more fragile than relay-assigned sequence numbers
/// because terminal clocks drift, so the store enforces the monotonic
/// guard rather than trusting the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Timestamp of the newest absorbed punch.
    pub last_seen: DateTime<Utc>,
    /// Wall-clock time of the last successful sync cycle.
    pub last_synced_at: DateTime<Utc>,
}

impl SyncCursor {
    /// Create a cursor.
    pub fn new(last_seen: DateTime<Utc>, last_synced_at: DateTime<Utc>) -> Self {
        Self {
            last_seen,
            last_synced_at,
        }
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.last_seen.to_rfc3339())
    }
}
