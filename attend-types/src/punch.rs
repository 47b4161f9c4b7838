//! Punch records: raw device output and the normalized canonical shape.

use crate::ids::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of attendance event a punch records.
///
/// Numeric codes are the values attendance terminals emit on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PunchType {
    /// Start of a work day (code 0).
    CheckIn,
    /// End of a work day (code 1).
    CheckOut,
    /// Leaving for a break (code 2).
    BreakOut,
    /// Returning from a break (code 3).
    BreakIn,
    /// Start of overtime (code 4).
    OvertimeIn,
    /// End of overtime (code 5).
    OvertimeOut,
}

impl PunchType {
    /// Map a device punch code to the canonical enumeration.
    ///
    /// Returns `None` for unrecognized codes; because the dedup key
    /// includes the punch type, an entry with an unknown code cannot be
    /// stored and is treated as malformed by the merge step.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::CheckIn),
            1 => Some(Self::CheckOut),
            2 => Some(Self::BreakOut),
            3 => Some(Self::BreakIn),
            4 => Some(Self::OvertimeIn),
            5 => Some(Self::OvertimeOut),
            _ => None,
        }
    }

    /// The device code for this punch type.
    pub fn code(&self) -> u8 {
        match self {
            Self::CheckIn => 0,
            Self::CheckOut => 1,
            Self::BreakOut => 2,
            Self::BreakIn => 3,
            Self::OvertimeIn => 4,
            Self::OvertimeOut => 5,
        }
    }
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckIn => "check-in",
            Self::CheckOut => "check-out",
            Self::BreakOut => "break-out",
            Self::BreakIn => "break-in",
            Self::OvertimeIn => "overtime-in",
            Self::OvertimeOut => "overtime-out",
        };
        write!(f, "{name}")
    }
}

/// How the terminal verified the user's identity.
///
/// Codes follow the vendor protocol; anything unrecognized falls back
/// to [`VerifyMethod::Unknown`] rather than failing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyMethod {
    /// PIN / password entry (code 0).
    Password,
    /// Fingerprint scan (code 1).
    Fingerprint,
    /// RFID card (code 4).
    Card,
    /// Face recognition (code 15).
    Face,
    /// Any other or unrecognized verification code.
    Unknown,
}

impl VerifyMethod {
    /// Map a device verify code, falling back to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Password,
            1 => Self::Fingerprint,
            4 => Self::Card,
            15 => Self::Face,
            _ => Self::Unknown,
        }
    }

    /// The device code for this method (`Unknown` maps to 255).
    pub fn code(&self) -> u8 {
        match self {
            Self::Password => 0,
            Self::Fingerprint => 1,
            Self::Card => 4,
            Self::Face => 15,
            Self::Unknown => 255,
        }
    }
}

/// A raw attendance log entry as fetched from a terminal.
///
/// Nothing is trusted yet: the timestamp may be missing (devices emit
/// zero dates), the user id may be blank, and the codes may be outside
/// the known ranges. The merge step normalizes or drops each entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPunch {
    /// User identifier as reported by the device.
    pub user_id: String,
    /// Event timestamp, if the device reported a parseable one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw punch type code.
    pub punch_code: u8,
    /// Raw verification method code.
    pub verify_code: u8,
    /// Work code, 0 when unused.
    pub work_code: u32,
}

/// One normalized attendance event.
///
/// `(device_id, user_id, timestamp, punch_type)` is the natural dedup
/// key: two punches identical in that tuple are the same event and
/// collapse to one stored record. Immutable once created; removed only
/// by the retention purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendancePunch {
    /// Terminal that recorded the event.
    pub device_id: DeviceId,
    /// User identifier.
    pub user_id: String,
    /// Resolved user display name (`User_<id>` when the terminal has none).
    pub user_name: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Kind of attendance event.
    pub punch_type: PunchType,
    /// How identity was verified.
    pub verify_method: VerifyMethod,
    /// Optional work code.
    pub work_code: Option<u32>,
}

impl AttendancePunch {
    /// The natural dedup key of this punch.
    pub fn dedup_key(&self) -> (&DeviceId, &str, DateTime<Utc>, PunchType) {
        (&self.device_id, &self.user_id, self.timestamp, self.punch_type)
    }
}
