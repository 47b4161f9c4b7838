//! Device capability boundary.
//!
//! The engine never speaks the vendor wire protocol itself; it consumes
//! a connection-oriented capability:
//! - `connect()` opens a session to one terminal
//! - the session fetches metadata, users, and log entries
//! - `disconnect()` tears the session down
//!
//! Every call is fallible and the orchestrator time-bounds connects, so
//! implementations do not need their own timeout handling.

use crate::config::DeviceDescriptor;
use async_trait::async_trait;
use attend_types::{DeviceInfo, DeviceUser, RawPunch};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Device boundary errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Host unreachable (no route, DNS failure, dead terminal).
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The terminal actively refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The attempt exceeded the configured connect timeout.
    #[error("connection timed out")]
    Timeout,

    /// Malformed or unexpected response from the terminal.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation attempted on a closed session.
    #[error("not connected")]
    NotConnected,
}

/// Factory for device sessions.
///
/// One implementation per vendor protocol; [`crate::MockDeviceClient`]
/// for tests.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Open a session to the terminal described by `descriptor`,
    /// passing its optional password through to the protocol layer.
    async fn connect(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// An open session to one terminal.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Fetch device metadata.
    async fn info(&self) -> Result<DeviceInfo, DeviceError>;

    /// Fetch the enrolled user list.
    async fn users(&self) -> Result<Vec<DeviceUser>, DeviceError>;

    /// Fetch attendance log entries.
    ///
    /// `since` is a hint; terminals commonly return their entire log
    /// regardless, so callers must still filter against their cursor.
    async fn logs(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawPunch>, DeviceError>;

    /// Close the session.
    async fn disconnect(&self) -> Result<(), DeviceError>;
}
