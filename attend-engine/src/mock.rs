//! Mock device client for testing.
//!
//! Allows seeding per-device logs and users, forcing failures, and
//! inspecting connection attempts.

use crate::client::{DeviceClient, DeviceError, DeviceSession};
use crate::config::DeviceDescriptor;
use async_trait::async_trait;
use attend_types::{DeviceInfo, DeviceUser, RawPunch};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock device client for testing.
///
/// Seed logs/users per device id, force connect or fetch failures, and
/// verify how many connection attempts were made.
#[derive(Debug, Default, Clone)]
pub struct MockDeviceClient {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Debug, Default)]
struct MockInner {
    logs: HashMap<String, Vec<RawPunch>>,
    users: HashMap<String, Vec<DeviceUser>>,
    info: HashMap<String, DeviceInfo>,
    unreachable: HashMap<String, bool>,
    fail_connects: HashMap<String, u32>,
    fail_next_logs: HashMap<String, String>,
    fail_next_users: HashMap<String, String>,
    connect_attempts: HashMap<String, u32>,
    last_logs_since: HashMap<String, Option<DateTime<Utc>>>,
}

impl MockDeviceClient {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log entries a device returns (its entire log, like a
    /// real terminal; the `since` hint is recorded but not applied).
    pub fn set_logs(&self, device_id: &str, logs: Vec<RawPunch>) {
        let mut inner = self.inner.lock().unwrap();
        inner.logs.insert(device_id.to_string(), logs);
    }

    /// Seed the user list a device returns.
    pub fn set_users(&self, device_id: &str, users: Vec<DeviceUser>) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(device_id.to_string(), users);
    }

    /// Seed the metadata a device reports.
    pub fn set_info(&self, device_id: &str, info: DeviceInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.info.insert(device_id.to_string(), info);
    }

    /// Make every connect to this device fail.
    pub fn make_unreachable(&self, device_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.unreachable.insert(device_id.to_string(), true);
    }

    /// Make the next `n` connects to this device fail, then succeed.
    pub fn fail_connects(&self, device_id: &str, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_connects.insert(device_id.to_string(), n);
    }

    /// Make the next log fetch from this device fail.
    pub fn fail_next_logs(&self, device_id: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_next_logs
            .insert(device_id.to_string(), error.to_string());
    }

    /// Make the next user fetch from this device fail.
    pub fn fail_next_users(&self, device_id: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_next_users
            .insert(device_id.to_string(), error.to_string());
    }

    /// Connection attempts made against this device so far.
    pub fn connect_attempts(&self, device_id: &str) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.connect_attempts.get(device_id).copied().unwrap_or(0)
    }

    /// The `since` bound passed to the most recent log fetch.
    pub fn last_logs_since(&self, device_id: &str) -> Option<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().unwrap();
        inner.last_logs_since.get(device_id).copied()
    }
}

#[async_trait]
impl DeviceClient for MockDeviceClient {
    async fn connect(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let device_id = descriptor.device_id.as_str().to_string();
        let mut inner = self.inner.lock().unwrap();
        *inner.connect_attempts.entry(device_id.clone()).or_insert(0) += 1;

        if inner.unreachable.get(&device_id).copied().unwrap_or(false) {
            return Err(DeviceError::Unreachable(descriptor.address.clone()));
        }
        if let Some(remaining) = inner.fail_connects.get_mut(&device_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeviceError::Refused(descriptor.address.clone()));
            }
        }

        Ok(Box::new(MockSession {
            device_id,
            inner: Arc::clone(&self.inner),
            connected: Mutex::new(true),
        }))
    }
}

struct MockSession {
    device_id: String,
    inner: Arc<Mutex<MockInner>>,
    connected: Mutex<bool>,
}

impl MockSession {
    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if *self.connected.lock().unwrap() {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn info(&self) -> Result<DeviceInfo, DeviceError> {
        self.ensure_connected()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.info.get(&self.device_id).cloned().unwrap_or_default())
    }

    async fn users(&self) -> Result<Vec<DeviceUser>, DeviceError> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_users.remove(&self.device_id) {
            return Err(DeviceError::Protocol(error));
        }
        Ok(inner.users.get(&self.device_id).cloned().unwrap_or_default())
    }

    async fn logs(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawPunch>, DeviceError> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock().unwrap();
        inner.last_logs_since.insert(self.device_id.clone(), since);
        if let Some(error) = inner.fail_next_logs.remove(&self.device_id) {
            return Err(DeviceError::Protocol(error));
        }
        Ok(inner.logs.get(&self.device_id).cloned().unwrap_or_default())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        *self.connected.lock().unwrap() = false;
        Ok(())
    }
}
