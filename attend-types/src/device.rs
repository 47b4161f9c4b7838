//! Device-reported metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user enrolled on a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUser {
    /// User identifier as stored on the device.
    pub user_id: String,
    /// Display name; may be empty on cheap terminals.
    pub name: String,
    /// Device privilege level (0 = normal user).
    pub privilege: u8,
    /// Group id, empty when unassigned.
    pub group_id: String,
}

impl DeviceUser {
    /// Display name with the device's `User_<id>` fallback for blanks.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("User_{}", self.user_id)
        } else {
            self.name.clone()
        }
    }
}

/// Metadata reported by a terminal.
///
/// Terminals vary in what they answer, so every field is optional
/// rather than the response being an open-ended map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Firmware version string.
    pub firmware_version: Option<String>,
    /// Hardware serial number.
    pub serial_number: Option<String>,
    /// Platform identifier.
    pub platform: Option<String>,
    /// Name the device reports for itself.
    pub device_name: Option<String>,
    /// The device's current clock reading.
    pub device_time: Option<DateTime<Utc>>,
    /// Number of enrolled users.
    pub user_count: Option<u32>,
    /// Number of attendance records held on the device.
    pub record_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_user_name_gets_fallback() {
        let user = DeviceUser {
            user_id: "42".into(),
            name: String::new(),
            privilege: 0,
            group_id: String::new(),
        };
        assert_eq!(user.display_name(), "User_42");
    }

    #[test]
    fn named_user_keeps_name() {
        let user = DeviceUser {
            user_id: "42".into(),
            name: "Alice".into(),
            privilege: 0,
            group_id: "1".into(),
        };
        assert_eq!(user.display_name(), "Alice");
    }
}
