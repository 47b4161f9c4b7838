//! # attend-types
//!
//! Shared record and identity types for the attendance sync engine.
//!
//! These types flow between every layer: the device capability boundary
//! produces [`RawPunch`] and [`DeviceUser`], the merge logic normalizes
//! them into [`AttendancePunch`], and the store keys its bookkeeping on
//! [`DeviceId`] and [`SyncCursor`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod ids;
pub mod punch;

pub use device::{DeviceInfo, DeviceUser};
pub use ids::{DeviceId, SyncCursor};
pub use punch::{AttendancePunch, PunchType, RawPunch, VerifyMethod};
