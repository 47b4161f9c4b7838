//! # attend-engine
//!
//! The synchronization engine for networked attendance terminals:
//! drives the per-device cycle (connect, fetch, merge, persist, advance
//! cursor) across all enabled devices with retry, bounded parallelism,
//! and partial-failure isolation, and schedules recurring cycles.
//!
//! The vendor wire protocol is out of scope; devices are reached
//! through the [`DeviceClient`] capability trait, with
//! [`MockDeviceClient`] standing in for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
mod error;
pub mod mock;
pub mod orchestrator;
pub mod report;
pub mod scheduler;

pub use client::{DeviceClient, DeviceError, DeviceSession};
pub use config::{Config, ConfigError, DeviceDescriptor, Settings};
pub use error::SyncError;
pub use mock::MockDeviceClient;
pub use orchestrator::{ConnectionProbe, SyncOrchestrator};
pub use report::{CycleReport, DeviceOutcome, DeviceReport};
pub use scheduler::SyncScheduler;
