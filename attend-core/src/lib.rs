//! # attend-core
//!
//! Pure sync logic for the attendance engine (no I/O, instant tests).
//!
//! This crate implements the dedup/merge algorithm and the per-device
//! cycle state machine without any network or disk access. The actual
//! I/O (device connections, SQLite writes) is performed by
//! `attend-engine`, which executes the steps these modules produce.
//!
//! ## Design Philosophy
//!
//! All modules here are **pure**: they take input and produce output
//! without side effects. Same input, same output; unit tests need no
//! mocks, no async runtime, and no real time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod merge;
pub mod state;

pub use backoff::retry_delay;
pub use merge::{merge, MergeInput, MergeOutcome};
pub use state::{CycleEvent, CyclePhase, CycleStep};
