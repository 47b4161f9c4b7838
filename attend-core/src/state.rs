//! Per-device cycle state machine.
//!
//! A pure, side-effect-free machine for one device's pass through a
//! sync cycle. It takes events as input and produces a new phase plus
//! a list of steps to execute; `attend-engine` performs the actual I/O
//! those steps name. This keeps retry bookkeeping and the
//! persist-before-cursor ordering testable without mocks or time.
//!
//! Only `Persisting` and `CursorAdvance` mutate durable state, and only
//! in that order: a device failing anywhere earlier leaves both the
//! ledger and its cursor untouched.

use crate::backoff::retry_delay;
use std::time::Duration;

/// Phase of one device's sync cycle - NO I/O, just transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CyclePhase {
    /// Waiting for the next cycle.
    Idle,
    /// Connection attempt in progress (1-based attempt counter).
    Connecting {
        /// Which connection attempt this is.
        attempt: u32,
    },
    /// Connected, fetching users and log entries.
    Fetching {
        /// The attempt that produced this connection; fetch failures
        /// consume the same per-cycle retry budget as connect failures.
        attempt: u32,
    },
    /// Filtering and normalizing fetched entries.
    Merging,
    /// Appending accepted records to the ledger.
    Persisting,
    /// Advancing the device cursor after a durable append.
    CursorAdvance,
    /// Retry budget exhausted or persistence failed; terminal until the
    /// next scheduled cycle starts fresh.
    Failed {
        /// Why the device failed this cycle.
        reason: String,
    },
}

/// Events fed to the machine by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    /// A new cycle is starting for this device.
    CycleStarted,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed (unreachable, refused, timeout).
    ConnectFailed {
        /// Error description.
        error: String,
    },
    /// Users and log entries fetched.
    FetchSucceeded,
    /// Fetch failed (protocol or connection error mid-session).
    FetchFailed {
        /// Error description.
        error: String,
    },
    /// Merge finished; `any_new` is false on a no-op pass.
    MergeCompleted {
        /// Whether the merge accepted any records.
        any_new: bool,
    },
    /// Ledger append committed.
    AppendSucceeded,
    /// Ledger append failed; no retry, the cursor must not advance.
    AppendFailed {
        /// Error description.
        error: String,
    },
    /// Cursor durably advanced.
    CursorAdvanced,
    /// Cursor store write failed.
    CursorAdvanceFailed {
        /// Error description.
        error: String,
    },
}

/// Steps for the orchestrator to execute.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleStep {
    /// Open a connection to the device.
    Connect {
        /// Which attempt this is.
        attempt: u32,
    },
    /// Wait before the next connection attempt.
    RetryAfter {
        /// Backoff delay.
        delay: Duration,
    },
    /// Fetch users and log entries over the open session.
    Fetch,
    /// Run the merge over fetched entries.
    Merge,
    /// Append accepted records to the ledger.
    Persist,
    /// Advance the device cursor (also refreshes last-sync time on a
    /// no-op pass).
    AdvanceCursor,
    /// The device finished this cycle successfully.
    Finish,
    /// The device is done for this cycle, unsuccessfully.
    Abort {
        /// Why the device failed.
        reason: String,
    },
}

impl CyclePhase {
    /// A fresh machine, ready for `CycleStarted`.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new phase plus steps to execute.
    ///
    /// Pure function; the orchestrator executes the returned steps.
    /// `max_retries` bounds connection/fetch attempts per cycle.
    pub fn on_event(self, event: CycleEvent, max_retries: u32) -> (Self, Vec<CycleStep>) {
        match (self, event) {
            (Self::Idle, CycleEvent::CycleStarted) => {
                (Self::Connecting { attempt: 1 }, vec![CycleStep::Connect { attempt: 1 }])
            }

            (Self::Connecting { attempt }, CycleEvent::ConnectSucceeded) => {
                (Self::Fetching { attempt }, vec![CycleStep::Fetch])
            }
            (Self::Connecting { attempt }, CycleEvent::ConnectFailed { error }) => {
                Self::retry_or_fail(attempt, max_retries, error)
            }

            (Self::Fetching { .. }, CycleEvent::FetchSucceeded) => {
                (Self::Merging, vec![CycleStep::Merge])
            }
            // A fetch failure tears the session down and re-enters the
            // connect loop, charged against the same retry budget.
            (Self::Fetching { attempt }, CycleEvent::FetchFailed { error }) => {
                Self::retry_or_fail(attempt, max_retries, error)
            }

            (Self::Merging, CycleEvent::MergeCompleted { any_new: true }) => {
                (Self::Persisting, vec![CycleStep::Persist])
            }
            // Nothing new: skip the ledger, still refresh the cursor's
            // last-sync time.
            (Self::Merging, CycleEvent::MergeCompleted { any_new: false }) => {
                (Self::CursorAdvance, vec![CycleStep::AdvanceCursor])
            }

            (Self::Persisting, CycleEvent::AppendSucceeded) => {
                (Self::CursorAdvance, vec![CycleStep::AdvanceCursor])
            }
            (Self::Persisting, CycleEvent::AppendFailed { error }) => (
                Self::Failed {
                    reason: error.clone(),
                },
                vec![CycleStep::Abort { reason: error }],
            ),

            (Self::CursorAdvance, CycleEvent::CursorAdvanced) => {
                (Self::Idle, vec![CycleStep::Finish])
            }
            (Self::CursorAdvance, CycleEvent::CursorAdvanceFailed { error }) => (
                Self::Failed {
                    reason: error.clone(),
                },
                vec![CycleStep::Abort { reason: error }],
            ),

            // Invalid transitions - stay in current phase.
            (phase, _) => (phase, vec![]),
        }
    }

    fn retry_or_fail(attempt: u32, max_retries: u32, error: String) -> (Self, Vec<CycleStep>) {
        if attempt >= max_retries {
            let reason = format!("failed after {attempt} attempts: {error}");
            (
                Self::Failed {
                    reason: reason.clone(),
                },
                vec![CycleStep::Abort { reason }],
            )
        } else {
            let next = attempt + 1;
            (
                Self::Connecting { attempt: next },
                vec![
                    CycleStep::RetryAfter {
                        delay: retry_delay(attempt),
                    },
                    CycleStep::Connect { attempt: next },
                ],
            )
        }
    }

    /// Whether the device reached a terminal failure this cycle.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl Default for CyclePhase {
    fn default() -> Self {
        Self::new()
    }
}
