//! Engine-level error type.

use crate::client::DeviceError;
use attend_store::StoreError;

/// Errors on the per-device sync path.
///
/// Device errors consume the cycle's retry budget; store errors are
/// terminal for that device's cycle (the cursor must not advance past
/// an unpersisted batch). Neither aborts the cycle for other devices.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connection or protocol failure at the device boundary.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Ledger or cursor store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
