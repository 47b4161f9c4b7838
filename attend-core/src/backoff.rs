//! Retry delay calculation for failed device attempts.

use std::time::Duration;

/// Calculate the delay before retry attempt `attempt` (1-based).
///
/// Exponential backoff with jitter so a bank of devices behind one
/// flaky switch does not hammer it in lockstep.
///
/// Formula: min(10s, 2^attempt seconds) + random(0..500ms)
pub fn retry_delay(attempt: u32) -> Duration {
    let base_secs = 2u64.pow(attempt.min(3)).min(10);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Generate random jitter between 0 and 500 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    u64::from_le_bytes(bytes) % 501
}
