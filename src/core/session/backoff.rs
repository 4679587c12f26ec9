//! Retry delay schedules for credential fetch and reconnect.

use std::time::Duration;

use rand::Rng;

/// Base reconnect delay before reconnect attempt `n` (1-based):
/// `min(1000 * 2^(n-1), 10_000)` ms.
pub fn reconnect_delay_ms(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    (1000u64 << exponent).min(10_000)
}

/// Base credential retry delay before attempt `n` (1-based):
/// exponential from 1 s, capped at 5 s.
pub fn credential_delay_ms(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    (1000u64 << exponent).min(5_000)
}

/// Apply ±10% jitter so simultaneous clients do not retry in lockstep.
pub fn with_jitter(base_ms: u64) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_millis((base_ms as f64 * factor) as u64)
}
