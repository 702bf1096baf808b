//! Randomization helpers
//!
//! Spreads scheduled work so redundant daemons do not probe or
//! reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

/// Base interval plus a random spread of up to `max_jitter_secs`
pub fn jitter(base_secs: u64, max_jitter_secs: u64) -> Duration {
    let extra = rand::thread_rng().gen_range(0..=max_jitter_secs);
    Duration::from_secs(base_secs + extra)
}

/// Capped exponential backoff for reconnect loops, jittered by a
/// quarter of the delay so retries spread out
pub fn backoff(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exp = base_secs.saturating_mul(2_u64.pow(attempt.min(10)));
    let capped = exp.min(max_secs);
    jitter(capped, capped / 4)
}
