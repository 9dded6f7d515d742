//! Dial-retry backoff. Hard-coded per `tcptunnel/common.go::wait(n)` in the
//! original: 200ms for the first ten attempts, then a flat 1s. Deliberately
//! not exponential -- see the spec's design notes on not over-engineering
//! this without operational data demanding it.

use std::time::Duration;

/// `attempt` is zero-based (the first call is attempt 0).
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt < 10 {
        Duration::from_millis(200)
    } else {
        Duration::from_secs(1)
    }
}
