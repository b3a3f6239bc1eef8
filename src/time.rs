// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wall-clock helpers. Transport timestamps are microseconds since the Unix
// epoch so that all processes mapping a region agree on them.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn current_clock_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// OS sleeps overshoot; leave this much of the wait to the busy-wait tail.
const SLEEP_INACCURACY_MARGIN: Duration = Duration::from_micros(1500);

/// Sleep for `duration` without overshooting: a coarse `thread::sleep` up to
/// the inaccuracy margin, then a busy-wait to the exact deadline. Used by the
/// tick loop to hold a frame rate without accumulating drift.
pub fn sleep_precise(duration: Duration) {
    let deadline = Instant::now() + duration;

    if let Some(coarse) = duration.checked_sub(SLEEP_INACCURACY_MARGIN) {
        if !coarse.is_zero() {
            std::thread::sleep(coarse);
        }
    }

    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic_enough() {
        let a = current_clock_micros();
        let b = current_clock_micros();
        assert!(b >= a);
        // sanity: after 2020-01-01 in microseconds
        assert!(a > 1_577_836_800_000_000);
    }

    #[test]
    fn sleep_precise_hits_the_deadline() {
        let start = Instant::now();
        sleep_precise(Duration::from_millis(5));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5));
        // generous upper bound; only catches gross overshoot
        assert!(elapsed < Duration::from_millis(100));
    }
}
