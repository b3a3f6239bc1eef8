// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The per-process runner loop: drives inbound ticks, user work, and
// outbound ticks at a fixed frame rate from a single thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::time::sleep_precise;

/// Fixed-rate tick loop with a cross-thread stop flag.
///
/// `run` owns the calling thread until `stop()` is observed at the top of
/// an iteration. The frame period is held with a coarse sleep plus a
/// busy-wait tail, and the next-frame deadline advances by the period
/// rather than resetting, so the rate does not drift under load jitter.
pub struct TickLoop {
    running: Arc<AtomicBool>,
}

/// Clonable handle for stopping a running loop from another thread.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl TickLoop {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Call `tick` repeatedly at `target_frames_per_second` until stopped.
    /// A tick that overruns its frame period is followed immediately by
    /// the next one; the deadline catches back up instead of drifting.
    pub fn run<F: FnMut()>(&self, target_frames_per_second: u32, mut tick: F) {
        assert!(target_frames_per_second > 0);
        let frame_period = Duration::from_micros(1_000_000 / target_frames_per_second as u64);

        let mut next_frame = Instant::now() + frame_period;
        while self.is_running() {
            tick();

            let now = Instant::now();
            if now < next_frame {
                sleep_precise(next_frame - now);
            }
            next_frame += frame_period;
        }
    }
}
