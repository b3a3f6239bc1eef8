// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process mutex guarding a transport region.
//
// Two backings: a named OS primitive for regions shared between processes
// (flock on POSIX, a kernel mutex on Windows; both released by the OS if
// the holder dies), and a process-local timed reentrant mutex for
// heap-backed streams where both endpoints live in one process.
//
// The only way to hold the lock is lock_and_execute, which releases on
// every exit path. A panic inside the callback releases the lock before
// resuming the unwind, so a crashing thread cannot deadlock its peers.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::platform::PlatformMutex;

enum MutexImpl {
    Named(PlatformMutex),
    Local(LocalMutex),
}

pub struct InterprocessMutex {
    inner: MutexImpl,
}

impl InterprocessMutex {
    /// Open (or create) a named cross-process mutex.
    pub fn named(name: &str) -> io::Result<Self> {
        Ok(Self {
            inner: MutexImpl::Named(PlatformMutex::open(name)?),
        })
    }

    /// A process-local mutex for same-process stream pairs.
    pub fn local() -> Self {
        Self {
            inner: MutexImpl::Local(LocalMutex::new()),
        }
    }

    fn lock_timeout(&self, timeout_ms: u64) -> io::Result<bool> {
        match &self.inner {
            MutexImpl::Named(m) => m.lock_timeout(timeout_ms),
            MutexImpl::Local(m) => Ok(m.lock_timeout(timeout_ms)),
        }
    }

    /// Release the lock. Only meaningful for deterministic teardown; normal
    /// callers go through `lock_and_execute`.
    pub fn unlock(&self) -> io::Result<()> {
        match &self.inner {
            MutexImpl::Named(m) => m.unlock(),
            MutexImpl::Local(m) => {
                m.unlock();
                Ok(())
            }
        }
    }

    pub fn dispose(&self) {
        if let MutexImpl::Named(m) = &self.inner {
            m.dispose();
        }
    }

    /// Run `f` with the lock held. Returns Ok(false) if the lock was not
    /// acquired within `timeout_ms`. The lock is released on every exit
    /// path; if `f` panics, the lock is released and the panic resumes.
    pub fn lock_and_execute<F: FnOnce()>(&self, timeout_ms: u64, f: F) -> io::Result<bool> {
        if !self.lock_timeout(timeout_ms)? {
            return Ok(false);
        }

        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let unlock_result = self.unlock();

        match result {
            Ok(()) => {
                unlock_result?;
                Ok(true)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

// ---------------------------------------------------------------------------
// LocalMutex: timed reentrant mutex for same-process stream pairs
// ---------------------------------------------------------------------------

struct LocalState {
    owner: Option<ThreadId>,
    depth: u32,
}

struct LocalMutex {
    state: Mutex<LocalState>,
    cond: Condvar,
}

impl LocalMutex {
    fn new() -> Self {
        Self {
            state: Mutex::new(LocalState {
                owner: None,
                depth: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock_timeout(&self, timeout_ms: u64) -> bool {
        let me = thread::current().id();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        let mut state = self.state.lock().unwrap();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return true;
                }
                Some(_) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    let (next, timed_out) = self.cond.wait_timeout(state, remaining).unwrap();
                    state = next;
                    if timed_out.timed_out() && state.owner.is_some() {
                        return false;
                    }
                }
            }
        }
    }

    fn unlock(&self) {
        let mut state = self.state.lock().unwrap();
        if state.owner != Some(thread::current().id()) {
            return;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn local_mutex_is_reentrant() {
        let m = InterprocessMutex::local();
        let ran = AtomicBool::new(false);
        let ok = m
            .lock_and_execute(10, || {
                let inner_ok = m.lock_and_execute(10, || ran.store(true, Ordering::Relaxed));
                assert!(inner_ok.unwrap());
            })
            .unwrap();
        assert!(ok);
        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    fn local_mutex_times_out_across_threads() {
        let m = Arc::new(InterprocessMutex::local());
        let m2 = Arc::clone(&m);

        let holder = std::thread::spawn(move || {
            m2.lock_and_execute(100, || {
                std::thread::sleep(Duration::from_millis(50));
            })
            .unwrap()
        });

        // give the holder time to take the lock
        std::thread::sleep(Duration::from_millis(10));
        let got = m.lock_and_execute(1, || {}).unwrap();
        assert!(!got);

        assert!(holder.join().unwrap());
        assert!(m.lock_and_execute(100, || {}).unwrap());
    }

    #[test]
    fn panic_in_callback_releases_the_lock() {
        let m = Arc::new(InterprocessMutex::local());

        let m2 = Arc::clone(&m);
        let result = std::thread::spawn(move || {
            let _ = m2.lock_and_execute(10, || panic!("boom"));
        })
        .join();
        assert!(result.is_err());

        // the lock must be free again
        assert!(m.lock_and_execute(10, || {}).unwrap());
    }
}
