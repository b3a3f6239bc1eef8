// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process object reconciliation over shared-memory change streams.
//
// Processes map a named region holding a versioned header plus a
// ring-buffered changelog, and reconcile id-keyed object collections
// across the boundary: create/update/delete lifecycle with field-level
// change masks, bounded-lifetime messages, and audio-rate signal packets.

pub mod accessor;
pub mod types;

mod time;
pub use time::{current_clock_micros, sleep_precise};

pub mod placed_alloc;
pub mod placed_ring;
pub mod placed_sorted;
pub mod spmc_ring;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::InterprocessMutex;

pub mod transport;

pub mod reconciler;

pub mod signals;

mod runtime;
pub use runtime::{StopHandle, TickLoop};
