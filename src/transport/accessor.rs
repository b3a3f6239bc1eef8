// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Views over reserved change-event slots in the changelog, and the
// accessor handed to transact() callbacks for writing them.
//
// Every change event starts with {change_type: i32, timestamp: i32}. The
// timestamp is stored as a millisecond offset from the stream's base
// timestamp; 32 bits of milliseconds cover about 24 days of stream
// lifetime, which bounds how long a stream may run without
// reinitialization.

use std::any::Any;

use crate::accessor::{MemoryAccessor, MemoryOffset};
use crate::time::current_clock_micros;

/// A typed view over a change-event allocation. `DS_SIZE` is the fixed
/// prefix size of the event; variable payload follows it.
pub trait ChangeEvent {
    const DS_SIZE: i32;

    fn from_memory(mem: MemoryAccessor) -> Self;
    fn memory(&self) -> &MemoryAccessor;

    fn is_null(&self) -> bool {
        self.memory().is_null()
    }
}

/// Base change event: type word plus timestamp offset.
pub struct ChangeEventAccessor {
    mem: MemoryAccessor,
}

impl ChangeEvent for ChangeEventAccessor {
    const DS_SIZE: i32 = 8;

    fn from_memory(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    fn memory(&self) -> &MemoryAccessor {
        &self.mem
    }
}

impl ChangeEventAccessor {
    pub fn new(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    pub fn change_type(&self) -> i32 {
        let mut pos = MemoryOffset::new(0);
        self.mem.read_value(&mut pos)
    }

    pub fn set_change_type(&self, change_type: i32) {
        let mut pos = MemoryOffset::new(0);
        self.mem.write_value(change_type, &mut pos);
    }

    /// Milliseconds since the stream's base timestamp.
    pub fn timestamp_offset_ms(&self) -> i32 {
        let mut pos = MemoryOffset::new(4);
        self.mem.read_value(&mut pos)
    }

    pub fn set_timestamp_offset_ms(&self, offset_ms: i32) {
        let mut pos = MemoryOffset::new(4);
        self.mem.write_value(offset_ms, &mut pos);
    }
}

/// Write-side accessor scoped to a single locked transaction.
///
/// Events are allocated out of the changelog through the stream-provided
/// allocator, which also advances the header's last changelog id. A failed
/// allocation (event larger than the changelog can ever hold) yields a
/// null event view and the write becomes a no-op.
pub struct TransportStreamAccessor<'a> {
    base_timestamp: u64,
    iter_data: &'a mut dyn Any,
    event_allocator: &'a mut dyn FnMut(i32) -> MemoryAccessor,
}

impl<'a> TransportStreamAccessor<'a> {
    pub fn new(
        base_timestamp: u64,
        iter_data: &'a mut dyn Any,
        event_allocator: &'a mut dyn FnMut(i32) -> MemoryAccessor,
    ) -> Self {
        Self {
            base_timestamp,
            iter_data,
            event_allocator,
        }
    }

    /// Wall-clock microseconds of the writer's initialization; all event
    /// timestamps are offsets from this.
    pub fn base_timestamp(&self) -> u64 {
        self.base_timestamp
    }

    /// Current time as a millisecond offset from the base timestamp.
    pub fn current_timestamp_offset_ms(&self) -> i32 {
        self.timestamp_offset_ms_for(current_clock_micros())
    }

    // Signed: an explicit timestamp may predate the base timestamp (e.g.
    // a message stamped before this stream was reinitialized).
    fn timestamp_offset_ms_for(&self, timestamp_us: u64) -> i32 {
        ((timestamp_us as i64 - self.base_timestamp as i64) / 1000) as i32
    }

    /// Reconstruct absolute microseconds from a stored event timestamp.
    pub fn absolute_timestamp_us(&self, offset_ms: i32) -> u64 {
        (self.base_timestamp as i64 + offset_ms as i64 * 1000).max(0) as u64
    }

    /// Allocate an event of `E::DS_SIZE + num_bytes` bytes in the
    /// changelog and stamp its type and timestamp. `timestamp_us` of 0
    /// means now. Returns a null view if the changelog cannot hold the
    /// event.
    pub fn write_change_event<E: ChangeEvent>(
        &mut self,
        change_type: i32,
        num_bytes: i32,
        timestamp_us: u64,
    ) -> E {
        let mem = (self.event_allocator)(E::DS_SIZE + num_bytes);

        if !mem.is_null() {
            let base = ChangeEventAccessor::new(mem);
            base.set_change_type(change_type);
            let offset_ms = if timestamp_us != 0 {
                self.timestamp_offset_ms_for(timestamp_us)
            } else {
                self.current_timestamp_offset_ms()
            };
            base.set_timestamp_offset_ms(offset_ms);
        }

        E::from_memory(mem)
    }

    /// Copy a pre-built event into the changelog and restamp its timestamp
    /// to now. Used when events are staged outside the lock and flushed in
    /// a batch.
    pub fn write_prefilled_change_event(&mut self, prefilled: MemoryAccessor) {
        let mem = (self.event_allocator)(prefilled.size());
        if mem.is_null() {
            return;
        }
        mem.copy_from(&prefilled);
        let base = ChangeEventAccessor::new(mem);
        let now = self.current_timestamp_offset_ms();
        base.set_timestamp_offset_ms(now);
    }

    /// Per-transport iterator state, downcast by type. Iterators use this
    /// to reach the changelog from inside a transaction.
    pub fn iterator_data<T: 'static>(&mut self) -> Option<&mut T> {
        self.iter_data.downcast_mut::<T>()
    }
}
