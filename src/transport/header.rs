// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The versioned region header in front of the changelog.
//
// Layout (all little-endian):
//   [0..4)   transport_version : i32
//   [4..8)   total_bytes       : i32
//   [8..40)  schema_hash       : 4 x i64
//   [40..48) base_timestamp_us : i64   (0 = not yet initialized)
//   [48..52) last_changelog_id : i32
//   [52..56) last_update_age_ms: u32   (ms offset from base_timestamp)
//   [56..)   placed ring buffer (changelog)
//
// base_timestamp_us is written last during initialization; a reader that
// sees 0 there without holding the lock must treat everything after byte
// 40 as indeterminate.

use crate::accessor::{MemoryAccessor, MemoryOffset};
use crate::placed_ring::PlacedRingBuffer;
use crate::time::current_clock_micros;
use crate::types::{HashValue, TransportConfig};

pub const HEADER_BYTE_COUNT: i32 = 56;

/// Version 9 added the heartbeat field; older layouts are 52 bytes and are
/// never produced, only rejected or reinitialized.
pub const TRANSPORT_VERSION: i32 = 9;

/// View over a transport region's header plus its changelog.
pub struct StreamHeaderAccessor {
    region: MemoryAccessor,
    header: MemoryAccessor,
}

impl StreamHeaderAccessor {
    pub fn new(region: MemoryAccessor) -> Self {
        let header = region.slice_sized(0, HEADER_BYTE_COUNT);
        Self { region, header }
    }

    /// Size of a whole region for this configuration.
    pub fn mem_size(config: &TransportConfig) -> i32 {
        HEADER_BYTE_COUNT + PlacedRingBuffer::mem_size(config.changelog_byte_count)
    }

    pub fn is_initialized(&self) -> bool {
        !self.header.is_null()
    }

    pub fn transport_version(&self) -> i32 {
        let mut pos = MemoryOffset::new(0);
        self.header.read_value(&mut pos)
    }

    pub fn set_transport_version(&self) {
        let mut pos = MemoryOffset::new(0);
        self.header.write_value(TRANSPORT_VERSION, &mut pos);
    }

    pub fn total_bytes(&self) -> i32 {
        let mut pos = MemoryOffset::new(4);
        self.header.read_value(&mut pos)
    }

    pub fn set_total_bytes(&self, total_bytes: i32) {
        let mut pos = MemoryOffset::new(4);
        self.header.write_value(total_bytes, &mut pos);
    }

    pub fn schema_hash(&self) -> HashValue {
        let mut pos = MemoryOffset::new(8);
        HashValue::read_value(&self.header, &mut pos)
    }

    pub fn set_schema_hash(&self, hash: &HashValue) {
        let mut pos = MemoryOffset::new(8);
        hash.write_value(&self.header, &mut pos);
    }

    pub fn base_timestamp(&self) -> u64 {
        let mut pos = MemoryOffset::new(40);
        self.header.read_value(&mut pos)
    }

    pub fn set_base_timestamp(&self, timestamp_us: u64) {
        let mut pos = MemoryOffset::new(40);
        self.header.write_value(timestamp_us, &mut pos);
    }

    pub fn last_changelog_id(&self) -> i32 {
        let mut pos = MemoryOffset::new(48);
        self.header.read_value(&mut pos)
    }

    pub fn set_last_changelog_id(&self, id: i32) {
        let mut pos = MemoryOffset::new(48);
        self.header.write_value(id, &mut pos);
    }

    /// Microseconds since the last successful write, derived from the
    /// stored millisecond heartbeat field. Readable without the lock.
    pub fn last_update_age_us(&self) -> u64 {
        let mut pos = MemoryOffset::new(52);
        let current_elapsed_us = current_clock_micros().saturating_sub(self.base_timestamp());
        let last_elapsed_ms: u32 = self.header.read_value(&mut pos);
        current_elapsed_us.saturating_sub(last_elapsed_ms as u64 * 1000)
    }

    /// Stamp the heartbeat field with the current time.
    pub fn set_last_update_timestamp(&self) {
        let mut pos = MemoryOffset::new(52);
        let elapsed_us = current_clock_micros().saturating_sub(self.base_timestamp());
        self.header.write_value((elapsed_us / 1000) as u32, &mut pos);
    }

    /// The changelog ring buffer placed after the header.
    ///
    /// # Safety
    /// Caller must hold the stream mutex for any mutation, and the region
    /// must outlive the returned pointer's use.
    pub fn changelog_ptr(&self) -> *mut PlacedRingBuffer {
        self.region
            .raw_pointer(HEADER_BYTE_COUNT, std::mem::size_of::<PlacedRingBuffer>() as i32)
            as *mut PlacedRingBuffer
    }

    /// Initialize a fresh region. Resets the changelog and publishes
    /// readiness by writing the base timestamp last.
    pub fn initialize(&self, config: &TransportConfig) {
        // zero first, so lock-free readers treat the header as invalid
        // while the rest is written
        self.set_base_timestamp(0);

        self.set_last_changelog_id(-1);
        self.set_transport_version();
        self.set_schema_hash(&config.schema_hash);
        self.set_total_bytes(Self::mem_size(config));

        unsafe { &mut *self.changelog_ptr() }.init(config.changelog_byte_count);

        self.set_base_timestamp(current_clock_micros());
        self.set_last_update_timestamp();
    }
}
