// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lock-free single-producer multi-consumer ring buffer of fixed-size
// blocks, for audio-rate signal packets where occasional drops beat
// blocking. Laid out in place inside a shared region.
//
// Memory layout:
//   Offset | Size | Field
//   -------|------|----------------------------------------------
//   0      | 4    | pool_size (bytes after the header)
//   4      | 4    | block_size (4-byte aligned, includes the block header)
//   8      | 4    | block_count
//   12     | 4    | reserved
//   16     | 4    | write_index (atomic u32, monotonically increasing)
//   20     | 4    | min_read_index (atomic u32, writer-advanced)
//   24     | ...  | block pool
//
// Each block starts with a 4-byte data_size header; 0 marks a block
// skipped by a wrapping entry. A multi-block entry stores its total size
// in the first block's header and runs contiguously through the following
// blocks with no further headers. An entry that would straddle the pool
// end instead marks the tail blocks as skipped and restarts at block 0.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::accessor::{MemoryAccessor, MemoryOffset};

pub const BLOCK_HEADER_SIZE: i32 = 4;
pub const HEADER_SIZE: i32 = 24;

const fn align4(x: i32) -> i32 {
    (x + 3) & !3
}

pub struct SpmcRingBuffer {
    mem_source: MemoryAccessor,
    header: MemoryAccessor,
    pool: MemoryAccessor,
    block_size: i32,
    block_count: i32,
}

impl SpmcRingBuffer {
    /// Total bytes needed for `block_count` blocks of `block_size` bytes.
    pub const fn mem_size(block_size: i32, block_count: i32) -> i32 {
        HEADER_SIZE + align4(block_size) * block_count
    }

    /// View an existing (possibly uninitialized) ring at `mem_offset`
    /// inside `mem`. Call `init` before use if the region is fresh.
    ///
    /// The region must be 4-byte aligned; the index words are accessed as
    /// in-place atomics.
    pub fn from_memory(mem: &MemoryAccessor, mem_offset: i32) -> Self {
        let mem_source = mem.slice(mem_offset);
        let header = mem.slice_sized(mem_offset, HEADER_SIZE);

        let mut block_size = 0;
        let mut block_count = 0;
        let mut pool = MemoryAccessor::null();

        if !header.is_null() {
            let mut pos = MemoryOffset::default();
            let pool_size = header.read_value::<i32>(&mut pos);
            block_size = header.read_value::<i32>(&mut pos);
            block_count = header.read_value::<i32>(&mut pos);

            if pool_size > 0 && block_size > 0 && block_count > 0 {
                pool = mem.slice_sized(mem_offset + HEADER_SIZE, pool_size);
            }
        }

        Self {
            mem_source,
            header,
            pool,
            block_size,
            block_count,
        }
    }

    /// Initialize the header and pool bounds. Writer-side, before any
    /// reader is attached.
    pub fn init(&mut self, block_size: i32, block_count: i32) {
        let block_size = align4(block_size);
        self.block_size = block_size;
        self.block_count = block_count;

        let pool_size = block_size * block_count;

        let mut pos = MemoryOffset::default();
        self.header.write_value::<i32>(pool_size, &mut pos);
        self.header.write_value::<i32>(block_size, &mut pos);
        self.header.write_value::<i32>(block_count, &mut pos);
        self.header.write_value::<i32>(0, &mut pos); // reserved
        self.header.write_value::<u32>(0, &mut pos); // write_index
        self.header.write_value::<u32>(0, &mut pos); // min_read_index

        self.pool = self.mem_source.slice_sized(HEADER_SIZE, pool_size);
    }

    pub fn is_null(&self) -> bool {
        self.header.is_null() || self.pool.is_null()
    }

    pub fn block_size(&self) -> i32 {
        self.block_size
    }

    pub fn block_count(&self) -> i32 {
        self.block_count
    }

    /// Largest single entry the ring can hold (all blocks minus the one
    /// header).
    pub fn max_data_size(&self) -> i32 {
        self.block_size * self.block_count - BLOCK_HEADER_SIZE
    }

    fn write_index_atomic(&self) -> &AtomicU32 {
        unsafe { &*(self.header.raw_pointer(16, 4) as *const AtomicU32) }
    }

    fn min_read_index_atomic(&self) -> &AtomicU32 {
        unsafe { &*(self.header.raw_pointer(20, 4) as *const AtomicU32) }
    }

    pub(crate) fn load_write_index(&self) -> u32 {
        self.write_index_atomic().load(Ordering::Acquire)
    }

    pub(crate) fn load_min_read_index(&self) -> u32 {
        self.min_read_index_atomic().load(Ordering::Acquire)
    }

    fn store_write_index(&self, value: u32) {
        self.write_index_atomic().store(value, Ordering::Release);
    }

    fn store_min_read_index(&self, value: u32) {
        self.min_read_index_atomic().store(value, Ordering::Release);
    }

    fn block_offset(&self, block_index: u32) -> i32 {
        block_index as i32 * self.block_size
    }

    fn block_size_atomic(&self, block_offset: i32) -> &AtomicU32 {
        unsafe { &*(self.pool.raw_pointer(block_offset, BLOCK_HEADER_SIZE) as *const AtomicU32) }
    }

    fn set_block_data_size(&self, block_offset: i32, data_size: u32) {
        self.block_size_atomic(block_offset)
            .store(data_size, Ordering::Relaxed);
    }

    fn block_data_size(&self, block_offset: i32) -> u32 {
        self.block_size_atomic(block_offset).load(Ordering::Relaxed)
    }

    fn blocks_needed(&self, data_size: i32) -> i32 {
        let first_block_data = self.block_size - BLOCK_HEADER_SIZE;
        if data_size <= first_block_data {
            return 1;
        }
        let remaining = data_size - first_block_data;
        1 + (remaining - 1) / self.block_size + 1
    }

    // Advance to the first index holding a valid entry start (data_size > 0).
    fn skip_to_valid_block(&self, mut index: u32) -> u32 {
        let write_index = self.load_write_index();
        while index < write_index {
            let block_offset = self.block_offset(index % self.block_count as u32);
            if self.block_data_size(block_offset) > 0 {
                return index;
            }
            index += 1;
        }
        index
    }

    // Walk entry-by-entry from current_index until at or past target_index.
    // Multi-block entries advance by their full block span, skipped blocks
    // by one.
    fn skip_to_valid_entry(&self, mut current_index: u32, target_index: u32) -> u32 {
        let write_index = self.load_write_index();

        while current_index < write_index && current_index < target_index {
            let block_offset = self.block_offset(current_index % self.block_count as u32);
            let data_size = self.block_data_size(block_offset);

            if data_size == 0 {
                current_index += 1;
            } else {
                current_index += self.blocks_needed(data_size as i32) as u32;
            }
        }

        // land on an entry start, not inside a run of skipped blocks
        self.skip_to_valid_block(current_index)
    }

    /// Producer side. Reserves space for `data_size` bytes, hands the data
    /// window to `fill`, then publishes the new write index. Evicts the
    /// oldest entries by advancing `min_read_index` before touching block
    /// memory, so late readers observe the eviction rather than torn data.
    ///
    /// Rejects non-positive sizes and entries larger than the whole pool.
    pub fn write<F: FnOnce(MemoryAccessor)>(&self, data_size: i32, fill: F) -> bool {
        if self.is_null() || data_size <= 0 {
            return false;
        }

        let blocks_needed = self.blocks_needed(data_size);
        if blocks_needed > self.block_count {
            return false;
        }

        let write_index = self.load_write_index();
        let mut start_block_index = write_index % self.block_count as u32;

        let end_block_index = start_block_index + blocks_needed as u32;
        let new_write_index;
        let mut skipped_blocks = 0;

        if end_block_index > self.block_count as u32 {
            // wrapping entry: mark the tail blocks skipped, restart at 0
            skipped_blocks = self.block_count - start_block_index as i32;
            start_block_index = 0;
            new_write_index = write_index + (skipped_blocks + blocks_needed) as u32;
        } else {
            new_write_index = write_index + blocks_needed as u32;
        }

        // evict old entries before overwriting their blocks
        let min_read_index = self.load_min_read_index();
        let required_min_read_index = new_write_index.saturating_sub(self.block_count as u32);
        if min_read_index < required_min_read_index {
            let new_min = self.skip_to_valid_entry(min_read_index, required_min_read_index);
            self.store_min_read_index(new_min);
        }

        for i in 0..skipped_blocks {
            let offset = self.block_offset((write_index + i as u32) % self.block_count as u32);
            self.set_block_data_size(offset, 0);
        }

        let first_block_offset = self.block_offset(start_block_index);
        self.set_block_data_size(first_block_offset, data_size as u32);

        let data_offset = first_block_offset + BLOCK_HEADER_SIZE;
        let max_data_space = blocks_needed * self.block_size - BLOCK_HEADER_SIZE;
        fill(self.pool.slice_sized(data_offset, max_data_space));

        self.store_write_index(new_write_index);
        true
    }
}

/// Per-reader cursor. Each consumer holds its own; no coordination with
/// other consumers or the producer beyond the two header atomics.
#[derive(Default)]
pub struct SpmcRingBufferIterator {
    local_read_index: u32,
}

impl SpmcRingBufferIterator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the producer overwrote entries this reader never saw.
    pub fn has_missed_entries(&self, rb: &SpmcRingBuffer) -> bool {
        self.local_read_index < rb.load_min_read_index()
    }

    pub fn has_next(&self, rb: &SpmcRingBuffer) -> bool {
        self.local_read_index < rb.load_write_index()
    }

    /// Read the next entry through `consume`. Returns false when there is
    /// nothing to read or when the producer overtook this reader mid-read
    /// (a stale read; the cursor snaps forward in both miss cases).
    pub fn read_next<F: FnOnce(MemoryAccessor)>(
        &mut self,
        rb: &SpmcRingBuffer,
        consume: F,
    ) -> bool {
        if !self.has_next(rb) {
            return false;
        }

        if self.has_missed_entries(rb) {
            self.local_read_index = rb.load_min_read_index();
        }

        let write_index = rb.load_write_index();
        while self.local_read_index < write_index {
            let block_offset = rb.block_offset(self.local_read_index % rb.block_count as u32);
            let data_size = rb.block_data_size(block_offset);

            if data_size == 0 {
                // skipped by a wrapping entry
                self.local_read_index += 1;
                continue;
            }

            let blocks_needed = rb.blocks_needed(data_size as i32);

            let data_offset = block_offset + BLOCK_HEADER_SIZE;
            let max_data_space = blocks_needed * rb.block_size - BLOCK_HEADER_SIZE;
            consume(rb.pool.slice_sized(data_offset, max_data_space));

            // if min_read_index passed us while we were reading, the data
            // may have been overwritten under us
            let new_min_read_index = rb.load_min_read_index();
            if self.local_read_index < new_min_read_index {
                self.local_read_index = new_min_read_index;
                return false;
            }

            self.local_read_index += blocks_needed as u32;
            return true;
        }

        false
    }

    /// Skip everything currently in the ring.
    pub fn set_to_end(&mut self, rb: &SpmcRingBuffer) {
        self.local_read_index = rb.load_write_index();
    }
}
