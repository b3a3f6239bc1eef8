// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Placed ring buffer: push/shift/id bookkeeping, wrap behavior with mixed
// element sizes, and the reader iterator.

use mirrorbus::accessor::MemoryOffset;
use mirrorbus::placed_ring::{PlacedRingBuffer, PlacedRingBufferIterator, ELEMENT_HEADER_SIZE};

const INT_COUNT: i32 = 100;
const BUFFER_SIZE: i32 = INT_COUNT * (ELEMENT_HEADER_SIZE + 4);

struct TestRing {
    _buf: Vec<u64>, // u64 backing keeps the placed struct aligned
    rb: *mut PlacedRingBuffer,
}

impl TestRing {
    fn new() -> Self {
        let mem_size = PlacedRingBuffer::mem_size(BUFFER_SIZE) as usize;
        let mut buf = vec![0u64; (mem_size + 7) / 8];
        let rb = buf.as_mut_ptr() as *mut PlacedRingBuffer;
        unsafe { (*rb).init(BUFFER_SIZE) };
        Self { _buf: buf, rb }
    }

    fn get(&self) -> &mut PlacedRingBuffer {
        unsafe { &mut *self.rb }
    }
}

fn push_value(rb: &mut PlacedRingBuffer, num_bytes: i32, value: i32) {
    let mut pos = MemoryOffset::default();
    rb.push(num_bytes, None).write_value(value, &mut pos);
}

fn value_at(rb: &PlacedRingBuffer, index: i32) -> i32 {
    let mut pos = MemoryOffset::default();
    rb.get_at(index).read_value(&mut pos)
}

// order matters
fn expect_ring_equals(rb: &PlacedRingBuffer, start: i32, end: i32) {
    assert_eq!(rb.count, 1 + (end - start));
    for i in 0..rb.count {
        assert_eq!(value_at(rb, i), start + i);
    }
}

#[test]
fn basic_operations() {
    let ring = TestRing::new();
    let rb = ring.get();

    assert_eq!(rb.pool_size, BUFFER_SIZE);
    assert_eq!(rb.count, 0);
    assert_eq!(rb.start_id, 0);
    assert_eq!(rb.start_offset, 0);
    assert_eq!(rb.prewrap_offset, BUFFER_SIZE);

    // fill the buffer
    for i in 0..INT_COUNT {
        push_value(rb, 4, i);
        assert_eq!(value_at(rb, i), i);
    }
    assert_eq!(rb.count, INT_COUNT);
    expect_ring_equals(rb, 0, INT_COUNT - 1);
    assert_eq!(rb.index_for_id(0), 0);
    assert_eq!(rb.index_for_id(3), 3);

    // an additional push wraps, evicting element 0
    push_value(rb, 4, INT_COUNT);
    assert_eq!(rb.count, INT_COUNT);
    expect_ring_equals(rb, 1, INT_COUNT);

    // shift the oldest one out
    {
        let mut pos = MemoryOffset::default();
        assert_eq!(rb.shift().read_value::<i32>(&mut pos), 1);
        assert_eq!(rb.count, INT_COUNT - 1);
        expect_ring_equals(rb, 2, INT_COUNT);
    }

    // evicted ids resolve to index 0; live ids to their real index
    assert_eq!(rb.index_for_id(0), 0);
    assert_eq!(rb.index_for_id(1), 0);
    assert_eq!(rb.index_for_id(2), 0);
    assert_eq!(rb.index_for_id(3), 1);
    assert_eq!(value_at(rb, rb.index_for_id(3)), 3);

    // now there is room, so no eviction
    push_value(rb, 4, INT_COUNT + 1);
    assert_eq!(rb.count, INT_COUNT);
    expect_ring_equals(rb, 2, INT_COUNT + 1);

    // drain everything
    for i in 0..INT_COUNT {
        assert_eq!(rb.count, INT_COUNT - i);
        expect_ring_equals(rb, 2 + i, INT_COUNT + 1);
        let mut pos = MemoryOffset::default();
        assert_eq!(rb.shift().read_value::<i32>(&mut pos), 2 + i);
    }
    assert_eq!(rb.count, 0);

    // shifting an empty ring returns a null accessor
    assert!(rb.shift().is_null());
    assert_eq!(rb.count, 0);
}

#[test]
fn mixed_sizes() {
    let ring = TestRing::new();
    let rb = ring.get();

    push_value(rb, 396, 0);
    assert_eq!(rb.count, 1);
    assert_eq!(rb.start_id, 0);
    assert_eq!(rb.prewrap_offset, 800);

    push_value(rb, 196, 0);
    assert_eq!(rb.count, 2);
    assert_eq!(rb.start_id, 0);
    assert_eq!(rb.prewrap_offset, 800);

    // does not fit at the tail: wraps, evicting the first element
    push_value(rb, 396, 0);
    assert_eq!(rb.count, 2);
    assert_eq!(rb.start_id, 1);
    assert_eq!(rb.prewrap_offset, 600);
}

#[test]
fn push_too_large_returns_null() {
    let ring = TestRing::new();
    let rb = ring.get();

    assert!(rb.push(BUFFER_SIZE, None).is_null());
    assert!(!rb.push(BUFFER_SIZE - ELEMENT_HEADER_SIZE - 4, None).is_null());
}

#[test]
fn push_reports_monotonic_ids() {
    let ring = TestRing::new();
    let rb = ring.get();

    for expected in 0..5 {
        let mut id = -1;
        rb.push(4, Some(&mut id));
        assert_eq!(id, expected);
    }
    assert_eq!(rb.min_id(), 0);
    assert_eq!(rb.max_id(), 4);

    rb.shift();
    assert_eq!(rb.min_id(), 1);

    // ids are never reused after eviction
    let mut id = -1;
    rb.push(4, Some(&mut id));
    assert_eq!(id, 5);
}

#[test]
fn iterator() {
    let ring = TestRing::new();
    let rb = ring.get();

    let mut iter = PlacedRingBufferIterator::new();

    iter.set_to_end(rb);
    assert!(!iter.has_missed_entries(rb));
    assert!(!iter.has_next(rb));

    // push a value in
    push_value(rb, 396, 10);
    assert!(!iter.has_missed_entries(rb));
    assert!(iter.has_next(rb));

    // read it through the iterator
    {
        let mem = iter.next(rb);
        assert!(!mem.is_null());
        let mut pos = MemoryOffset::default();
        assert_eq!(mem.read_value::<i32>(&mut pos), 10);
    }
    assert!(!iter.has_missed_entries(rb));
    assert!(!iter.has_next(rb));

    // push another value in
    push_value(rb, 196, 20);
    assert!(iter.has_next(rb));
    {
        let mem = iter.next(rb);
        let mut pos = MemoryOffset::default();
        assert_eq!(mem.read_value::<i32>(&mut pos), 20);
    }

    // overflow the iterator's position entirely
    for _ in 0..INT_COUNT {
        push_value(rb, 20, 0);
    }
    assert!(iter.has_missed_entries(rb));
    assert!(iter.has_next(rb));
    iter.set_to_end(rb);
    assert!(!iter.has_missed_entries(rb));
    assert!(!iter.has_next(rb));

    // drain the ring; the iterator stays caught up
    while rb.count > 0 {
        rb.shift();
    }
    assert!(!iter.has_missed_entries(rb));
    assert!(!iter.has_next(rb));

    // an element pushed and removed behind the iterator's back is a miss
    push_value(rb, 396, 60);
    rb.shift();
    assert!(iter.has_missed_entries(rb));
    assert!(iter.has_next(rb));

    iter.set_to_end(rb);

    // one more element; the iterator picks it up normally
    push_value(rb, 396, 30);
    assert_eq!(rb.count, 1);
    assert!(!iter.has_missed_entries(rb));
    assert!(iter.has_next(rb));
    {
        let mem = iter.next(rb);
        let mut pos = MemoryOffset::default();
        assert_eq!(mem.read_value::<i32>(&mut pos), 30);
    }
    assert!(!iter.has_next(rb));
}
