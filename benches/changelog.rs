// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Changelog ring buffer benchmarks.
//
// Run with:
//   cargo bench --bench changelog
//
// Groups:
//   push_steady - push into a ring with room (no eviction)
//   push_evict  - push into a full ring (every push shifts the oldest)
//   iterate     - walk a full ring with the reader iterator

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mirrorbus::placed_ring::{PlacedRingBuffer, PlacedRingBufferIterator};

const POOL_SIZE: i32 = 64 * 1024;

const SIZES: &[(&str, i32)] = &[("small_16", 16), ("medium_64", 64), ("large_512", 512)];

struct BenchRing {
    _buf: Vec<u64>,
    rb: *mut PlacedRingBuffer,
}

impl BenchRing {
    fn new() -> Self {
        let mem_size = PlacedRingBuffer::mem_size(POOL_SIZE) as usize;
        let mut buf = vec![0u64; (mem_size + 7) / 8];
        let rb = buf.as_mut_ptr() as *mut PlacedRingBuffer;
        unsafe { (*rb).init(POOL_SIZE) };
        Self { _buf: buf, rb }
    }

    fn get(&self) -> &mut PlacedRingBuffer {
        unsafe { &mut *self.rb }
    }
}

fn bench_push_steady(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_steady");

    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            let ring = BenchRing::new();
            b.iter(|| {
                let rb = ring.get();
                // drain before the pool fills so pushes never evict
                if rb.count > 16 {
                    while rb.count > 0 {
                        rb.shift();
                    }
                }
                black_box(rb.push(sz, None))
            });
        });
    }

    group.finish();
}

fn bench_push_evict(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_evict");

    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            let ring = BenchRing::new();
            // prefill to capacity so every push evicts
            while !ring.get().push(sz, None).is_null() && ring.get().count < POOL_SIZE / (sz + 4) {
            }
            b.iter(|| black_box(ring.get().push(sz, None)));
        });
    }

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    for &(label, size) in SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            let ring = BenchRing::new();
            for _ in 0..(POOL_SIZE / (sz + 4) - 1) {
                ring.get().push(sz, None);
            }
            b.iter(|| {
                let rb = ring.get();
                let mut iter = PlacedRingBufferIterator::new();
                let mut total = 0;
                while iter.has_next(rb) {
                    total += iter.next(rb).size();
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push_steady, bench_push_evict, bench_iterate);
criterion_main!(benches);
