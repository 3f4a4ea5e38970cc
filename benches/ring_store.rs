//! Criterion benchmarks for the sample ring hot paths.
//!
//! The calibration loop appends to every channel each tick, and window
//! queries are issued by every display refresh, so both need to stay far
//! below the tick period even for the largest window.
//!
//! Run with: cargo bench --bench ring_store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sensor_daq::channel::Sample;
use sensor_daq::data::{RingStore, WindowIndex};

const RATE_HZ: f64 = 10.0;
const DURATIONS: [u32; 5] = [30, 60, 120, 300, 600];

fn filled(capacity: usize, count: usize) -> RingStore {
    let mut ring = RingStore::new(capacity);
    for i in 0..count {
        ring.append(Sample::new(i as f64 * 0.1, i as f64));
    }
    ring
}

/// Append cost with and without the power-of-two mask.
fn ring_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_append");
    for capacity in [6000usize, 8192] {
        let mut ring = filled(capacity, capacity);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            let mut t = 0.0;
            b.iter(|| {
                t += 0.1;
                ring.append(black_box(Sample::new(t, t)));
            });
        });
    }
    group.finish();
}

/// Window query on a full buffer (precomputed offsets) and a partial one.
fn ring_window(c: &mut Criterion) {
    let capacity = 8192;
    let index = WindowIndex::new(capacity, RATE_HZ, &DURATIONS, 300);
    let full = filled(capacity, capacity * 2);
    let partial = filled(capacity, 350);

    let mut group = c.benchmark_group("ring_window");
    for duration in DURATIONS {
        group.bench_with_input(BenchmarkId::new("full", duration), &duration, |b, &d| {
            b.iter(|| full.window(&index, black_box(d)));
        });
        group.bench_with_input(BenchmarkId::new("partial", duration), &duration, |b, &d| {
            b.iter(|| partial.window(&index, black_box(d)));
        });
    }
    group.finish();
}

/// Chronological copy of the whole buffer.
fn ring_all(c: &mut Criterion) {
    let ring = filled(8192, 10_000);
    c.bench_function("ring_all", |b| b.iter(|| black_box(ring.all())));
}

criterion_group!(benches, ring_append, ring_window, ring_all);
criterion_main!(benches);
