//! Commitment tree throughput.
//!
//! Measures the root commitment and a single unit sub-commitment over
//! padded traces of increasing depth. Root computation forks with rayon
//! once intervals are large enough, so the deeper traces exercise the
//! parallel path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bisection::commitment::{root_commitment, sub_commitment};
use bisection::trace::{Interval, State, Trace};

/// A trace of `2^levels + 1` distinct states.
fn synthetic_trace(levels: u32) -> Trace {
    let len = (1usize << levels) + 1;
    let states = (0..len)
        .map(|j| State::new((j * 7 % 65_521) as u16, (j % 65_536) as u16, (j % 3) as u16))
        .collect();
    Trace::new(states).unwrap()
}

fn bench_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("root_commitment");
    for levels in [5u32, 10, 14] {
        let trace = synthetic_trace(levels);
        group.bench_function(format!("levels_{}", levels), |b| {
            b.iter(|| root_commitment(black_box(&trace)))
        });
    }
    group.finish();
}

fn bench_unit(c: &mut Criterion) {
    let trace = synthetic_trace(14);
    let unit = Interval::new(8, 9, trace.len()).unwrap();
    c.bench_function("sub_commitment_unit", |b| {
        b.iter(|| sub_commitment(black_box(&trace), black_box(unit)).unwrap())
    });
}

criterion_group!(benches, bench_root, bench_unit);
criterion_main!(benches);
