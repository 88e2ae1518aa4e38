//! # Snapshot Benchmarks
//!
//! Codec throughput and the cost of one sequenced year.
//!
//! Run with: `cargo bench -p tundra-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tundra_core::{
    CohortId, CohortSequencer, MemorySnapshotStore, ModelStateSnapshot, RelaxationKernel,
    RelaxationParams, RunContext, StageKind, StageSettings, snapshot_from_bytes,
    snapshot_to_bytes,
};

fn bench_codec(c: &mut Criterion) {
    let state = ModelStateSnapshot::cold_start(CohortId::new(10, 20), 4);
    let bytes = snapshot_to_bytes(&state).expect("encode");

    let mut group = c.benchmark_group("snapshot_codec");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(snapshot_to_bytes(black_box(&state)).expect("encode")))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(snapshot_from_bytes(black_box(&bytes)).expect("decode")))
    });
    group.finish();
}

fn bench_sequencing(c: &mut Criterion) {
    let kernel = RelaxationKernel::new(RelaxationParams::default()).expect("kernel");
    let ctx = RunContext::default();
    let mut group = c.benchmark_group("equilibrium_years");

    for years in [1i64, 10, 50].iter() {
        let mut settings = StageSettings::default();
        settings.override_years(StageKind::Equilibrium, *years);
        if let Some(eq) = settings.eq.as_mut() {
            eq.modules.bgc = Some(true);
        }
        let plan = settings.resolve().expect("plan");

        group.bench_with_input(BenchmarkId::from_parameter(years), years, |b, _| {
            b.iter(|| {
                let store = MemorySnapshotStore::new();
                let report = CohortSequencer::new(&plan, &kernel, &store, &ctx)
                    .run(CohortId::new(0, 0));
                black_box(report)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec, bench_sequencing);
criterion_main!(benches);
