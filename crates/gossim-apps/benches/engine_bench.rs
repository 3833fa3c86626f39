//! Benchmarks for full simulation runs

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use gossim_apps::{default_registry, FLOW_UPDATING, PUSH_SUM};
use gossim_core::{MapConfig, NullReport, SimRng};
use gossim_engine::{AppSpawner, ComEngine, EngineConfig, Topology};

fn run_once(algorithm: &str, topology: &Topology, config: &EngineConfig) -> u64 {
    let source = MapConfig::new().with(algorithm, "initValue", "uniform;0;100");
    let constructor = default_registry().get(algorithm).unwrap();
    let mut engine = ComEngine::new(topology, None, config.clone(), 0, SimRng::new(42));
    engine
        .install(
            AppSpawner::new(constructor, algorithm, Arc::new(source)),
            &mut NullReport,
        )
        .unwrap();
    engine.run(&mut NullReport).unwrap();
    engine.channel_totals().sent
}

fn bench_sync_flow_updating(c: &mut Criterion) {
    let config = EngineConfig::synchronous().with_max_ticks(100);
    let mut group = c.benchmark_group("sync_flow_updating");
    for nodes in [16usize, 64, 256] {
        let topology = Topology::ring(nodes);
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &topology, |b, topology| {
            b.iter(|| black_box(run_once(FLOW_UPDATING, topology, &config)))
        });
    }
    group.finish();
}

fn bench_async_push_sum(c: &mut Criterion) {
    let config = EngineConfig::asynchronous().with_max_ticks(100);
    let topology = Topology::random(64, 0.1, &mut SimRng::new(7));

    c.bench_function("async_push_sum_64", |b| {
        b.iter(|| black_box(run_once(PUSH_SUM, &topology, &config)))
    });
}

criterion_group!(benches, bench_sync_flow_updating, bench_async_push_sum);
criterion_main!(benches);
