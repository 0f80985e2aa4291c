//! Repartitioning benchmarks.
//!
//! Searches run on a projection of a synthetic graph; plan application runs
//! against a clone of the engine the projection was taken from.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use shardgraph_bench::Workload;
use shardgraph_repartition::metis::render_graph;
use shardgraph_repartition::{
    Annealing, AnnealingConfig, Applier, EdgeCutCost, LocalSearch, LocalSearchConfig,
    LogicalProjection, ReplicaCost,
};
use shardgraph_types::UserId;

// ============================================================================
// Search Benchmarks
// ============================================================================

fn bench_local_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_search");
    group.sample_size(20);

    for users in [500u64, 2_000] {
        let engine = Workload::new(users, 8).engine();
        let plain = LogicalProjection::from_state(engine.state());
        let replicas = LogicalProjection::with_replicas(engine.state());
        let config = LocalSearchConfig::default();

        group.bench_with_input(BenchmarkId::new("edge_cut", users), &plain, |b, p| {
            b.iter(|| black_box(LocalSearch::new(config, EdgeCutCost).run(p)));
        });
        group.bench_with_input(BenchmarkId::new("replicas", users), &replicas, |b, p| {
            b.iter(|| black_box(LocalSearch::new(config, ReplicaCost).run(p)));
        });
    }

    group.finish();
}

fn bench_annealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("annealing");
    group.sample_size(10);

    let engine = Workload::new(1_000, 8).engine();
    let projection = LogicalProjection::from_state(engine.state());

    for restarts in [1usize, 4, 8] {
        let config = AnnealingConfig {
            initial_t: 1.5,
            delta_t: 0.05,
            restarts,
            ..AnnealingConfig::default()
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(restarts),
            &projection,
            |b, p| {
                b.iter(|| {
                    let mut rng = StdRng::seed_from_u64(7);
                    black_box(Annealing::new(config, EdgeCutCost).run(p, &mut rng))
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Plan Application and External Format
// ============================================================================

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_plan");
    group.sample_size(20);

    let engine = Workload::new(1_000, 8).engine();
    let projection = LogicalProjection::from_state(engine.state());
    let plan = LocalSearch::new(LocalSearchConfig::default(), EdgeCutCost)
        .run(&projection)
        .plan;

    group.bench_function("local_search_plan", |b| {
        b.iter_batched(
            || engine.clone(),
            |mut engine| black_box(Applier::apply(&mut engine, &plan)),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_render_graph(c: &mut Criterion) {
    let engine = Workload::new(2_000, 8).engine();
    let friendships = engine.state().friendships_map();
    let users: Vec<UserId> = engine.state().users().map(|(u, _)| u).collect();

    c.bench_function("metis_render_graph", |b| {
        b.iter(|| black_box(render_graph(&users, &friendships)));
    });
}

criterion_group!(
    benches,
    bench_local_search,
    bench_annealing,
    bench_apply,
    bench_render_graph
);
criterion_main!(benches);
