//! Benchmarks for the tree editor and the DRRT★ repair.
//!
//! The replanning deadline is only useful if the per-iteration primitives
//! (nearest-neighbor queries, rewires, validity checks) stay cheap as the
//! tree grows; these benchmarks watch exactly that.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::dvector;
use reroute_core::metrics::EuclideanMetric;
use reroute_core::replan::DrrtStar;
use reroute_core::sampler::LocalInformedSampler;
use reroute_core::scene::{Obstacle, SceneChecker, SceneSnapshot};
use reroute_core::tree::{CheckedEdges, Path, Tree};
use std::time::Duration;

/// Tree pre-grown to a given size with uniform samples.
fn setup_tree(num_nodes: usize) -> Tree {
    let mut tree = Tree::new(dvector![0.0, 0.0], 0.4);
    let checker = SceneChecker::new(SceneSnapshot::default());
    let mut sampler = LocalInformedSampler::new(
        dvector![0.0, 0.0],
        dvector![2.0, 0.0],
        dvector![-5.0, -5.0],
        dvector![5.0, 5.0],
        f64::INFINITY,
    )
    .with_seed(11);
    sampler.add_ball(dvector![1.0, 0.0], 3.0);

    while tree.num_nodes() < num_nodes {
        let q = sampler.sample();
        tree.extend(&q, &checker, &EuclideanMetric);
    }
    tree
}

fn obstructed_path() -> Path {
    let mut path = Path::from_waypoints(
        &[dvector![0.0, 0.0], dvector![1.0, 0.0], dvector![2.0, 0.0]],
        &EuclideanMetric,
        0.4,
    )
    .unwrap();
    let scene = SceneSnapshot::new(vec![Obstacle::new("ball", dvector![1.5, 0.0], 0.1)]);
    let checker = SceneChecker::new(scene);
    path.revalidate_from(None, &checker, &EuclideanMetric);
    path
}

/// Benchmark: rewire throughput against tree size.
fn bench_rewire_vs_tree_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewire_vs_tree_size");
    group.throughput(Throughput::Elements(1));

    for num_nodes in [64, 256, 1024, 4096].iter() {
        let tree = setup_tree(*num_nodes);
        let checker = SceneChecker::new(SceneSnapshot::default());

        group.bench_with_input(BenchmarkId::new("nodes", num_nodes), num_nodes, |b, _| {
            b.iter_batched(
                || (tree.clone(), CheckedEdges::new()),
                |(mut tree, mut checked)| {
                    let node = tree.rewire(
                        &dvector![1.1, 0.4],
                        &mut checked,
                        1.0,
                        &[],
                        &checker,
                        &EuclideanMetric,
                        None,
                    );
                    black_box(node)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark: deep clone cost, the price of replanning isolation.
fn bench_path_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_clone");
    group.throughput(Throughput::Elements(1));

    for num_nodes in [64, 1024, 8192].iter() {
        let tree = setup_tree(*num_nodes);
        let goal = tree.nearest(&dvector![2.0, 0.0]).unwrap();
        let edges = tree.edges_to(goal).unwrap();
        let path = Path::new(tree, edges).unwrap();

        group.bench_with_input(BenchmarkId::new("nodes", num_nodes), num_nodes, |b, _| {
            b.iter(|| black_box(path.clone()))
        });
    }

    group.finish();
}

/// Benchmark: one full DRRT★ repair under a tight budget.
fn bench_drrt_star_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("drrt_star_repair");

    let path = obstructed_path();
    let scene = SceneSnapshot::new(vec![Obstacle::new("ball", dvector![1.5, 0.0], 0.1)]);

    for budget_ms in [5u64, 20, 50].iter() {
        group.bench_with_input(
            BenchmarkId::new("budget_ms", budget_ms),
            budget_ms,
            |b, &budget_ms| {
                b.iter(|| {
                    let mut replanner = DrrtStar::new(
                        Box::new(SceneChecker::new(scene.clone())),
                        Box::new(EuclideanMetric),
                        dvector![-5.0, -5.0],
                        dvector![5.0, 5.0],
                    )
                    .with_seed(7);
                    let outcome = replanner.replan(
                        &dvector![1.0, 0.0],
                        &path,
                        Duration::from_millis(budget_ms),
                    );
                    black_box(outcome.success)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_rewire_vs_tree_size,
    bench_path_clone,
    bench_drrt_star_repair,
);

criterion_main!(benches);
