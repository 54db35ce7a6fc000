//! Benchmarks for the episode graph's hot paths: nearest-neighbour lookup,
//! spreading activation, and full retrieval over graphs of varying size.
//! Run with: cargo bench -p reveries-core

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reveries_core::{retrieve, Episode, EpisodeGraph, LinkKind};

fn synthetic_embedding(i: usize, dims: usize) -> Vec<f32> {
    (0..dims).map(|j| ((i * dims + j) as f32).sin()).collect()
}

fn build_graph(node_count: usize, dims: usize) -> EpisodeGraph {
    let mut graph = EpisodeGraph::new();
    for i in 0..node_count {
        let embedding = synthetic_embedding(i, dims);
        let mut episode = Episode::new(
            format!("episode-{i}"),
            format!("synthetic episode {i}"),
            embedding,
            Utc::now(),
        );
        episode.salience = 0.5;
        graph.add_node(episode);
        if i > 0 {
            let _ = graph.add_link(&format!("episode-{i}"), &format!("episode-{}", i - 1), 0.6, LinkKind::Thematic);
        }
    }
    graph
}

fn bench_find_nearest(c: &mut Criterion) {
    let graph = build_graph(500, 32);
    let query = synthetic_embedding(250, 32);

    c.bench_function("find_nearest_500nodes", |b| {
        b.iter(|| {
            black_box(graph.find_nearest(&query, 10));
        })
    });
}

fn bench_spread_activation(c: &mut Criterion) {
    let graph = build_graph(500, 32);
    let mut seeds = std::collections::HashMap::new();
    seeds.insert("episode-250".to_string(), 1.0);

    c.bench_function("spread_activation_500nodes_3hops", |b| {
        b.iter(|| {
            black_box(graph.spread_activation(&seeds, 3, 0.5));
        })
    });
}

fn bench_retrieve(c: &mut Criterion) {
    let query = synthetic_embedding(250, 32);

    c.bench_function("retrieve_500nodes", |b| {
        b.iter(|| {
            let mut graph = build_graph(500, 32);
            black_box(retrieve(&mut graph, &query, 10, 3, 0.5, 0.01));
        })
    });
}

fn bench_apply_decay(c: &mut Criterion) {
    c.bench_function("apply_decay_500nodes", |b| {
        b.iter(|| {
            let mut graph = build_graph(500, 32);
            graph.apply_decay(7.0, 0.05, 0.05);
            black_box(&graph);
        })
    });
}

criterion_group!(
    benches,
    bench_find_nearest,
    bench_spread_activation,
    bench_retrieve,
    bench_apply_decay,
);
criterion_main!(benches);
