use cloudmesh_layers::DistributedLayer;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_node_to_invoke(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_to_invoke");
    for nodes in [1usize, 8, 64] {
        let layer = DistributedLayer::new("bench.Layer", "Layer");
        for i in 0..nodes {
            layer.add_node(format!("node-{}", i));
        }
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &layer, |b, layer| {
            b.iter(|| black_box(layer.node_to_invoke()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_node_to_invoke);
criterion_main!(benches);
