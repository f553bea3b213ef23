use criterion::{criterion_group, criterion_main};

fn tile_benchmarks(c: &mut criterion::Criterion) {
    parallax::correlator::bench::benchmarks(c);
}

criterion_group!(benches, tile_benchmarks);
criterion_main!(benches);
