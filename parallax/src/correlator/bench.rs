//! Benchmark module for tile correlation.
//! Run with: cargo bench -p parallax --features bench --bench tile_correlation

use std::hint::black_box;

use common::Buffer2;
use criterion::{BenchmarkId, Criterion, Throughput};
use glam::Vec2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::{CorrelatorInputs, DisparityMosaic, SeededCorrelator};
use crate::config::{Config, CostFunction};
use crate::diagnostics::NullDiagnostics;
use crate::math::SearchRange;
use crate::matcher::BlockMatcher;
use crate::raster::MemoryRaster;

/// Register tile correlation benchmarks with Criterion.
pub fn benchmarks(c: &mut Criterion) {
    benchmark_cost_functions(c);
    benchmark_tile_sizes(c);
}

/// Noise pair with the right image shifted by `shift` columns.
fn noise_pair(width: usize, height: usize, shift: usize) -> (MemoryRaster, MemoryRaster) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let left = Buffer2::from_fn(width, height, |_, _| rng.random_range(0.0f32..255.0));
    let right = Buffer2::from_fn(width, height, |x, y| {
        if x >= shift {
            left[(x - shift, y)]
        } else {
            f32::NAN
        }
    });
    (MemoryRaster::new(left), MemoryRaster::new(right))
}

fn run_grid(config: &Config, left: &MemoryRaster, right: &MemoryRaster, range: SearchRange) {
    let matcher = BlockMatcher::new(config.subpixel);
    let inputs = CorrelatorInputs {
        left,
        right,
        seed: None,
        sub_scale: Vec2::ONE,
        search_range: range,
    };
    let (w, h) = left.image().size();
    let mosaic = DisparityMosaic::new(w, h);
    if let Ok(correlator) = SeededCorrelator::new(config, inputs, &matcher, &NullDiagnostics) {
        let _ = correlator.run(&mosaic);
    }
    black_box(mosaic.into_field());
}

fn benchmark_cost_functions(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_cost_function");
    let (left, right) = noise_pair(256, 256, 12);
    let range = SearchRange::from_bounds(0.0, -2.0, 24.0, 2.0);
    group.throughput(Throughput::Elements(256 * 256));

    for cost in [
        CostFunction::AbsoluteDifference,
        CostFunction::SquaredDifference,
        CostFunction::NormalizedCrossCorrelation,
    ] {
        let config = Config {
            cost_function: cost,
            kernel_size: [7, 7],
            tile_size: 128,
            ..Config::default()
        };
        group.bench_function(BenchmarkId::new("cost", format!("{cost:?}")), |b| {
            b.iter(|| run_grid(&config, &left, &right, range))
        });
    }
    group.finish();
}

fn benchmark_tile_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_size");
    let (left, right) = noise_pair(512, 512, 12);
    let range = SearchRange::from_bounds(0.0, 0.0, 24.0, 0.0);
    group.throughput(Throughput::Elements(512 * 512));

    for tile_size in [64, 128, 256, 512] {
        let config = Config {
            cost_function: CostFunction::AbsoluteDifference,
            kernel_size: [7, 7],
            tile_size,
            ..Config::default()
        };
        group.bench_function(BenchmarkId::new("tile", tile_size), |b| {
            b.iter(|| run_grid(&config, &left, &right, range))
        });
    }
    group.finish();
}
