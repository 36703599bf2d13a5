//! Benchmarks for the per-frame registration stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cv_mapping::point_cloud::{
    compute_fpfh_features, estimate_normals, voxel_down_sample, FeatureParams,
    NormalEstimationParams,
};
use cv_mapping::registration::{
    registration_icp_point_to_plane, registration_ransac_based_on_feature_matching, IcpOptions,
    RansacOptions,
};
use cv_mapping::{PointCloud, RigidTransform};
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Noisy wavy surface with `side²` points.
fn create_surface(side: usize) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(9);
    let step = 1.0 / side as f64;
    let mut points = Vec::with_capacity(side * side);
    for i in 0..side {
        for j in 0..side {
            let x = i as f64 * step;
            let y = j as f64 * step;
            let z = 0.1 * (4.0 * x).sin() * (3.0 * y).cos() + rng.gen_range(-0.001..0.001);
            points.push(Point3::new(x, y, z));
        }
    }
    PointCloud::new(points)
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for side in [50usize, 100, 200] {
        let cloud = create_surface(side);
        group.bench_with_input(BenchmarkId::new("voxel_down_sample", side * side), &cloud, |b, pc| {
            b.iter(|| voxel_down_sample(black_box(pc), 0.02));
        });
        group.bench_with_input(BenchmarkId::new("estimate_normals", side * side), &cloud, |b, pc| {
            b.iter(|| {
                let mut pc = pc.clone();
                estimate_normals(&mut pc, &NormalEstimationParams::new(0.05, 30));
                pc
            });
        });
    }

    group.finish();
}

fn benchmark_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    let mut target = create_surface(60);
    estimate_normals(&mut target, &NormalEstimationParams::new(0.06, 30));
    let motion = RigidTransform::from_axis_angle(&Vector3::z(), 0.05, Vector3::new(0.02, -0.01, 0.0));
    let source = target.transformed(&motion);

    group.bench_function("icp_point_to_plane", |b| {
        b.iter(|| {
            registration_icp_point_to_plane(
                black_box(&source),
                black_box(&target),
                &RigidTransform::identity(),
                &IcpOptions::default(),
            )
        });
    });

    let params = FeatureParams {
        radius: 0.12,
        max_neighbors: 100,
    };
    let source_features = compute_fpfh_features(&source, &params).unwrap();
    let target_features = compute_fpfh_features(&target, &params).unwrap();

    group.bench_function("fpfh", |b| {
        b.iter(|| compute_fpfh_features(black_box(&target), &params));
    });

    let options = RansacOptions {
        max_iterations: 4096,
        max_correspondence_distance: 0.03,
        ..Default::default()
    };
    group.bench_function("ransac_feature_matching", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(1);
            registration_ransac_based_on_feature_matching(
                &source,
                &target,
                &source_features,
                &target_features,
                &options,
                &mut rng,
            )
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_preprocessing, benchmark_registration);
criterion_main!(benches);
