//! Fast Point Feature Histograms (FPFH)
//!
//! Each point gets a 33-bin descriptor: three 11-bin histograms of the Darboux-frame angles
//! between the point and its neighbours. The descriptor only depends on relative positions
//! and normals, so it is unchanged by rigid motions of the cloud.

use crate::spatial::{Neighbor, SpatialIndex};
use cv_core::{Error, PointCloud, Result};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::f64::consts::PI;

pub const FPFH_BINS_PER_FEATURE: usize = 11;
pub const FPFH_DIMENSION: usize = 3 * FPFH_BINS_PER_FEATURE;

/// One FPFH descriptor, index-aligned with the cloud it was computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FPFHFeature {
    pub histogram: [f64; FPFH_DIMENSION],
}

impl Default for FPFHFeature {
    fn default() -> Self {
        Self {
            histogram: [0.0; FPFH_DIMENSION],
        }
    }
}

/// Hybrid neighbourhood used for descriptors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureParams {
    pub radius: f64,
    pub max_neighbors: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            radius: 0.25,
            max_neighbors: 100,
        }
    }
}

/// Euclidean distance between two descriptors.
pub fn feature_distance(a: &FPFHFeature, b: &FPFHFeature) -> f64 {
    feature_distance_squared(a, b).sqrt()
}

pub fn feature_distance_squared(a: &FPFHFeature, b: &FPFHFeature) -> f64 {
    a.histogram
        .iter()
        .zip(b.histogram.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Compute FPFH descriptors for every point.
///
/// Fails with [`Error::MissingNormals`] when the cloud has no normals or any normal is
/// non-finite or zero.
pub fn compute_fpfh_features(pc: &PointCloud, params: &FeatureParams) -> Result<Vec<FPFHFeature>> {
    let normals = pc.normals.as_ref().ok_or(Error::MissingNormals { index: 0 })?;
    if let Some(index) = normals
        .iter()
        .position(|n| !n.iter().all(|c| c.is_finite()) || n.norm_squared() < 1e-24)
    {
        return Err(Error::MissingNormals { index });
    }
    if pc.is_empty() {
        return Ok(Vec::new());
    }

    let tree = SpatialIndex::from_cloud(pc);

    let neighborhoods: Vec<Vec<Neighbor>> = pc
        .points
        .par_iter()
        .map(|p| tree.hybrid(p, params.radius, params.max_neighbors))
        .collect();

    // 1. SPFH: histogram of pair features against direct neighbours
    let spfh: Vec<[f64; FPFH_DIMENSION]> = (0..pc.len())
        .into_par_iter()
        .map(|i| {
            let others: Vec<usize> = neighborhoods[i]
                .iter()
                .map(|nb| nb.index)
                .filter(|&j| j != i)
                .collect();
            let mut hist = [0.0; FPFH_DIMENSION];
            if others.is_empty() {
                return hist;
            }

            let increment = 100.0 / others.len() as f64;
            for j in others {
                let f = compute_pair_features(&pc.points[i], &normals[i], &pc.points[j], &normals[j]);
                hist[bin(f[0] + PI, 2.0 * PI)] += increment;
                hist[FPFH_BINS_PER_FEATURE + bin(f[1] + 1.0, 2.0)] += increment;
                hist[2 * FPFH_BINS_PER_FEATURE + bin(f[2] + 1.0, 2.0)] += increment;
            }
            hist
        })
        .collect();

    // 2. FPFH: own SPFH plus the inverse-squared-distance weighted neighbour SPFHs,
    //    each 11-bin block rescaled to sum to 100
    let features = (0..pc.len())
        .into_par_iter()
        .map(|i| {
            let mut weighted = [0.0; FPFH_DIMENSION];
            let mut block_sums = [0.0; 3];

            for nb in &neighborhoods[i] {
                if nb.index == i || nb.distance_squared == 0.0 {
                    continue;
                }
                for (b, value) in spfh[nb.index].iter().enumerate() {
                    let v = value / nb.distance_squared;
                    weighted[b] += v;
                    block_sums[b / FPFH_BINS_PER_FEATURE] += v;
                }
            }

            let mut histogram = spfh[i];
            for (b, value) in weighted.iter().enumerate() {
                let sum = block_sums[b / FPFH_BINS_PER_FEATURE];
                if sum != 0.0 {
                    histogram[b] += value * 100.0 / sum;
                }
            }
            FPFHFeature { histogram }
        })
        .collect();

    Ok(features)
}

fn bin(shifted: f64, range: f64) -> usize {
    let b = (FPFH_BINS_PER_FEATURE as f64 * shifted / range).floor();
    b.clamp(0.0, (FPFH_BINS_PER_FEATURE - 1) as f64) as usize
}

/// Darboux-frame features `[theta, alpha, phi, distance]` of an oriented point pair.
///
/// The pair is ordered so that the source normal makes the smaller angle with the
/// connecting line, which makes the result symmetric in its arguments.
fn compute_pair_features(
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
    p2: &Point3<f64>,
    n2: &Vector3<f64>,
) -> [f64; 4] {
    let mut dp = p2 - p1;
    let dist = dp.norm();
    if dist == 0.0 {
        return [0.0; 4];
    }

    let angle1 = n1.dot(&dp) / dist;
    let angle2 = n2.dot(&dp) / dist;
    let (u, target, phi) = if angle1.abs().acos() > angle2.abs().acos() {
        dp = -dp;
        (n2, n1, -angle2)
    } else {
        (n1, n2, angle1)
    };

    let v = dp.cross(u);
    let v_norm = v.norm();
    if v_norm == 0.0 {
        return [0.0, 0.0, 0.0, dist];
    }
    let v = v / v_norm;
    let w = u.cross(&v);

    let alpha = v.dot(target);
    let theta = w.dot(target).atan2(u.dot(target));
    [theta, alpha, phi, dist]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normals::{estimate_normals, NormalEstimationParams};
    use cv_core::RigidTransform;

    fn curved_patch() -> PointCloud {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..15 {
            for j in 0..15 {
                let x = i as f64 * 0.05 - 0.33;
                let y = j as f64 * 0.05 - 0.31;
                let z = 0.8 * x * x - 0.3 * y * y + 0.2 * x * y;
                points.push(Point3::new(x, y, z));
                // Analytic normal of z = f(x, y)
                let n = Vector3::new(-(1.6 * x + 0.2 * y), -(-0.6 * y + 0.2 * x), 1.0);
                normals.push(n.normalize());
            }
        }
        PointCloud::new(points).with_normals(normals).unwrap()
    }

    #[test]
    fn test_fpfh_shape_and_block_sums() {
        let pc = curved_patch();
        let features = compute_fpfh_features(&pc, &FeatureParams { radius: 0.15, max_neighbors: 50 }).unwrap();
        assert_eq!(features.len(), pc.len());

        // Interior point: own SPFH (100 per block) plus normalized neighbour sum (100 per block)
        let f = &features[7 * 15 + 7];
        for block in 0..3 {
            let s: f64 = f.histogram[block * 11..(block + 1) * 11].iter().sum();
            assert!((s - 200.0).abs() < 1e-6, "block {} sums to {}", block, s);
        }
    }

    #[test]
    fn test_fpfh_invariant_under_rigid_motion() {
        let pc = curved_patch();
        let t = RigidTransform::from_axis_angle(
            &Vector3::new(0.3, -1.0, 0.5),
            0.8,
            Vector3::new(2.0, -1.0, 0.5),
        );
        let moved = pc.transformed(&t);
        let params = FeatureParams { radius: 0.13, max_neighbors: 50 };

        let a = compute_fpfh_features(&pc, &params).unwrap();
        let b = compute_fpfh_features(&moved, &params).unwrap();
        for (fa, fb) in a.iter().zip(&b) {
            assert!(feature_distance(fa, fb) < 1e-6);
        }
    }

    #[test]
    fn test_fpfh_requires_normals() {
        let pc = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0)]);
        assert!(matches!(
            compute_fpfh_features(&pc, &FeatureParams::default()),
            Err(Error::MissingNormals { .. })
        ));

        let bad = PointCloud::new(vec![Point3::origin(), Point3::new(0.1, 0.0, 0.0)])
            .with_normals(vec![Vector3::z(), Vector3::new(f64::NAN, 0.0, 0.0)])
            .unwrap();
        assert!(matches!(
            compute_fpfh_features(&bad, &FeatureParams::default()),
            Err(Error::MissingNormals { index: 1 })
        ));
    }

    #[test]
    fn test_fpfh_on_estimated_normals() {
        let mut pc = curved_patch();
        pc.normals = None;
        estimate_normals(&mut pc, &NormalEstimationParams::new(0.12, 30));
        let features = compute_fpfh_features(&pc, &FeatureParams { radius: 0.2, max_neighbors: 60 }).unwrap();
        assert!(features.iter().all(|f| f.histogram.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_pair_features_symmetric() {
        let p1 = Point3::new(0.0, 0.0, 0.0);
        let p2 = Point3::new(0.1, 0.05, 0.02);
        let n1 = Vector3::new(0.1, 0.0, 1.0).normalize();
        let n2 = Vector3::new(-0.2, 0.3, 1.0).normalize();
        let a = compute_pair_features(&p1, &n1, &p2, &n2);
        let b = compute_pair_features(&p2, &n2, &p1, &n1);
        for k in 0..4 {
            assert!((a[k] - b[k]).abs() < 1e-12);
        }
    }
}
