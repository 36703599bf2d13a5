//! Point cloud filtering: statistical outlier removal and voxel-grid downsampling

use crate::spatial::SpatialIndex;
use cv_core::PointCloud;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Downsample a point cloud with an origin-anchored voxel grid.
///
/// Every non-empty voxel `floor(p / voxel_size)` becomes one point at the centroid of its
/// members. Normals are averaged and renormalized (falling back to the first member's normal,
/// then +Z, when they cancel), colors averaged. The output is ordered by
/// voxel key, so it does not depend on input order.
pub fn voxel_down_sample(pc: &PointCloud, voxel_size: f64) -> PointCloud {
    if voxel_size <= 0.0 || pc.is_empty() {
        return pc.clone();
    }

    let n = pc.len();
    let inv = 1.0 / voxel_size;

    // 1. Voxel keys
    let mut keyed: Vec<([i64; 3], usize)> = pc
        .points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.coords.iter().all(|c| c.is_finite()))
        .map(|(i, p)| {
            let key = [
                (p.x * inv).floor() as i64,
                (p.y * inv).floor() as i64,
                (p.z * inv).floor() as i64,
            ];
            (key, i)
        })
        .collect();

    // 2. Sort by key, then by index so every voxel sums in input order
    if n > 10_000 {
        keyed.par_sort_unstable();
    } else {
        keyed.sort_unstable();
    }

    // 3. Aggregate runs of equal keys
    let mut out = VoxelAccumulator::new(pc);
    let mut start = 0;
    while start < keyed.len() {
        let key = keyed[start].0;
        let mut end = start;
        while end < keyed.len() && keyed[end].0 == key {
            end += 1;
        }
        out.push_voxel(pc, keyed[start..end].iter().map(|&(_, i)| i));
        start = end;
    }

    out.finish()
}

struct VoxelAccumulator {
    points: Vec<Point3<f64>>,
    colors: Option<Vec<Point3<f64>>>,
    normals: Option<Vec<Vector3<f64>>>,
}

impl VoxelAccumulator {
    fn new(pc: &PointCloud) -> Self {
        Self {
            points: Vec::new(),
            colors: pc.colors.as_ref().map(|_| Vec::new()),
            normals: pc.normals.as_ref().map(|_| Vec::new()),
        }
    }

    fn push_voxel(&mut self, pc: &PointCloud, members: impl Iterator<Item = usize>) {
        let mut sum_p = Vector3::zeros();
        let mut sum_c = Vector3::zeros();
        let mut sum_n = Vector3::zeros();
        let mut first_n = None;
        let mut count = 0usize;

        for idx in members {
            sum_p += pc.points[idx].coords;
            if let Some(colors) = &pc.colors {
                sum_c += colors[idx].coords;
            }
            if let Some(normals) = &pc.normals {
                sum_n += normals[idx];
                first_n.get_or_insert(normals[idx]);
            }
            count += 1;
        }

        let factor = 1.0 / count as f64;
        self.points.push(Point3::from(sum_p * factor));
        if let Some(nc) = &mut self.colors {
            nc.push(Point3::from(sum_c * factor));
        }
        if let Some(nn) = &mut self.normals {
            // Opposing normals cancel; keep the first member's, else +Z
            let n = (sum_n * factor)
                .try_normalize(1e-6)
                .or_else(|| first_n.and_then(|n| n.try_normalize(1e-6)))
                .unwrap_or_else(Vector3::z);
            nn.push(n);
        }
    }

    fn finish(self) -> PointCloud {
        PointCloud {
            points: self.points,
            colors: self.colors,
            normals: self.normals,
        }
    }
}

/// Remove statistical outliers.
///
/// For every point the mean distance to its `k` nearest neighbours (itself excluded) is
/// computed. Points whose mean exceeds `global_mean + std_ratio * std_dev` are dropped.
/// Returns the filtered cloud and the retained input indices, in input order.
///
/// With `k == 0` or fewer than `k + 1` points the statistic is undefined and the cloud is
/// returned unchanged.
pub fn remove_statistical_outliers(
    pc: &PointCloud,
    k: usize,
    std_ratio: f64,
) -> (PointCloud, Vec<usize>) {
    if k == 0 || pc.len() < k + 1 {
        if !pc.is_empty() {
            tracing::warn!(
                points = pc.len(),
                k,
                "Too few points for statistical outlier removal, keeping cloud unchanged"
            );
        }
        return (pc.clone(), (0..pc.len()).collect());
    }

    let tree = SpatialIndex::from_cloud(pc);

    let distances: Vec<f64> = pc
        .points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            // k+1 hits, one of which is the point itself
            let neighbors = tree.knn(p, k + 1);
            let mut sum_dist = 0.0;
            let mut count = 0;
            let mut skipped_self = false;
            for nb in &neighbors {
                if !skipped_self && nb.index == i {
                    skipped_self = true;
                    continue;
                }
                if count == k {
                    break;
                }
                sum_dist += nb.distance();
                count += 1;
            }

            if count > 0 {
                sum_dist / count as f64
            } else {
                f64::INFINITY
            }
        })
        .collect();

    let finite: Vec<f64> = distances.iter().copied().filter(|d| d.is_finite()).collect();
    let mean_dist = finite.iter().sum::<f64>() / finite.len().max(1) as f64;
    let variance = finite
        .iter()
        .map(|d| {
            let diff = d - mean_dist;
            diff * diff
        })
        .sum::<f64>()
        / finite.len().max(1) as f64;
    let std_dev = variance.sqrt();

    let threshold = mean_dist + std_ratio * std_dev;

    let inliers: Vec<usize> = distances
        .iter()
        .enumerate()
        .filter(|(_, &dist)| dist <= threshold)
        .map(|(i, _)| i)
        .collect();

    tracing::debug!(
        input = pc.len(),
        kept = inliers.len(),
        mean_dist,
        std_dev,
        "Statistical outlier removal"
    );

    (pc.select_by_index(&inliers), inliers)
}
