//! Surface normal estimation by local PCA

use crate::spatial::SpatialIndex;
use cv_core::PointCloud;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Neighbourhood used for normal estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEstimationParams {
    /// Search radius of the hybrid neighbourhood.
    pub radius: f64,
    /// Cap on the number of neighbours (the query point counts).
    pub max_neighbors: usize,
    /// When set, every normal is flipped to face this point.
    pub viewpoint: Option<Point3<f64>>,
}

impl NormalEstimationParams {
    pub fn new(radius: f64, max_neighbors: usize) -> Self {
        Self {
            radius,
            max_neighbors,
            viewpoint: None,
        }
    }

    pub fn with_viewpoint(mut self, viewpoint: Point3<f64>) -> Self {
        self.viewpoint = Some(viewpoint);
        self
    }
}

impl Default for NormalEstimationParams {
    fn default() -> Self {
        Self::new(0.1, 30)
    }
}

/// Estimate a unit normal for every point and store them on the cloud.
///
/// Each normal is the eigenvector of the smallest eigenvalue of the neighbourhood covariance.
/// Points with fewer than three neighbours get +Z. Without a viewpoint the sign is arbitrary.
pub fn estimate_normals(pc: &mut PointCloud, params: &NormalEstimationParams) {
    if pc.is_empty() {
        pc.normals = Some(Vec::new());
        return;
    }

    let tree = SpatialIndex::from_cloud(pc);
    let fallback_count = AtomicUsize::new(0);

    let normals: Vec<Vector3<f64>> = pc
        .points
        .par_iter()
        .map(|p| {
            let neighbors = tree.hybrid(p, params.radius, params.max_neighbors);

            if neighbors.len() < 3 {
                fallback_count.fetch_add(1, Ordering::Relaxed);
                return Vector3::z();
            }

            let mut centroid = Vector3::zeros();
            for n in &neighbors {
                centroid += pc.points[n.index].coords;
            }
            centroid /= neighbors.len() as f64;

            let mut cov = Matrix3::zeros();
            for n in &neighbors {
                let d = pc.points[n.index].coords - centroid;
                cov += d * d.transpose();
            }
            cov /= neighbors.len() as f64;

            let eigen = SymmetricEigen::new(cov);
            let min_idx = eigen.eigenvalues.imin();
            let mut normal = eigen.eigenvectors.column(min_idx).into_owned();
            if normal.norm_squared() < 1e-24 || !normal.iter().all(|c| c.is_finite()) {
                fallback_count.fetch_add(1, Ordering::Relaxed);
                return Vector3::z();
            }
            normal.normalize_mut();

            if let Some(view) = params.viewpoint {
                if normal.dot(&(view - p)) < 0.0 {
                    normal = -normal;
                }
            }
            normal
        })
        .collect();

    let fallbacks = fallback_count.into_inner();
    if fallbacks > 0 {
        tracing::warn!(
            fallbacks,
            points = pc.len(),
            radius = params.radius,
            "Degenerate neighbourhoods during normal estimation, assigned default +Z normals"
        );
    }

    pc.normals = Some(normals);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_normals() {
        // Plane at z=0
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                points.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let mut pc = PointCloud::new(points);
        estimate_normals(&mut pc, &NormalEstimationParams::new(1.5, 9));

        let normals = pc.normals.as_ref().unwrap();
        assert_eq!(normals.len(), 25);
        for n in normals.iter() {
            assert!(n.z.abs() > 0.9, "Normal {:?} is not vertical", n);
            assert!((n.norm() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_viewpoint_orients_normals() {
        let mut points = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                points.push(Point3::new(i as f64 * 0.1, 0.5, j as f64 * 0.1));
            }
        }
        let mut pc = PointCloud::new(points);
        let params = NormalEstimationParams::new(0.25, 20).with_viewpoint(Point3::new(0.25, -3.0, 0.25));
        estimate_normals(&mut pc, &params);
        for n in pc.normals.as_ref().unwrap() {
            assert!(n.y < -0.99, "Normal {:?} does not face the viewpoint", n);
        }
    }

    #[test]
    fn test_sparse_points_get_default_normal() {
        let mut pc = PointCloud::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(0.0, 5.0, 0.0),
        ]);
        estimate_normals(&mut pc, &NormalEstimationParams::new(1.0, 10));
        for n in pc.normals.as_ref().unwrap() {
            assert_eq!(*n, Vector3::z());
        }
    }
}
