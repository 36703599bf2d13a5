//! 3D Registration Module
//!
//! Implements the two alignment stages used for frame-to-frame registration:
//! - Point-to-plane ICP with a robust loss (fine alignment)
//! - Feature-matching RANSAC (coarse, global alignment) in [`global`]

pub mod global;

pub use cv_core::{Error, Result, RigidTransform, RobustLoss};
pub use global::{
    match_features, registration_ransac_based_on_feature_matching, RansacOptions,
};

use cv_core::point_cloud::PointCloud;
use cv_point_cloud::SpatialIndex;
use nalgebra::{Matrix3, Matrix6, Point3, Vector3, Vector6};
use rayon::prelude::*;

/// Minimum number of correspondences for a well-posed 6-DOF update.
const MIN_ICP_CORRESPONDENCES: usize = 6;

/// A matched pair of point indices.
///
/// `distance` is the descriptor or Euclidean distance that produced the match, when known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source: usize,
    pub target: usize,
    pub distance: Option<f64>,
}

/// Outcome of a registration.
///
/// # Fields
///
/// * `transformation` - Rigid transform mapping source coordinates into target coordinates
/// * `fitness` - Fraction of source points with a target point within the correspondence distance (0-1)
/// * `inlier_rmse` - Root mean square Euclidean distance over those inliers
/// * `num_iterations` - ICP iterations or RANSAC trials performed
/// * `converged` - ICP: convergence criteria met. RANSAC: confidence-based termination reached
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    pub transformation: RigidTransform,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub num_iterations: usize,
    pub converged: bool,
}

impl RegistrationResult {
    /// Result that carries a transform but no support.
    pub fn unsupported(transformation: RigidTransform) -> Self {
        Self {
            transformation,
            fitness: 0.0,
            inlier_rmse: 0.0,
            num_iterations: 0,
            converged: false,
        }
    }
}

/// Stopping rule for ICP, compared against the change between consecutive iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ICPConvergenceCriteria {
    pub relative_fitness: f64,
    pub relative_rmse: f64,
    pub max_iteration: usize,
}

impl Default for ICPConvergenceCriteria {
    fn default() -> Self {
        Self {
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
            max_iteration: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpOptions {
    pub max_correspondence_distance: f64,
    pub loss: RobustLoss,
    pub criteria: ICPConvergenceCriteria,
}

impl Default for IcpOptions {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 0.1,
            loss: RobustLoss::Huber { k: 0.1 },
            criteria: ICPConvergenceCriteria::default(),
        }
    }
}

/// Point-to-plane ICP registration
///
/// Registers a source point cloud to a target point cloud with a robust point-to-plane
/// Iterative Closest Point solver.
///
/// # Algorithm
///
/// Iteratively:
/// 1. Find the nearest target point within `max_correspondence_distance` of every transformed
///    source point
/// 2. Compute point-to-plane residuals `r = (T·p − q)·n_q` and robust weights
/// 3. Solve the weighted Gauss-Newton normal equations for a twist `δ = [v; ω]`
///    (Cholesky, with an SVD least-squares fallback on degenerate geometry)
/// 4. Update `T ← exp(δ)·T`
/// 5. Stop when fitness and RMSE both change less than the criteria, or after
///    `max_iteration` iterations
///
/// # Arguments
///
/// * `source` - Source point cloud (normals not needed)
/// * `target` - Target point cloud, must carry normals
/// * `init_transformation` - Initial guess mapping source into target
/// * `options` - Correspondence distance, robust loss and convergence criteria
///
/// # Returns
///
/// * `Ok(RegistrationResult)` - Final transform and metrics. With fewer than six correspondences
///   the loop stops early and the result is marked unconverged
/// * `Err(Error::MissingNormals)` - Target has no usable normals
/// * `Err(Error::InvalidInput)` - Non-positive correspondence distance
pub fn registration_icp_point_to_plane(
    source: &PointCloud,
    target: &PointCloud,
    init_transformation: &RigidTransform,
    options: &IcpOptions,
) -> Result<RegistrationResult> {
    let target_normals = validated_normals(target)?;
    let max_distance = options.max_correspondence_distance;
    if max_distance.is_nan() || max_distance <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "max_correspondence_distance must be positive, got {max_distance}"
        )));
    }

    if source.is_empty() || target.is_empty() {
        tracing::warn!(
            source = source.len(),
            target = target.len(),
            "ICP called with an empty cloud"
        );
        return Ok(RegistrationResult::unsupported(*init_transformation));
    }

    let target_index = SpatialIndex::from_cloud(target);

    let mut transformation = *init_transformation;
    let mut evaluation = evaluate_with_index(source, &target_index, &transformation, max_distance);
    let mut num_iterations = 0;
    let mut converged = false;

    for iter in 0..options.criteria.max_iteration {
        if evaluation.correspondences.len() < MIN_ICP_CORRESPONDENCES {
            tracing::debug!(
                iteration = iter,
                correspondences = evaluation.correspondences.len(),
                "ICP stopped: too few correspondences"
            );
            break;
        }

        let (ata, atb) = build_normal_equations(
            source,
            target,
            target_normals,
            &evaluation.correspondences,
            &transformation,
            &options.loss,
        );

        let delta = match solve_normal_equations(&ata, &atb) {
            Some(delta) => delta,
            None => {
                tracing::warn!(iteration = iter, "ICP normal equations are singular");
                break;
            }
        };

        transformation = RigidTransform::exp(&delta) * transformation;
        num_iterations = iter + 1;

        let previous = evaluation;
        evaluation = evaluate_with_index(source, &target_index, &transformation, max_distance);

        tracing::debug!(
            iteration = iter,
            fitness = evaluation.fitness,
            inlier_rmse = evaluation.inlier_rmse,
            "ICP iteration"
        );

        if (previous.fitness - evaluation.fitness).abs() < options.criteria.relative_fitness
            && (previous.inlier_rmse - evaluation.inlier_rmse).abs()
                < options.criteria.relative_rmse
        {
            converged = true;
            break;
        }
    }

    Ok(RegistrationResult {
        transformation,
        fitness: evaluation.fitness,
        inlier_rmse: evaluation.inlier_rmse,
        num_iterations,
        converged,
    })
}

/// Evaluate registration
///
/// Fitness and inlier RMSE of `transformation` applied to `source`, using nearest target
/// points within `max_correspondence_distance`.
pub fn evaluate_registration(
    source: &PointCloud,
    target: &PointCloud,
    transformation: &RigidTransform,
    max_correspondence_distance: f64,
) -> RegistrationResult {
    let target_index = SpatialIndex::from_cloud(target);
    let evaluation = evaluate_with_index(
        source,
        &target_index,
        transformation,
        max_correspondence_distance,
    );
    RegistrationResult {
        transformation: *transformation,
        fitness: evaluation.fitness,
        inlier_rmse: evaluation.inlier_rmse,
        num_iterations: 0,
        converged: false,
    }
}

/// Closed-form least-squares rigid transform taking `source[i]` onto `target[i]` (Kabsch).
///
/// Returns `None` for fewer than three pairs or mismatched slices.
pub fn estimate_rigid_transform(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
) -> Option<RigidTransform> {
    if source.len() < 3 || source.len() != target.len() {
        return None;
    }

    let n = source.len() as f64;
    let source_centroid: Vector3<f64> = source.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;
    let target_centroid: Vector3<f64> = target.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;

    let mut covariance = Matrix3::zeros();
    for (s, t) in source.iter().zip(target) {
        covariance += (t.coords - target_centroid) * (s.coords - source_centroid).transpose();
    }

    let rotation = cv_core::nearest_rotation(&covariance);
    let translation = target_centroid - rotation * source_centroid;
    Some(RigidTransform::from_parts(&rotation, &translation))
}

pub(crate) struct Evaluation {
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub correspondences: Vec<Correspondence>,
}

/// Nearest-neighbour correspondences of the transformed source, in source order.
pub(crate) fn evaluate_with_index(
    source: &PointCloud,
    target_index: &SpatialIndex,
    transformation: &RigidTransform,
    max_distance: f64,
) -> Evaluation {
    let correspondences: Vec<Correspondence> = source
        .points
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let moved = transformation.transform_point(p);
            target_index
                .nearest_within(&moved, max_distance)
                .map(|nb| Correspondence {
                    source: i,
                    target: nb.index,
                    distance: Some(nb.distance()),
                })
        })
        .collect();

    let fitness = if source.is_empty() {
        0.0
    } else {
        correspondences.len() as f64 / source.len() as f64
    };
    let inlier_rmse = if correspondences.is_empty() {
        0.0
    } else {
        let sum_sq: f64 = correspondences
            .iter()
            .map(|c| c.distance.map_or(0.0, |d| d * d))
            .sum();
        (sum_sq / correspondences.len() as f64).sqrt()
    };

    Evaluation {
        fitness,
        inlier_rmse,
        correspondences,
    }
}

fn validated_normals(target: &PointCloud) -> Result<&[Vector3<f64>]> {
    let normals = target
        .normals
        .as_deref()
        .ok_or(Error::MissingNormals { index: 0 })?;
    if let Some(index) = normals
        .iter()
        .position(|n| !n.iter().all(|c| c.is_finite()) || n.norm_squared() < 1e-24)
    {
        return Err(Error::MissingNormals { index });
    }
    Ok(normals)
}

/// Weighted `JᵀJ` and `Jᵀr` for the left-perturbed point-to-plane residuals.
fn build_normal_equations(
    source: &PointCloud,
    target: &PointCloud,
    target_normals: &[Vector3<f64>],
    correspondences: &[Correspondence],
    transformation: &RigidTransform,
    loss: &RobustLoss,
) -> (Matrix6<f64>, Vector6<f64>) {
    let mut ata = Matrix6::zeros();
    let mut atb = Vector6::zeros();

    for c in correspondences {
        let moved = transformation.transform_point(&source.points[c.source]);
        let q = target.points[c.target];
        let n = target_normals[c.target];

        let residual = (moved - q).dot(&n);
        let weight = loss.weight(residual);
        let cross = moved.coords.cross(&n);
        let jacobian = Vector6::new(n.x, n.y, n.z, cross.x, cross.y, cross.z);

        ata += weight * jacobian * jacobian.transpose();
        atb += weight * residual * jacobian;
    }

    (ata, atb)
}

/// Solve `A δ = −b`, falling back to SVD least squares when `A` is not positive definite.
fn solve_normal_equations(ata: &Matrix6<f64>, atb: &Vector6<f64>) -> Option<Vector6<f64>> {
    let rhs = -atb;
    if let Some(cholesky) = ata.cholesky() {
        let delta = cholesky.solve(&rhs);
        if delta.iter().all(|v| v.is_finite()) {
            return Some(delta);
        }
    }

    tracing::debug!("ICP normal equations are degenerate, using SVD least squares");
    let svd = ata.svd(true, true);
    let delta = svd.solve(&rhs, 1e-12).ok()?;
    delta.iter().all(|v| v.is_finite()).then_some(delta)
}
