//! Global Registration
//!
//! RANSAC-based global registration that doesn't require initial alignment.
//! Correspondences come from FPFH descriptor matching; hypotheses are drawn from an injected
//! random number generator so a seeded run is reproducible, and scored in parallel.

use super::{estimate_rigid_transform, evaluate_with_index, Correspondence, RegistrationResult};
use cv_core::point_cloud::PointCloud;
use cv_core::{Error, Result, RigidTransform};
use cv_point_cloud::{feature_distance_squared, FPFHFeature, SpatialIndex};
use nalgebra::Point3;
use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Hypotheses drawn before each parallel scoring pass.
const TRIAL_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacOptions {
    /// Inlier distance for scoring and for the per-sample distance check.
    pub max_correspondence_distance: f64,
    /// Correspondences per hypothesis (at least 3).
    pub ransac_n: usize,
    /// Keep a descriptor match only when it is nearest in both directions.
    pub mutual_filter: bool,
    /// Minimum ratio between matching source and target sample edge lengths; 0 disables the check.
    pub edge_length_ratio: f64,
    pub max_iterations: usize,
    /// Probability of having drawn an all-inlier sample at termination.
    pub confidence: f64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 0.075,
            ransac_n: 3,
            mutual_filter: true,
            edge_length_ratio: 0.9,
            max_iterations: 100_000,
            confidence: 0.999,
        }
    }
}

/// Match every source descriptor to its nearest target descriptor.
///
/// With `mutual_filter` a pair survives only if the source point is also the nearest match
/// of its target point. Output is in source order.
pub fn match_features(
    source_features: &[FPFHFeature],
    target_features: &[FPFHFeature],
    mutual_filter: bool,
) -> Vec<Correspondence> {
    if source_features.is_empty() || target_features.is_empty() {
        return Vec::new();
    }

    let forward: Vec<(usize, f64)> = source_features
        .par_iter()
        .map(|f| nearest_feature(f, target_features))
        .collect();

    let backward: Option<Vec<usize>> = mutual_filter.then(|| {
        target_features
            .par_iter()
            .map(|f| nearest_feature(f, source_features).0)
            .collect()
    });

    forward
        .into_iter()
        .enumerate()
        .filter(|&(i, (j, _))| backward.as_ref().map_or(true, |b| b[j] == i))
        .map(|(i, (j, d2))| Correspondence {
            source: i,
            target: j,
            distance: Some(d2.sqrt()),
        })
        .collect()
}

fn nearest_feature(query: &FPFHFeature, candidates: &[FPFHFeature]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, c) in candidates.iter().enumerate() {
        let d2 = feature_distance_squared(query, c);
        if d2 < best.1 {
            best = (j, d2);
        }
    }
    best
}

#[derive(Debug, Clone)]
struct Candidate {
    trial: usize,
    transformation: RigidTransform,
    fitness: f64,
    inlier_rmse: f64,
}

impl Candidate {
    /// Higher fitness, then lower RMSE, then earlier trial.
    fn ranks_above(&self, other: &Candidate) -> bool {
        match self.fitness.total_cmp(&other.fitness) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.inlier_rmse.total_cmp(&other.inlier_rmse) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => self.trial < other.trial,
            },
        }
    }

    fn better(a: Candidate, b: Candidate) -> Candidate {
        if b.ranks_above(&a) {
            b
        } else {
            a
        }
    }
}

/// Global registration using RANSAC
///
/// # Arguments
///
/// * `source`, `target` - Point clouds the descriptors were computed on
/// * `source_features`, `target_features` - Index-aligned FPFH descriptors
/// * `options` - Sampling, checking and termination parameters
/// * `rng` - Source of all randomness; a seeded generator makes the result reproducible
///
/// # Returns
///
/// The best hypothesis by fitness over all source points. With fewer matched
/// correspondences than `ransac_n`, or when no hypothesis passes the checks, an identity
/// transform with zero fitness is returned.
pub fn registration_ransac_based_on_feature_matching<R: Rng + ?Sized>(
    source: &PointCloud,
    target: &PointCloud,
    source_features: &[FPFHFeature],
    target_features: &[FPFHFeature],
    options: &RansacOptions,
    rng: &mut R,
) -> Result<RegistrationResult> {
    validate_options(options)?;
    if source_features.len() != source.len() || target_features.len() != target.len() {
        return Err(Error::InvalidInput(format!(
            "descriptor counts ({}, {}) do not match point counts ({}, {})",
            source_features.len(),
            target_features.len(),
            source.len(),
            target.len()
        )));
    }

    let correspondences = match_features(source_features, target_features, options.mutual_filter);
    if correspondences.len() < options.ransac_n {
        tracing::warn!(
            correspondences = correspondences.len(),
            ransac_n = options.ransac_n,
            "Too few descriptor correspondences for RANSAC"
        );
        return Ok(RegistrationResult::unsupported(RigidTransform::identity()));
    }

    let target_index = SpatialIndex::from_cloud(target);
    let log_failure = (1.0 - options.confidence).ln();

    let mut best: Option<Candidate> = None;
    let mut trials = 0usize;
    let mut required = options.max_iterations as f64;

    while trials < options.max_iterations && (trials as f64) < required {
        let batch_len = TRIAL_BATCH_SIZE.min(options.max_iterations - trials);

        // Sampling stays sequential so the draw order only depends on the generator.
        let samples: Vec<Vec<usize>> = (0..batch_len)
            .map(|_| sample(&mut *rng, correspondences.len(), options.ransac_n).into_vec())
            .collect();

        let batch_best = samples
            .par_iter()
            .enumerate()
            .filter_map(|(k, s)| {
                evaluate_trial(
                    source,
                    target,
                    &target_index,
                    &correspondences,
                    s,
                    options,
                    trials + k,
                )
            })
            .reduce_with(Candidate::better);

        trials += batch_len;
        best = match (best, batch_best) {
            (Some(a), Some(b)) => Some(Candidate::better(a, b)),
            (a, b) => a.or(b),
        };

        if let Some(b) = &best {
            if b.fitness > 0.0 {
                required = log_failure / (1.0 - b.fitness.powi(options.ransac_n as i32)).ln();
            }
        }
    }

    let converged = (trials as f64) >= required;

    let Some(best) = best else {
        tracing::warn!(trials, "No RANSAC hypothesis passed the correspondence checks");
        let mut result = RegistrationResult::unsupported(RigidTransform::identity());
        result.num_iterations = trials;
        return Ok(result);
    };

    let best = refine(source, target, &target_index, best, options.max_correspondence_distance);

    tracing::debug!(
        trials,
        correspondences = correspondences.len(),
        fitness = best.fitness,
        inlier_rmse = best.inlier_rmse,
        converged,
        "RANSAC finished"
    );

    Ok(RegistrationResult {
        transformation: best.transformation,
        fitness: best.fitness,
        inlier_rmse: best.inlier_rmse,
        num_iterations: trials,
        converged,
    })
}

fn validate_options(options: &RansacOptions) -> Result<()> {
    if options.ransac_n < 3 {
        return Err(Error::InvalidInput(format!(
            "ransac_n must be at least 3, got {}",
            options.ransac_n
        )));
    }
    if options.max_correspondence_distance.is_nan() || options.max_correspondence_distance <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "max_correspondence_distance must be positive, got {}",
            options.max_correspondence_distance
        )));
    }
    if !(options.confidence > 0.0 && options.confidence <= 1.0) {
        return Err(Error::InvalidInput(format!(
            "confidence must lie in (0, 1], got {}",
            options.confidence
        )));
    }
    Ok(())
}

/// Check, fit and score one sampled hypothesis. `None` when a check rejects it.
fn evaluate_trial(
    source: &PointCloud,
    target: &PointCloud,
    target_index: &SpatialIndex,
    correspondences: &[Correspondence],
    sample: &[usize],
    options: &RansacOptions,
    trial: usize,
) -> Option<Candidate> {
    let src: Vec<Point3<f64>> = sample
        .iter()
        .map(|&k| source.points[correspondences[k].source])
        .collect();
    let tgt: Vec<Point3<f64>> = sample
        .iter()
        .map(|&k| target.points[correspondences[k].target])
        .collect();

    if options.edge_length_ratio > 0.0 && !edge_lengths_agree(&src, &tgt, options.edge_length_ratio) {
        return None;
    }

    let transformation = estimate_rigid_transform(&src, &tgt)?;

    let max_d2 = options.max_correspondence_distance * options.max_correspondence_distance;
    let sample_fits = src
        .iter()
        .zip(&tgt)
        .all(|(s, t)| (transformation.transform_point(s) - t).norm_squared() <= max_d2);
    if !sample_fits {
        return None;
    }

    let evaluation = evaluate_with_index(
        source,
        target_index,
        &transformation,
        options.max_correspondence_distance,
    );
    Some(Candidate {
        trial,
        transformation,
        fitness: evaluation.fitness,
        inlier_rmse: evaluation.inlier_rmse,
    })
}

/// Every pair of sample edges must satisfy `ratio * t ≤ s` and `ratio * s ≤ t`.
fn edge_lengths_agree(src: &[Point3<f64>], tgt: &[Point3<f64>], ratio: f64) -> bool {
    for i in 0..src.len() {
        for j in (i + 1)..src.len() {
            let ds = (src[i] - src[j]).norm();
            let dt = (tgt[i] - tgt[j]).norm();
            if ds < ratio * dt || dt < ratio * ds {
                return false;
            }
        }
    }
    true
}

/// Re-fit on every inlier pair of the winning hypothesis; kept unless fitness drops.
fn refine(
    source: &PointCloud,
    target: &PointCloud,
    target_index: &SpatialIndex,
    best: Candidate,
    max_distance: f64,
) -> Candidate {
    let inliers = evaluate_with_index(source, target_index, &best.transformation, max_distance);
    let src: Vec<Point3<f64>> = inliers
        .correspondences
        .iter()
        .map(|c| source.points[c.source])
        .collect();
    let tgt: Vec<Point3<f64>> = inliers
        .correspondences
        .iter()
        .map(|c| target.points[c.target])
        .collect();

    let Some(transformation) = estimate_rigid_transform(&src, &tgt) else {
        return best;
    };
    let refined = evaluate_with_index(source, target_index, &transformation, max_distance);
    if refined.fitness >= best.fitness {
        Candidate {
            trial: best.trial,
            transformation,
            fitness: refined.fitness,
            inlier_rmse: refined.inlier_rmse,
        }
    } else {
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_cloud(n: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        PointCloud::new(
            (0..n)
                .map(|_| {
                    Point3::new(
                        rng.gen_range(-1.0..1.0),
                        rng.gen_range(-0.5..0.5),
                        rng.gen_range(0.0..0.8),
                    )
                })
                .collect(),
        )
    }

    /// Distinct descriptors, identical for point `i` of both clouds.
    fn labelled_features(n: usize, seed: u64) -> Vec<FPFHFeature> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut f = FPFHFeature::default();
                for v in f.histogram.iter_mut() {
                    *v = rng.gen_range(0.0..10.0);
                }
                f
            })
            .collect()
    }

    fn ground_truth() -> RigidTransform {
        RigidTransform::from_axis_angle(
            &Vector3::new(0.2, 0.1, 1.0),
            1.1,
            Vector3::new(1.0, 2.0, 0.5),
        )
    }

    #[test]
    fn test_match_features_mutual_filter() {
        let a = labelled_features(20, 1);
        let mut b = a.clone();
        // Two source descriptors now share a target; only the exact one is mutual.
        b[5] = a[4];
        let all = match_features(&a, &b, false);
        assert_eq!(all.len(), 20);
        let mutual = match_features(&a, &b, true);
        assert!(mutual.len() < 20);
        assert!(mutual.iter().all(|c| c.source == c.target));
    }

    #[test]
    fn test_ransac_recovers_transform_from_exact_matches() {
        let source = random_cloud(200, 3);
        let gt = ground_truth();
        let target = source.transformed(&gt);
        let features = labelled_features(200, 4);

        let mut rng = StdRng::seed_from_u64(42);
        let result = registration_ransac_based_on_feature_matching(
            &source,
            &target,
            &features,
            &features,
            &RansacOptions::default(),
            &mut rng,
        )
        .unwrap();

        assert!((result.fitness - 1.0).abs() < 1e-12);
        assert!(result.converged);
        assert!((result.transformation.matrix() - gt.matrix()).norm() < 1e-6);
    }

    #[test]
    fn test_ransac_tolerates_wrong_matches_and_is_reproducible() {
        let source = random_cloud(200, 5);
        let gt = ground_truth();
        let target = source.transformed(&gt);
        let source_features = labelled_features(200, 6);
        let mut target_features = source_features.clone();
        // Scramble 60% of the target descriptors
        target_features[..120].rotate_left(17);

        let options = RansacOptions {
            max_iterations: 20_000,
            ..Default::default()
        };
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            registration_ransac_based_on_feature_matching(
                &source,
                &target,
                &source_features,
                &target_features,
                &options,
                &mut rng,
            )
            .unwrap()
        };

        let first = run(9);
        let second = run(9);
        assert_eq!(first, second);
        assert!(first.fitness > 0.99);
        assert!((first.transformation.matrix() - gt.matrix()).norm() < 1e-6);
    }

    #[test]
    fn test_ransac_too_few_correspondences() {
        let source = random_cloud(2, 1);
        let target = random_cloud(2, 2);
        let features = labelled_features(2, 3);
        let mut rng = StdRng::seed_from_u64(0);
        let result = registration_ransac_based_on_feature_matching(
            &source,
            &target,
            &features,
            &features,
            &RansacOptions::default(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(result.fitness, 0.0);
        assert_eq!(result.transformation, RigidTransform::identity());
    }

    #[test]
    fn test_ransac_rejects_bad_options() {
        let cloud = random_cloud(10, 1);
        let features = labelled_features(10, 1);
        let mut rng = StdRng::seed_from_u64(0);
        let options = RansacOptions {
            ransac_n: 2,
            ..Default::default()
        };
        assert!(registration_ransac_based_on_feature_matching(
            &cloud, &cloud, &features, &features, &options, &mut rng
        )
        .is_err());
        assert!(registration_ransac_based_on_feature_matching(
            &cloud,
            &cloud,
            &features[..5],
            &features,
            &RansacOptions::default(),
            &mut rng
        )
        .is_err());
    }

    #[test]
    fn test_edge_length_check() {
        let src = [Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        let same = src;
        let stretched = [Point3::origin(), Point3::new(2.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        assert!(edge_lengths_agree(&src, &same, 0.9));
        assert!(!edge_lengths_agree(&src, &stretched, 0.9));
    }
}
