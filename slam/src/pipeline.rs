//! Per-frame pipeline stages.
//!
//! Each stage is a plain function from the previous stage's output to a typed result, so the
//! session only sequences them and owns the state they feed.

use std::fmt;

use rand::Rng;

use cv_core::point_cloud::PointCloud;
use cv_core::{RegistrationStage, Result, RigidTransform};
use cv_point_cloud::{
    compute_fpfh_features, estimate_normals, remove_statistical_outliers, voxel_down_sample,
    FPFHFeature,
};
use cv_registration::{
    registration_icp_point_to_plane, registration_ransac_based_on_feature_matching, IcpOptions,
    RansacOptions, RegistrationResult,
};

use crate::config::{FailureSection, FeatureSection, PreprocessSection, SessionConfig};

/// Named steps a frame goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Load,
    Clean,
    Downsample,
    Describe,
    CoarseAlign,
    FineAlign,
    PoseCompose,
    Fuse,
    Maintain,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::Load => "load",
            FrameStage::Clean => "clean",
            FrameStage::Downsample => "downsample",
            FrameStage::Describe => "describe",
            FrameStage::CoarseAlign => "coarse_align",
            FrameStage::FineAlign => "fine_align",
            FrameStage::PoseCompose => "pose_compose",
            FrameStage::Fuse => "fuse",
            FrameStage::Maintain => "maintain",
        };
        f.write_str(name)
    }
}

/// Full-resolution frame after outlier removal. This is what gets fused into the map.
#[derive(Debug, Clone)]
pub struct CleanedFrame {
    pub index: usize,
    pub cloud: PointCloud,
    pub removed_outliers: usize,
}

/// Coarse-resolution cloud with one descriptor per point.
#[derive(Debug, Clone)]
pub struct DescribedCloud {
    pub cloud: PointCloud,
    pub features: Vec<FPFHFeature>,
}

/// Registration inputs for one frame.
///
/// The previous frame's copy is kept as the next frame's target.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub index: usize,
    /// Downsampled at `preprocess.voxel_size`, with normals
    pub fine: PointCloud,
    /// Present when coarse alignment is enabled
    pub coarse: Option<DescribedCloud>,
}

pub fn clean(index: usize, raw: PointCloud, section: &PreprocessSection) -> CleanedFrame {
    let input = raw.len();
    let (cloud, _) =
        remove_statistical_outliers(&raw, section.outlier_neighbors, section.outlier_std_ratio);
    let removed_outliers = input - cloud.len();

    tracing::debug!(frame = index, stage = %FrameStage::Clean, input, removed_outliers);
    CleanedFrame {
        index,
        cloud,
        removed_outliers,
    }
}

/// Fine-resolution cloud with normals.
pub fn downsample(frame: &CleanedFrame, section: &PreprocessSection) -> PointCloud {
    let mut fine = voxel_down_sample(&frame.cloud, section.voxel_size);
    estimate_normals(&mut fine, &section.normal_params());

    tracing::debug!(frame = frame.index, stage = %FrameStage::Downsample, points = fine.len());
    fine
}

pub fn describe(frame: &CleanedFrame, section: &FeatureSection) -> Result<DescribedCloud> {
    let mut cloud = voxel_down_sample(&frame.cloud, section.voxel_size);
    estimate_normals(&mut cloud, &section.normal_params());
    let features = compute_fpfh_features(&cloud, &section.to_feature_params())?;

    tracing::debug!(frame = frame.index, stage = %FrameStage::Describe, points = cloud.len());
    Ok(DescribedCloud { cloud, features })
}

/// Run the downsample and describe stages as configured.
pub fn prepare(frame: &CleanedFrame, config: &SessionConfig) -> Result<PreparedFrame> {
    let fine = downsample(frame, &config.preprocess);
    let coarse = if config.coarse.enabled {
        Some(describe(frame, &config.features)?)
    } else {
        None
    };
    Ok(PreparedFrame {
        index: frame.index,
        fine,
        coarse,
    })
}

/// Feature-matching RANSAC of `source` onto `target`.
///
/// Returns `None` when either frame was prepared without descriptors.
pub fn coarse_align<R: Rng + ?Sized>(
    source: &PreparedFrame,
    target: &PreparedFrame,
    options: &RansacOptions,
    rng: &mut R,
) -> Result<Option<RegistrationResult>> {
    let (Some(src), Some(tgt)) = (&source.coarse, &target.coarse) else {
        return Ok(None);
    };

    let result = registration_ransac_based_on_feature_matching(
        &src.cloud,
        &tgt.cloud,
        &src.features,
        &tgt.features,
        options,
        rng,
    )?;

    tracing::debug!(
        frame = source.index,
        stage = %FrameStage::CoarseAlign,
        fitness = result.fitness,
        inlier_rmse = result.inlier_rmse,
        trials = result.num_iterations
    );
    Ok(Some(result))
}

/// Point-to-plane ICP of `source` onto `target`, starting from `init`.
pub fn fine_align(
    source: &PreparedFrame,
    target: &PreparedFrame,
    init: &RigidTransform,
    options: &IcpOptions,
) -> Result<RegistrationResult> {
    let result = registration_icp_point_to_plane(&source.fine, &target.fine, init, options)?;

    tracing::debug!(
        frame = source.index,
        stage = %FrameStage::FineAlign,
        fitness = result.fitness,
        inlier_rmse = result.inlier_rmse,
        iterations = result.num_iterations,
        converged = result.converged
    );
    Ok(result)
}

/// Whether a stage result counts as a registration failure.
///
/// Zero fitness always fails. The fine stage additionally fails when it did not converge
/// and its fitness stays under `unconverged_min_fitness`.
pub fn registration_failed(
    stage: RegistrationStage,
    result: &RegistrationResult,
    policy: &FailureSection,
) -> bool {
    if result.fitness <= 0.0 || result.fitness < policy.min_fitness {
        return true;
    }
    match stage {
        RegistrationStage::Coarse => false,
        RegistrationStage::Fine => {
            !result.converged && result.fitness < policy.unconverged_min_fitness
        }
    }
}
