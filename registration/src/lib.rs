//! Point cloud registration algorithms
//!
//! This crate provides the frame-to-frame alignment stages:
//! - Feature-matching RANSAC for coarse alignment without an initial guess
//! - Robust point-to-plane ICP for fine alignment
//! - Registration quality evaluation (fitness / inlier RMSE)

pub mod registration;

pub use registration::{
    estimate_rigid_transform, evaluate_registration, registration_icp_point_to_plane,
    Correspondence, ICPConvergenceCriteria, IcpOptions, RegistrationResult,
};

pub use registration::global::{
    match_features, registration_ransac_based_on_feature_matching, RansacOptions,
};

pub use cv_core::{Error, Result, RigidTransform, RobustLoss};
pub use cv_point_cloud::{FPFHFeature, FeatureParams};
