//! Core types shared by the mapping crates
//!
//! - [`PointCloud`]: positions with optional normals and colors
//! - [`RigidTransform`]: 4×4 rigid-body transform with an orthonormal rotation block
//! - [`RobustLoss`]: robust kernels for reweighted least squares
//! - [`Error`] / [`Result`]: the error taxonomy used across the workspace

pub mod error;
pub mod geometry;
pub mod point_cloud;
pub mod robust_loss;
pub mod runtime;

pub use error::{Error, RegistrationStage, Result};
pub use geometry::{nearest_rotation, skew_symmetric, RigidTransform, RIGIDITY_TOLERANCE};
pub use point_cloud::PointCloud;
pub use robust_loss::RobustLoss;
pub use runtime::init_global_thread_pool;
