//! Incremental point cloud mapping.
//!
//! Re-exports the workspace crates under one roof:
//! - [`core`]: point clouds, rigid transforms, errors, robust losses
//! - [`point_cloud`]: spatial index, filtering, normals, FPFH descriptors
//! - [`registration`]: feature RANSAC and point-to-plane ICP
//! - [`slam`]: the mapping session
//! - [`io`]: PCD / PLY files and frame directories

pub use cv_core as core;
pub use cv_io as io;
pub use cv_point_cloud as point_cloud;
pub use cv_registration as registration;
pub use cv_slam as slam;

pub use cv_core::{Error, PointCloud, Result, RigidTransform};
pub use cv_slam::{FailureMode, MapOutput, MapSession, SessionConfig};

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before processing frames.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `CV_MAPPING_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<usize> {
    cv_core::init_global_thread_pool(num_threads)
}
