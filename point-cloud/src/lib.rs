//! Point cloud processing for scan registration
//!
//! - `spatial`: immutable R*-tree with kNN, radius and hybrid queries
//! - `filtering`: statistical outlier removal and voxel-grid downsampling
//! - `normals`: PCA normal estimation over hybrid neighbourhoods
//! - `features`: FPFH descriptors
//!
//! Per-point work runs on the global rayon pool.

pub mod features;
pub mod filtering;
pub mod normals;
pub mod spatial;

pub use cv_core::{Error, PointCloud, Result};
pub use features::{
    compute_fpfh_features, feature_distance, feature_distance_squared, FPFHFeature, FeatureParams,
    FPFH_DIMENSION,
};
pub use filtering::{remove_statistical_outliers, voxel_down_sample};
pub use normals::{estimate_normals, NormalEstimationParams};
pub use spatial::{Neighbor, SpatialIndex};
