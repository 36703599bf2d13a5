//! Session configuration.
//!
//! Every section deserializes with defaults, so a TOML file only needs the keys it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use cv_core::{Error, Result, RobustLoss};
use cv_point_cloud::{FeatureParams, NormalEstimationParams};
use cv_registration::{ICPConvergenceCriteria, IcpOptions, RansacOptions};

/// Full mapping session configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest accepted `‖RᵀR − I‖` of the accumulated pose before it is re-orthonormalized
    pub orthonormality_tolerance: f64,

    /// RANSAC seed; `None` seeds from OS entropy
    pub seed: Option<u64>,

    /// Per-frame cleaning and fine-resolution preparation
    pub preprocess: PreprocessSection,

    /// Coarse-resolution cloud and FPFH descriptors
    pub features: FeatureSection,

    /// Feature-matching RANSAC
    pub coarse: CoarseSection,

    /// Point-to-plane ICP
    pub fine: FineSection,

    /// Periodic global map downsampling
    pub maintenance: MaintenanceSection,

    /// What to do when a registration stage fails
    pub failure: FailureSection,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            orthonormality_tolerance: 1e-9,
            seed: None,
            preprocess: PreprocessSection::default(),
            features: FeatureSection::default(),
            coarse: CoarseSection::default(),
            fine: FineSection::default(),
            maintenance: MaintenanceSection::default(),
            failure: FailureSection::default(),
        }
    }
}

impl SessionConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Reject parameter values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        positive("preprocess.voxel_size", self.preprocess.voxel_size)?;
        positive("preprocess.normal_radius", self.preprocess.normal_radius)?;
        non_negative("preprocess.outlier_std_ratio", self.preprocess.outlier_std_ratio)?;
        at_least("preprocess.normal_max_neighbors", self.preprocess.normal_max_neighbors, 3)?;

        if self.coarse.enabled {
            positive("features.voxel_size", self.features.voxel_size)?;
            positive("features.normal_radius", self.features.normal_radius)?;
            positive("features.radius", self.features.radius)?;
            at_least("features.normal_max_neighbors", self.features.normal_max_neighbors, 3)?;
            at_least("features.max_neighbors", self.features.max_neighbors, 1)?;

            positive("coarse.max_correspondence_distance", self.coarse.max_correspondence_distance)?;
            at_least("coarse.ransac_n", self.coarse.ransac_n, 3)?;
            at_least("coarse.max_iterations", self.coarse.max_iterations, 1)?;
            non_negative("coarse.edge_length_ratio", self.coarse.edge_length_ratio)?;
            if !(self.coarse.confidence > 0.0 && self.coarse.confidence < 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "coarse.confidence must lie in (0, 1), got {}",
                    self.coarse.confidence
                )));
            }
        }

        positive("fine.max_correspondence_distance", self.fine.max_correspondence_distance)?;
        positive("fine.huber_k", self.fine.huber_k)?;
        non_negative("fine.relative_fitness", self.fine.relative_fitness)?;
        non_negative("fine.relative_rmse", self.fine.relative_rmse)?;
        at_least("fine.max_iterations", self.fine.max_iterations, 1)?;

        at_least("maintenance.interval", self.maintenance.interval, 1)?;
        positive("maintenance.voxel_size", self.maintenance.voxel_size)?;

        non_negative("failure.min_fitness", self.failure.min_fitness)?;
        non_negative("failure.unconverged_min_fitness", self.failure.unconverged_min_fitness)?;
        positive("orthonormality_tolerance", self.orthonormality_tolerance)?;
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{name} must be positive, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{name} must be non-negative, got {value}")))
    }
}

fn at_least(name: &str, value: usize, min: usize) -> Result<()> {
    if value >= min {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{name} must be at least {min}, got {value}")))
    }
}

/// Cleaning and fine-resolution settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSection {
    /// Neighbours used by statistical outlier removal
    pub outlier_neighbors: usize,
    /// Points farther than `mean + ratio·σ` are removed
    pub outlier_std_ratio: f64,
    /// Voxel size of the cloud ICP runs on (meters)
    pub voxel_size: f64,
    pub normal_radius: f64,
    pub normal_max_neighbors: usize,
}

impl Default for PreprocessSection {
    fn default() -> Self {
        Self {
            outlier_neighbors: 20,
            outlier_std_ratio: 2.0,
            voxel_size: 0.02,
            normal_radius: 0.1,
            normal_max_neighbors: 30,
        }
    }
}

impl PreprocessSection {
    pub fn normal_params(&self) -> NormalEstimationParams {
        NormalEstimationParams::new(self.normal_radius, self.normal_max_neighbors)
    }
}

/// Descriptor settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSection {
    /// Voxel size of the cloud descriptors are computed on (meters)
    pub voxel_size: f64,
    pub normal_radius: f64,
    pub normal_max_neighbors: usize,
    /// FPFH neighbourhood radius
    pub radius: f64,
    pub max_neighbors: usize,
}

impl Default for FeatureSection {
    fn default() -> Self {
        Self {
            voxel_size: 0.05,
            normal_radius: 0.1,
            normal_max_neighbors: 30,
            radius: 0.25,
            max_neighbors: 100,
        }
    }
}

impl FeatureSection {
    pub fn normal_params(&self) -> NormalEstimationParams {
        NormalEstimationParams::new(self.normal_radius, self.normal_max_neighbors)
    }

    pub fn to_feature_params(&self) -> FeatureParams {
        FeatureParams {
            radius: self.radius,
            max_neighbors: self.max_neighbors,
        }
    }
}

/// Coarse alignment settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseSection {
    /// Run RANSAC before ICP; when disabled ICP starts from identity
    pub enabled: bool,
    pub max_correspondence_distance: f64,
    pub ransac_n: usize,
    pub mutual_filter: bool,
    pub edge_length_ratio: f64,
    pub max_iterations: usize,
    pub confidence: f64,
}

impl Default for CoarseSection {
    fn default() -> Self {
        let ransac = RansacOptions::default();
        Self {
            enabled: true,
            max_correspondence_distance: ransac.max_correspondence_distance,
            ransac_n: ransac.ransac_n,
            mutual_filter: ransac.mutual_filter,
            edge_length_ratio: ransac.edge_length_ratio,
            max_iterations: ransac.max_iterations,
            confidence: ransac.confidence,
        }
    }
}

impl CoarseSection {
    pub fn to_ransac_options(&self) -> RansacOptions {
        RansacOptions {
            max_correspondence_distance: self.max_correspondence_distance,
            ransac_n: self.ransac_n,
            mutual_filter: self.mutual_filter,
            edge_length_ratio: self.edge_length_ratio,
            max_iterations: self.max_iterations,
            confidence: self.confidence,
        }
    }
}

/// Fine alignment settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FineSection {
    pub max_correspondence_distance: f64,
    /// Huber threshold on point-to-plane residuals (meters)
    pub huber_k: f64,
    pub max_iterations: usize,
    pub relative_fitness: f64,
    pub relative_rmse: f64,
}

impl Default for FineSection {
    fn default() -> Self {
        let criteria = ICPConvergenceCriteria::default();
        Self {
            max_correspondence_distance: 0.1,
            huber_k: 0.1,
            max_iterations: criteria.max_iteration,
            relative_fitness: criteria.relative_fitness,
            relative_rmse: criteria.relative_rmse,
        }
    }
}

impl FineSection {
    pub fn to_icp_options(&self) -> IcpOptions {
        IcpOptions {
            max_correspondence_distance: self.max_correspondence_distance,
            loss: RobustLoss::Huber { k: self.huber_k },
            criteria: ICPConvergenceCriteria {
                relative_fitness: self.relative_fitness,
                relative_rmse: self.relative_rmse,
                max_iteration: self.max_iterations,
            },
        }
    }
}

/// Map maintenance settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    /// Downsample the global map after every frame whose index is a multiple of this
    pub interval: usize,
    pub voxel_size: f64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            interval: 5,
            voxel_size: 0.01,
        }
    }
}

/// Reaction to a failed registration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Abort the run with [`Error::RegistrationFailure`]
    Strict,
    /// Keep the best available transform and flag the pose as low confidence
    #[default]
    Lenient,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureSection {
    pub mode: FailureMode,
    /// A stage with fitness below this failed
    pub min_fitness: f64,
    /// An unconverged ICP run also fails below this fitness
    pub unconverged_min_fitness: f64,
}

impl Default for FailureSection {
    fn default() -> Self {
        Self {
            mode: FailureMode::Lenient,
            min_fitness: 0.01,
            unconverged_min_fitness: 0.3,
        }
    }
}
