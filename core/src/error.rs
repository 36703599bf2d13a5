use std::fmt;
use std::path::PathBuf;

/// Pipeline stage that produced a registration result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStage {
    /// Feature-based RANSAC alignment.
    Coarse,
    /// Point-to-plane ICP refinement.
    Fine,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStage::Coarse => write!(f, "coarse alignment"),
            RegistrationStage::Fine => write!(f, "fine alignment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("No point cloud frames found in {}", .0.display())]
    NoFrames(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Point {index} has no valid normal; estimate normals first")]
    MissingNormals { index: usize },

    #[error(
        "Frame {frame}: {stage} failed (fitness {fitness:.4}, inlier RMSE {inlier_rmse:.4})"
    )]
    RegistrationFailure {
        frame: usize,
        stage: RegistrationStage,
        fitness: f64,
        inlier_rmse: f64,
    },

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
