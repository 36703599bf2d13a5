//! Incremental mapping from a sequence of point cloud scans.
//!
//! A [`MapSession`] registers every frame against the previous one (feature RANSAC, then
//! point-to-plane ICP), chains the results into a trajectory and fuses each frame into a
//! global map that is periodically voxel-downsampled.
//!
//! ```no_run
//! use cv_io::FrameDirectory;
//! use cv_slam::{MapSession, SessionConfig};
//!
//! let frames = FrameDirectory::open("data")?;
//! let output = MapSession::run(SessionConfig::default(), &frames)?;
//! println!("{} poses, {} map points", output.trajectory.len(), output.map.len());
//! # Ok::<(), cv_core::Error>(())
//! ```

pub mod config;
pub mod mapping;
pub mod pipeline;
pub mod trajectory;

pub use config::{
    CoarseSection, FailureMode, FailureSection, FeatureSection, FineSection, MaintenanceSection,
    PreprocessSection, SessionConfig,
};
pub use cv_core::{Error, RegistrationStage, Result, RigidTransform};
pub use mapping::GlobalMap;
pub use pipeline::{CleanedFrame, DescribedCloud, FrameStage, PreparedFrame};
pub use trajectory::{PoseConfidence, Trajectory, TrajectoryEntry};

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;

use cv_core::point_cloud::PointCloud;
use cv_point_cloud::voxel_down_sample;
use cv_registration::RegistrationResult;

/// Random access to the frames of one run.
pub trait FrameSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize) -> Result<PointCloud>;

    /// Where the frames come from, for error reporting.
    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }
}

impl FrameSource for Vec<PointCloud> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn load(&self, index: usize) -> Result<PointCloud> {
        self.get(index).cloned().ok_or_else(|| {
            Error::InvalidInput(format!("frame {index} out of range, {} frames", self.as_slice().len()))
        })
    }
}

impl FrameSource for cv_io::FrameDirectory {
    fn len(&self) -> usize {
        cv_io::FrameDirectory::len(self)
    }

    fn load(&self, index: usize) -> Result<PointCloud> {
        cv_io::FrameDirectory::load(self, index)
    }

    fn location(&self) -> PathBuf {
        self.root().to_path_buf()
    }
}

/// What happened to one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: usize,
    pub input_points: usize,
    pub removed_outliers: usize,
    /// RANSAC result, when coarse alignment ran
    pub coarse: Option<RegistrationResult>,
    /// ICP result; `None` for the anchor frame
    pub fine: Option<RegistrationResult>,
    /// Transform from this frame into the previous one
    pub incremental: RigidTransform,
    /// Accumulated pose after composition
    pub pose: RigidTransform,
    pub confidence: PoseConfidence,
    /// The global map was downsampled after this frame
    pub maintained: bool,
    pub map_points: usize,
}

/// Final products of a session.
#[derive(Debug, Clone)]
pub struct MapOutput {
    /// Global map after a last downsampling pass
    pub map: PointCloud,
    pub trajectory: Trajectory,
    pub reports: Vec<FrameReport>,
}

/// Owns the accumulated pose, trajectory and global map of one run.
///
/// Frames are fed strictly in order with [`MapSession::process_frame`]; the state only changes
/// once a frame's registration has been accepted.
pub struct MapSession {
    config: SessionConfig,
    rng: StdRng,
    pose: RigidTransform,
    trajectory: Trajectory,
    map: GlobalMap,
    previous: PreparedFrame,
    reports: Vec<FrameReport>,
}

impl MapSession {
    /// Start a session with frame 0, which fixes the map origin.
    pub fn initialize(config: SessionConfig, first_frame: PointCloud) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let input_points = first_frame.len();
        let cleaned = pipeline::clean(0, first_frame, &config.preprocess);
        let prepared = pipeline::prepare(&cleaned, &config)?;

        let pose = RigidTransform::identity();
        let mut map = GlobalMap::new(config.maintenance.voxel_size);
        map.fuse(&cleaned.cloud, &pose);

        let mut trajectory = Trajectory::new();
        trajectory.push(TrajectoryEntry {
            frame_index: 0,
            pose,
            confidence: PoseConfidence::Nominal,
            fitness: 1.0,
            inlier_rmse: 0.0,
        });

        let report = FrameReport {
            frame_index: 0,
            input_points,
            removed_outliers: cleaned.removed_outliers,
            coarse: None,
            fine: None,
            incremental: pose,
            pose,
            confidence: PoseConfidence::Nominal,
            maintained: false,
            map_points: map.len(),
        };

        tracing::info!(points = map.len(), "Session initialized with frame 0");

        Ok(Self {
            config,
            rng,
            pose,
            trajectory,
            map,
            previous: prepared,
            reports: vec![report],
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Accumulated pose of the last committed frame.
    pub fn pose(&self) -> &RigidTransform {
        &self.pose
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn map(&self) -> &PointCloud {
        self.map.cloud()
    }

    pub fn global_map(&self) -> &GlobalMap {
        &self.map
    }

    pub fn reports(&self) -> &[FrameReport] {
        &self.reports
    }

    /// Index the next call to [`MapSession::process_frame`] will assign.
    pub fn next_frame_index(&self) -> usize {
        self.trajectory.len()
    }

    /// Register, commit and fuse the next frame.
    ///
    /// In strict mode a failed registration returns [`Error::RegistrationFailure`] before any
    /// committed state changes.
    pub fn process_frame(&mut self, frame: PointCloud) -> Result<FrameReport> {
        let index = self.next_frame_index();
        let input_points = frame.len();

        let cleaned = pipeline::clean(index, frame, &self.config.preprocess);
        let prepared = pipeline::prepare(&cleaned, &self.config)?;

        let mut confidence = PoseConfidence::Nominal;

        let coarse = pipeline::coarse_align(
            &prepared,
            &self.previous,
            &self.config.coarse.to_ransac_options(),
            &mut self.rng,
        )?;
        let init = match &coarse {
            Some(result) if self.rejected(index, RegistrationStage::Coarse, result)? => {
                confidence = PoseConfidence::Low;
                RigidTransform::identity()
            }
            Some(result) => result.transformation,
            None => RigidTransform::identity(),
        };

        let fine = pipeline::fine_align(
            &prepared,
            &self.previous,
            &init,
            &self.config.fine.to_icp_options(),
        )?;
        if self.rejected(index, RegistrationStage::Fine, &fine)? {
            confidence = PoseConfidence::Low;
        }

        let incremental = fine.transformation;
        self.compose(incremental);
        self.trajectory.push(TrajectoryEntry {
            frame_index: index,
            pose: self.pose,
            confidence,
            fitness: fine.fitness,
            inlier_rmse: fine.inlier_rmse,
        });

        self.map.fuse(&cleaned.cloud, &self.pose);
        tracing::debug!(frame = index, stage = %FrameStage::Fuse, map_points = self.map.len());

        let maintained = index % self.config.maintenance.interval == 0;
        if maintained {
            let (before, after) = self.map.maintain();
            tracing::info!(frame = index, stage = %FrameStage::Maintain, before, after, "Global map downsampled");
        }

        self.previous = prepared;

        let translation = self.pose.translation();
        tracing::info!(
            frame = index,
            fitness = fine.fitness,
            inlier_rmse = fine.inlier_rmse,
            x = translation.x,
            y = translation.y,
            z = translation.z,
            "Frame committed"
        );

        let report = FrameReport {
            frame_index: index,
            input_points,
            removed_outliers: cleaned.removed_outliers,
            coarse,
            fine: Some(fine),
            incremental,
            pose: self.pose,
            confidence,
            maintained,
            map_points: self.map.len(),
        };
        self.reports.push(report.clone());
        Ok(report)
    }

    /// Final downsampling pass; consumes the session.
    pub fn finish(self) -> MapOutput {
        let voxel_size = self.map.voxel_size();
        let map = voxel_down_sample(&self.map.into_cloud(), voxel_size);
        tracing::info!(
            frames = self.trajectory.len(),
            points = map.len(),
            low_confidence = self.trajectory.low_confidence_frames().len(),
            "Session finished"
        );
        MapOutput {
            map,
            trajectory: self.trajectory,
            reports: self.reports,
        }
    }

    /// Process every frame of `source` in order.
    ///
    /// Fails with [`Error::NoFrames`] before doing any work when `source` is empty.
    pub fn run<S: FrameSource + ?Sized>(config: SessionConfig, source: &S) -> Result<MapOutput> {
        if source.is_empty() {
            return Err(Error::NoFrames(source.location()));
        }
        config.validate()?;

        tracing::debug!(frame = 0, stage = %FrameStage::Load);
        let mut session = Self::initialize(config, source.load(0)?)?;
        for index in 1..source.len() {
            tracing::debug!(frame = index, stage = %FrameStage::Load);
            session.process_frame(source.load(index)?)?;
        }
        Ok(session.finish())
    }

    /// `pose ← pose · incremental`, then snap the rotation back onto SO(3) if it drifted.
    fn compose(&mut self, incremental: RigidTransform) {
        self.pose = self.pose * incremental;

        let error = self.pose.orthonormality_error();
        if error > self.config.orthonormality_tolerance {
            tracing::warn!(
                frame = self.trajectory.len(),
                error,
                tolerance = self.config.orthonormality_tolerance,
                "Accumulated pose lost orthonormality, re-orthonormalizing"
            );
            self.pose.reorthonormalize();
        }
        tracing::debug!(frame = self.trajectory.len(), stage = %FrameStage::PoseCompose);
    }

    /// Apply the failure policy: `Ok(true)` for a failure tolerated in lenient mode.
    fn rejected(
        &self,
        frame: usize,
        stage: RegistrationStage,
        result: &RegistrationResult,
    ) -> Result<bool> {
        if !pipeline::registration_failed(stage, result, &self.config.failure) {
            return Ok(false);
        }
        match self.config.failure.mode {
            FailureMode::Strict => Err(Error::RegistrationFailure {
                frame,
                stage,
                fitness: result.fitness,
                inlier_rmse: result.inlier_rmse,
            }),
            FailureMode::Lenient => {
                tracing::warn!(
                    frame,
                    %stage,
                    fitness = result.fitness,
                    inlier_rmse = result.inlier_rmse,
                    converged = result.converged,
                    "Registration failed, keeping best available transform"
                );
                Ok(true)
            }
        }
    }
}
