//! Build a map and trajectory from a directory of point cloud frames.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use nalgebra::Point3;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cv_mapping::io::{write_point_cloud, write_trajectory_ply, FrameDirectory};
use cv_mapping::slam::PoseConfidence;
use cv_mapping::{FailureMode, MapSession, Result, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "cv-mapping", version, about = "Incremental point cloud mapping")]
struct CliArgs {
    /// Directory holding one .pcd or .ply file per frame, ordered by file name
    data_dir: PathBuf,
    /// TOML session configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Output path for the fused map (.pcd or .ply)
    #[arg(long, value_name = "FILE", default_value = "map.pcd")]
    map: PathBuf,
    /// Output path for the trajectory line set
    #[arg(long, value_name = "FILE", default_value = "trajectory.ply")]
    trajectory: PathBuf,
    /// Abort on the first failed registration
    #[arg(long)]
    strict: bool,
    /// Seed for RANSAC sampling
    #[arg(long)]
    seed: Option<u64>,
    /// Worker threads (defaults to CV_MAPPING_THREADS, then all cores)
    #[arg(long)]
    threads: Option<usize>,
    /// Log verbosity, overrides RUST_LOG
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let filter = match args.log_level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> Result<()> {
    let threads = cv_mapping::init_thread_pool(args.threads)?;
    info!(threads, "Thread pool ready");

    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    if args.strict {
        config.failure.mode = FailureMode::Strict;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let frames = FrameDirectory::open(&args.data_dir)?;
    info!(frames = frames.len(), dir = %args.data_dir.display(), "Processing frames");

    let output = MapSession::run(config, &frames)?;

    for report in &output.reports {
        let t = report.pose.translation();
        let fitness = report.fine.as_ref().map_or(1.0, |r| r.fitness);
        let flag = match report.confidence {
            PoseConfidence::Nominal => "",
            PoseConfidence::Low => "  [low confidence]",
        };
        println!(
            "frame {:>4}  fitness {:.3}  position ({:+.3}, {:+.3}, {:+.3})  map {:>8}{}{}",
            report.frame_index,
            fitness,
            t.x,
            t.y,
            t.z,
            report.map_points,
            if report.maintained { "  [downsampled]" } else { "" },
            flag
        );
    }

    write_point_cloud(&args.map, &output.map)?;
    let (points, edges) = output.trajectory.line_set();
    write_trajectory_ply(&args.trajectory, &points, &edges, &Point3::new(1.0, 0.0, 0.0))?;

    info!(
        map = %args.map.display(),
        trajectory = %args.trajectory.display(),
        points = output.map.len(),
        "Outputs written"
    );
    Ok(())
}
