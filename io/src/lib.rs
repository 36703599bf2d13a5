//! Point cloud file I/O
//!
//! Supports reading and writing point clouds in:
//! - PCD (Point Cloud Data - PCL format), ASCII and binary
//! - PLY (Polygon File Format), ASCII
//!
//! plus frame directory listing and PLY line-set export for trajectories.

pub mod directory;
pub mod pcd;
pub mod ply;

pub use directory::{FrameDirectory, FRAME_EXTENSIONS};
pub use pcd::{read_pcd, write_pcd, PcdData};
pub use ply::{read_ply, write_line_set_ply, write_ply};

pub use cv_core::{Error, Result};

use cv_core::point_cloud::PointCloud;
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pcd,
    Ply,
}

fn format_of(path: &Path) -> Result<Format> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pcd") => Ok(Format::Pcd),
        Some("ply") => Ok(Format::Ply),
        other => Err(Error::UnsupportedFormat(format!(
            "{} (extension {:?})",
            path.display(),
            other
        ))),
    }
}

/// Read a point cloud, choosing the parser from the file extension.
pub fn read_point_cloud(path: impl AsRef<Path>) -> Result<PointCloud> {
    let path = path.as_ref();
    let format = format_of(path)?;
    if !path.is_file() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let reader = BufReader::new(File::open(path)?);
    let cloud = match format {
        Format::Pcd => read_pcd(reader),
        Format::Ply => read_ply(reader),
    }
    .map_err(|e| match e {
        Error::Parse(msg) => Error::Parse(format!("{}: {msg}", path.display())),
        other => other,
    })?;

    tracing::debug!(path = %path.display(), points = cloud.len(), "Read point cloud");
    Ok(cloud)
}

/// Write a point cloud as ASCII PCD or PLY, chosen from the file extension.
pub fn write_point_cloud(path: impl AsRef<Path>, cloud: &PointCloud) -> Result<()> {
    let path = path.as_ref();
    let format = format_of(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        Format::Pcd => write_pcd(&mut writer, cloud)?,
        Format::Ply => write_ply(&mut writer, cloud)?,
    }
    writer.flush()?;
    Ok(())
}

/// Write a trajectory polyline (consecutive positions joined by edges) to a PLY file.
pub fn write_trajectory_ply(
    path: impl AsRef<Path>,
    points: &[Point3<f64>],
    edges: &[[usize; 2]],
    color: &Point3<f64>,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    write_line_set_ply(&mut writer, points, edges, color)?;
    writer.flush()?;
    Ok(())
}
