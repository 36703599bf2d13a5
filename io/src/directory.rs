//! Frame sequences stored as one point cloud file per scan in a directory

use crate::{read_point_cloud, Error, Result};
use cv_core::point_cloud::PointCloud;
use std::path::{Path, PathBuf};

/// Extensions recognised as point cloud frames (compared case-insensitively).
pub const FRAME_EXTENSIONS: [&str; 2] = ["pcd", "ply"];

/// An ordered list of frame files.
///
/// Frames are sorted by file name, so zero-padded names (`000.pcd`, `001.pcd`, ...) give
/// capture order.
#[derive(Debug, Clone)]
pub struct FrameDirectory {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl FrameDirectory {
    /// List the frame files directly inside `dir`.
    ///
    /// Fails with [`Error::FileNotFound`] when `dir` does not exist. An existing directory
    /// without frames yields an empty listing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::FileNotFound(root));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.is_file() && is_frame_file(&path) {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        tracing::debug!(dir = %root.display(), frames = files.len(), "Listed frame directory");
        Ok(Self { root, files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read frame `index`.
    pub fn load(&self, index: usize) -> Result<PointCloud> {
        let path = self.files.get(index).ok_or_else(|| {
            Error::InvalidInput(format!(
                "frame {index} out of range, directory holds {}",
                self.files.len()
            ))
        })?;
        read_point_cloud(path)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}
