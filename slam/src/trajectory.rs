//! Accumulated sensor poses, one entry per processed frame.

use cv_core::RigidTransform;
use nalgebra::Point3;

/// How far a committed pose can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseConfidence {
    Nominal,
    /// A registration stage failed and the session kept going (lenient mode).
    Low,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryEntry {
    pub frame_index: usize,
    /// Frame-to-map pose (frame 0 coordinates).
    pub pose: RigidTransform,
    pub confidence: PoseConfidence,
    /// Fine alignment fitness against the previous frame; 1 for the anchor frame.
    pub fitness: f64,
    pub inlier_rmse: f64,
}

impl TrajectoryEntry {
    pub fn position(&self) -> Point3<f64> {
        Point3::from(self.pose.translation())
    }
}

/// Append-only list of [`TrajectoryEntry`].
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    entries: Vec<TrajectoryEntry>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: TrajectoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TrajectoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TrajectoryEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryEntry> {
        self.entries.iter()
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.entries.iter().map(TrajectoryEntry::position).collect()
    }

    /// Frames whose pose was committed with [`PoseConfidence::Low`].
    pub fn low_confidence_frames(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.confidence == PoseConfidence::Low)
            .map(|e| e.frame_index)
            .collect()
    }

    /// Positions joined into a polyline: `(vertices, [i, i + 1] edges)`.
    pub fn line_set(&self) -> (Vec<Point3<f64>>, Vec<[usize; 2]>) {
        let points = self.positions();
        let edges = (1..points.len()).map(|i| [i - 1, i]).collect();
        (points, edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn entry(frame_index: usize, x: f64, confidence: PoseConfidence) -> TrajectoryEntry {
        TrajectoryEntry {
            frame_index,
            pose: RigidTransform::from_translation(Vector3::new(x, 0.0, 0.0)),
            confidence,
            fitness: 1.0,
            inlier_rmse: 0.0,
        }
    }

    #[test]
    fn test_line_set() {
        let mut trajectory = Trajectory::new();
        let (points, edges) = trajectory.line_set();
        assert!(points.is_empty() && edges.is_empty());

        trajectory.push(entry(0, 0.0, PoseConfidence::Nominal));
        trajectory.push(entry(1, 0.5, PoseConfidence::Low));
        trajectory.push(entry(2, 1.0, PoseConfidence::Nominal));

        let (points, edges) = trajectory.line_set();
        assert_eq!(points[2], Point3::new(1.0, 0.0, 0.0));
        assert_eq!(edges, vec![[0, 1], [1, 2]]);
        assert_eq!(trajectory.low_confidence_frames(), vec![1]);
    }
}
