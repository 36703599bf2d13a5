use cv_core::point_cloud::PointCloud;
use cv_core::RigidTransform;
use cv_point_cloud::voxel_down_sample;

/// Union of all fused frames, in frame 0 coordinates.
#[derive(Debug, Clone)]
pub struct GlobalMap {
    cloud: PointCloud,
    voxel_size: f64,
    maintenance_runs: usize,
}

impl GlobalMap {
    /// Empty map that downsamples at `voxel_size` on maintenance.
    pub fn new(voxel_size: f64) -> Self {
        Self {
            cloud: PointCloud::default(),
            voxel_size,
            maintenance_runs: 0,
        }
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// Number of completed maintenance passes.
    pub fn maintenance_runs(&self) -> usize {
        self.maintenance_runs
    }

    /// Append `frame` after moving it into map coordinates with `pose`.
    pub fn fuse(&mut self, frame: &PointCloud, pose: &RigidTransform) {
        let moved = frame.transformed(pose);
        self.cloud.extend_from(&moved);
    }

    /// Replace the map with its voxel-downsampled self. Returns `(before, after)` point counts.
    pub fn maintain(&mut self) -> (usize, usize) {
        let before = self.cloud.len();
        self.cloud = voxel_down_sample(&self.cloud, self.voxel_size);
        self.maintenance_runs += 1;
        (before, self.cloud.len())
    }

    pub fn into_cloud(self) -> PointCloud {
        self.cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};

    #[test]
    fn test_fuse_and_maintain() {
        let frame = PointCloud::new(vec![Point3::new(0.001, 0.001, 0.001), Point3::new(0.55, 0.55, 0.55)]);
        let mut map = GlobalMap::new(0.1);

        map.fuse(&frame, &RigidTransform::identity());
        map.fuse(&frame, &RigidTransform::from_translation(Vector3::new(0.002, 0.0, 0.0)));
        assert_eq!(map.len(), 4);
        assert!((map.cloud().points[2] - Point3::new(0.003, 0.001, 0.001)).norm() < 1e-12);

        let (before, after) = map.maintain();
        assert_eq!((before, after), (4, 2));
        assert_eq!(map.maintenance_runs(), 1);
    }
}
