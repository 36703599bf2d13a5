use crate::geometry::RigidTransform;
use nalgebra::{Point3, Vector3};

/// In-memory point cloud stored as parallel attribute arrays.
///
/// `normals` and `colors`, when present, always have one entry per point.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f64>>,
    pub colors: Option<Vec<Point3<f64>>>,
    pub normals: Option<Vec<Vector3<f64>>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
        }
    }

    pub fn with_colors(mut self, colors: Vec<Point3<f64>>) -> crate::Result<Self> {
        if colors.len() == self.points.len() {
            self.colors = Some(colors);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> crate::Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    /// Apply a rigid transform in place. Normals are rotated, colors are untouched.
    pub fn transform(&mut self, transform: &RigidTransform) {
        for p in &mut self.points {
            *p = transform.transform_point(p);
        }
        if let Some(normals) = &mut self.normals {
            for n in normals.iter_mut() {
                *n = transform.transform_vector(n);
            }
        }
    }

    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        let mut out = self.clone();
        out.transform(transform);
        out
    }

    /// Concatenate `other` onto this cloud.
    ///
    /// An optional attribute survives only when both clouds carry it; otherwise the
    /// attribute arrays would stop lining up with `points`.
    pub fn extend_from(&mut self, other: &PointCloud) {
        let was_empty = self.is_empty();

        self.normals = match (self.normals.take(), &other.normals) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if was_empty => Some(theirs.clone()),
            _ => None,
        };
        self.colors = match (self.colors.take(), &other.colors) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if was_empty => Some(theirs.clone()),
            _ => None,
        };
        self.points.extend_from_slice(&other.points);
    }

    /// New cloud holding the points at `indices`, in that order.
    pub fn select_by_index(&self, indices: &[usize]) -> Self {
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i]).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i]).collect()),
        }
    }

    /// Mean position, or `None` for an empty cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.points.iter().map(|p| p.coords).sum();
        Some(Point3::from(sum / self.len() as f64))
    }
}
