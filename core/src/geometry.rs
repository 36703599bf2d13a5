//! Rigid-body transforms
//!
//! [`RigidTransform`] wraps a 4×4 homogeneous matrix whose upper-left 3×3 block is always a
//! proper rotation. Poses are chained by right-multiplication:
//! `accumulated = accumulated * incremental`.

use crate::{Error, Result};
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Unit, Vector3, Vector6};
use std::ops::Mul;

/// Maximum deviation from orthonormality accepted by [`RigidTransform::try_from_matrix`].
pub const RIGIDITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    matrix: Matrix4<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Build from a rotation block and a translation. The rotation is assumed orthonormal.
    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        Self { matrix }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::from_parts(&Matrix3::identity(), &translation)
    }

    /// Rotation of `angle` radians about `axis`, followed by `translation`.
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64, translation: Vector3<f64>) -> Self {
        let rotation = Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle);
        Self::from_parts(rotation.matrix(), &translation)
    }

    /// Validate an arbitrary 4×4 matrix as a rigid transform.
    pub fn try_from_matrix(matrix: Matrix4<f64>) -> Result<Self> {
        let bottom = matrix.fixed_view::<1, 4>(3, 0);
        if (bottom[0].abs() + bottom[1].abs() + bottom[2].abs() + (bottom[3] - 1.0).abs())
            > RIGIDITY_TOLERANCE
        {
            return Err(Error::InvalidInput(format!(
                "bottom row of a rigid transform must be [0 0 0 1], got {}",
                bottom
            )));
        }
        let candidate = Self { matrix };
        let error = candidate.orthonormality_error();
        if error > RIGIDITY_TOLERANCE || candidate.rotation().determinant() <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "rotation block is not a proper rotation (orthonormality error {error:.3e})"
            )));
        }
        Ok(candidate)
    }

    /// SE(3) exponential map of a twist `[v; ω]` (translation part first).
    pub fn exp(twist: &Vector6<f64>) -> Self {
        let v = Vector3::new(twist[0], twist[1], twist[2]);
        let omega = Vector3::new(twist[3], twist[4], twist[5]);
        let theta = omega.norm();

        if theta < 1e-12 {
            // First order; the orthonormality error is O(theta²)
            let rotation = Matrix3::identity() + skew_symmetric(&omega);
            return Self::from_parts(&rotation, &v);
        }

        let k = skew_symmetric(&(omega / theta));
        let k_sq = k * k;
        let rotation = Matrix3::identity() + k * theta.sin() + k_sq * (1.0 - theta.cos());
        let left_jacobian = Matrix3::identity()
            + k * ((1.0 - theta.cos()) / theta)
            + k_sq * ((theta - theta.sin()) / theta);

        Self::from_parts(&rotation, &(left_jacobian * v))
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// `self · rhs`: applies `rhs` first, then `self`.
    pub fn compose(&self, rhs: &RigidTransform) -> Self {
        Self {
            matrix: self.matrix * rhs.matrix,
        }
    }

    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation().transpose();
        let t_inv = -(r_inv * self.translation());
        Self::from_parts(&r_inv, &t_inv)
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.matrix.transform_point(point)
    }

    /// Rotate a direction (normals, offsets); translation is ignored.
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.matrix.transform_vector(vector)
    }

    /// Frobenius norm of `RᵀR − I`.
    pub fn orthonormality_error(&self) -> f64 {
        let r = self.rotation();
        (r.transpose() * r - Matrix3::identity()).norm()
    }

    /// Snap the rotation block back onto SO(3), keeping the translation.
    pub fn reorthonormalize(&mut self) {
        let rotation = nearest_rotation(&self.rotation());
        self.matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    }

    /// Magnitude of the rotation in radians.
    pub fn rotation_angle(&self) -> f64 {
        let cos = ((self.rotation().trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
        cos.acos()
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a RigidTransform> for &'a RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: &'a RigidTransform) -> RigidTransform {
        self.compose(rhs)
    }
}

impl From<RigidTransform> for Matrix4<f64> {
    fn from(t: RigidTransform) -> Self {
        t.matrix
    }
}

pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}

/// Closest proper rotation (det = +1) to `m` in the Frobenius sense.
///
/// With `m` a cross-covariance `Σ tᵢ sᵢᵀ` this is the Kabsch rotation taking `s` onto `t`.
pub fn nearest_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Matrix3::identity(),
    };

    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u_corrected = u;
        u_corrected.set_column(2, &(u.column(2) * -1.0));
        rotation = u_corrected * v_t;
    }
    rotation
}
