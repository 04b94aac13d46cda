//! Conversion between the matrix form used internally and the
//! translation + quaternion pose form used at the system boundary.
//!
//! Both directions are pure functions. The internal form is canonical; the
//! external form only carries the planar part of a pose when converted in.

use crate::Homography;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Errors raised when an external pose cannot be turned into a 2D transform.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum TransformError {
    #[error("rotation quaternion is zero or not finite")]
    InvalidRotation,
    #[error("translation is not finite")]
    InvalidTranslation,
}

/// Pose form of a grid transform: translation plus rotation quaternion.
///
/// Translation is expressed in the units of the internal matrix (cells of the
/// reference grid). `q` and `-q` describe the same rotation; compare with
/// [`ExternalTransform::sign_normalized`] when checking equality.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransform {
    pub translation: Vector3<f64>,
    pub rotation: Quaternion<f64>,
}

impl Default for ExternalTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ExternalTransform {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: Quaternion::identity(),
        }
    }

    /// Planar pose: translation `(x, y, 0)` and rotation `yaw` about +z.
    pub fn planar(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            translation: Vector3::new(x, y, 0.0),
            rotation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw).into_inner(),
        }
    }

    /// Same transform with the quaternion sign fixed, so that `q` and `-q`
    /// normalise to the same value.
    ///
    /// The sign makes `w` positive. For half turns (`w` within `1e-12` of 0)
    /// the first non-negligible imaginary component is made positive instead.
    pub fn sign_normalized(&self) -> Self {
        const TIE: f64 = 1e-12;
        let q = self.rotation;
        let flip = if q.w.abs() > TIE {
            q.w < 0.0
        } else {
            [q.i, q.j, q.k]
                .into_iter()
                .find(|v| v.abs() > TIE)
                .is_some_and(|v| v < 0.0)
        };
        Self {
            translation: self.translation,
            rotation: if flip { -q } else { q },
        }
    }
}

/// Convert an internal transform into pose form.
///
/// The rotation angle is read from the linear part, the translation from the
/// last column; z translation is always 0. Uniform scale has no pose
/// counterpart and is dropped. The quaternion is unit length.
pub fn to_external(transform: &Homography) -> ExternalTransform {
    let m = transform.normalized().unwrap_or(*transform).h;
    let angle = m[(1, 0)].atan2(m[(0, 0)]);
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle);
    ExternalTransform {
        translation: Vector3::new(m[(0, 2)], m[(1, 2)], 0.0),
        rotation: rotation.into_inner(),
    }
}

/// Convert a pose into an internal rigid 2D transform.
///
/// Only the rotation about +z and the x/y translation survive. The quaternion
/// does not need to be normalised, but must be non-zero and finite.
pub fn to_internal(transform: &ExternalTransform) -> Result<Homography, TransformError> {
    let q = &transform.rotation;
    let norm2 = q.norm_squared();
    if !norm2.is_finite() || norm2 < f64::EPSILON {
        return Err(TransformError::InvalidRotation);
    }
    let t = &transform.translation;
    if !(t.x.is_finite() && t.y.is_finite() && t.z.is_finite()) {
        return Err(TransformError::InvalidTranslation);
    }

    // first column of the rotation matrix, projected on the xy plane
    let s = 2.0 / norm2;
    let cos = 1.0 - (q.j * q.j + q.k * q.k) * s;
    let sin = (q.i * q.j + q.k * q.w) * s;
    let angle = sin.atan2(cos);
    let (sin, cos) = angle.sin_cos();

    Ok(Homography::new(Matrix3::new(
        cos, -sin, t.x, //
        sin, cos, t.y, //
        0.0, 0.0, 1.0,
    )))
}
