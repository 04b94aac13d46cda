use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// 3x3 homogeneous transform acting on 2D grid-cell coordinates.
///
/// Map merging only produces rotations, translations and uniform scale, but the
/// matrix type permits any projective transform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self {
            h: Matrix3::identity(),
        }
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    /// Rotation by `angle` radians followed by translation `(tx, ty)`.
    pub fn rigid(angle: f64, tx: f64, ty: f64) -> Self {
        Self::similarity(1.0, angle, tx, ty)
    }

    /// `scale * R(angle)` followed by translation `(tx, ty)`.
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(Matrix3::new(
            scale * c,
            -scale * s,
            tx, //
            scale * s,
            scale * c,
            ty, //
            0.0,
            0.0,
            1.0,
        ))
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        Point2::new(v[0] / w, v[1] / w)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Homography) -> Self {
        Self::new(self.h * other.h)
    }

    /// Rotation angle of the linear part, in radians.
    pub fn angle(&self) -> f64 {
        self.h[(1, 0)].atan2(self.h[(0, 0)])
    }

    /// Uniform scale of the linear part (assumes no shear).
    pub fn scale(&self) -> f64 {
        self.h[(0, 0)].hypot(self.h[(1, 0)])
    }

    /// Scale the matrix so that `h[2][2] == 1`.
    pub fn normalized(&self) -> Option<Self> {
        let s = self.h[(2, 2)];
        if s.abs() < 1e-12 || !s.is_finite() {
            return None;
        }
        Some(Self::new(self.h / s))
    }

    pub fn is_identity(&self, eps: f64) -> bool {
        (self.h - Matrix3::identity()).amax() <= eps
    }
}

/// Least-squares fit of `dst ≈ s R src + t` for point pairs.
///
/// With `with_scale == false` the scale is fixed to 1 (rigid fit). Needs at
/// least two non-coincident source points; the two-point case is the exact
/// minimal solution used by RANSAC.
pub fn estimate_similarity(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    with_scale: bool,
) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 2 {
        return None;
    }
    let n = src.len() as f64;

    let (mut sx, mut sy, mut dx, mut dy) = (0.0, 0.0, 0.0, 0.0);
    for (p, q) in src.iter().zip(dst) {
        sx += p.x;
        sy += p.y;
        dx += q.x;
        dy += q.y;
    }
    let (sx, sy, dx, dy) = (sx / n, sy / n, dx / n, dy / n);

    // dot and cross terms of the centred point sets
    let mut dot = 0.0;
    let mut cross = 0.0;
    let mut src_var = 0.0;
    for (p, q) in src.iter().zip(dst) {
        let (px, py) = (p.x - sx, p.y - sy);
        let (qx, qy) = (q.x - dx, q.y - dy);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        src_var += px * px + py * py;
    }
    if src_var < 1e-12 {
        return None;
    }

    let (a, b) = if with_scale {
        (dot / src_var, cross / src_var)
    } else {
        let norm = dot.hypot(cross);
        if norm < 1e-12 {
            return None;
        }
        (dot / norm, cross / norm)
    };

    let tx = dx - (a * sx - b * sy);
    let ty = dy - (b * sx + a * sy);

    Some(Homography::new(Matrix3::new(
        a, -b, tx, //
        b, a, ty, //
        0.0, 0.0, 1.0,
    )))
}
