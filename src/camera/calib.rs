//! A projection matrix bound to the image size it describes.
//!
//! [`Calib`] is built once per frame for the prediction and once for the
//! ground truth. Both are compared by back-projecting the same image points
//! onto a world [`Plane`] with [`Calib::project_2d_to_3d`].

use crate::camera::{CalibError, ProjectionMatrix, Resolution};
use nalgebra::{Matrix2xX, Matrix3, Matrix3x4, Matrix3xX, Rotation3, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned world plane, named by the coordinate held fixed.
///
/// Court floors are `Plane::Z(0.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    X(f64),
    Y(f64),
    Z(f64),
}

impl Plane {
    pub fn ground() -> Self {
        Plane::Z(0.0)
    }

    /// Index of the fixed axis and its value.
    fn fixed(&self) -> (usize, f64) {
        match *self {
            Plane::X(v) => (0, v),
            Plane::Y(v) => (1, v),
            Plane::Z(v) => (2, v),
        }
    }

    /// The two axes left free on the plane, in increasing order.
    fn free_axes(&self) -> (usize, usize) {
        match self {
            Plane::X(_) => (1, 2),
            Plane::Y(_) => (0, 2),
            Plane::Z(_) => (0, 1),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::X(v) => write!(f, "X={v}"),
            Plane::Y(v) => write!(f, "Y={v}"),
            Plane::Z(v) => write!(f, "Z={v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calib {
    pub projection: ProjectionMatrix,
    pub resolution: Resolution,
}

impl Calib {
    /// Wraps a projection matrix with the image size it was produced for.
    pub fn from_matrix(projection: ProjectionMatrix, width: u32, height: u32) -> Self {
        Calib {
            projection,
            resolution: Resolution { width, height },
        }
    }

    /// Builds `P = K [R | t]` from intrinsics, a world-to-camera rotation and
    /// a translation.
    pub fn from_krt(
        k: &Matrix3<f64>,
        r: &Rotation3<f64>,
        t: &Vector3<f64>,
        resolution: Resolution,
    ) -> Result<Self, CalibError> {
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r.matrix());
        rt.set_column(3, t);
        Ok(Calib {
            projection: ProjectionMatrix::new(k * rt)?,
            resolution,
        })
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Projects world points (3×N) to pixel coordinates (2×N).
    ///
    /// # Errors
    ///
    /// [`CalibError::PointAtInfinity`] when a point lies on the camera's
    /// principal plane.
    pub fn project_3d_to_2d(&self, points3d: &Matrix3xX<f64>) -> Result<Matrix2xX<f64>, CalibError> {
        let p = self.projection.matrix();
        let mut out = Matrix2xX::zeros(points3d.ncols());
        for i in 0..points3d.ncols() {
            let x = points3d.column(i);
            let h = p * Vector4::new(x[0], x[1], x[2], 1.0);
            if is_at_infinity(&h) {
                return Err(CalibError::PointAtInfinity(i));
            }
            out.set_column(i, &Vector2::new(h.x / h.z, h.y / h.z));
        }
        Ok(out)
    }

    /// Back-projects pixel coordinates (2×N) onto `plane`, returning world
    /// points (3×N) whose fixed coordinate equals the plane value.
    ///
    /// The mapping is the inverse of the plane-induced homography: for
    /// `Plane::Z(z)` that is `H = [p1 | p2 | z·p3 + p4]`.
    ///
    /// # Errors
    ///
    /// * [`CalibError::SingularPlaneHomography`] when the camera sees the plane edge-on.
    /// * [`CalibError::PointAtInfinity`] when a pixel lies on the plane's vanishing line.
    pub fn project_2d_to_3d(
        &self,
        points2d: &Matrix2xX<f64>,
        plane: Plane,
    ) -> Result<Matrix3xX<f64>, CalibError> {
        let h = self.plane_homography(plane);
        let h_inv = h
            .try_inverse()
            .filter(|m| m.iter().all(|v| v.is_finite()))
            .ok_or(CalibError::SingularPlaneHomography(plane))?;

        let (fixed_axis, fixed_value) = plane.fixed();
        let (a, b) = plane.free_axes();

        let mut out = Matrix3xX::zeros(points2d.ncols());
        for i in 0..points2d.ncols() {
            let px = points2d.column(i);
            let w = h_inv * Vector3::new(px[0], px[1], 1.0);
            if is_at_infinity(&w) {
                return Err(CalibError::PointAtInfinity(i));
            }
            let mut world = Vector3::zeros();
            world[a] = w.x / w.z;
            world[b] = w.y / w.z;
            world[fixed_axis] = fixed_value;
            out.set_column(i, &world);
        }
        Ok(out)
    }

    /// Homography from the plane's free coordinates to pixels.
    pub fn plane_homography(&self, plane: Plane) -> Matrix3<f64> {
        let (fixed_axis, fixed_value) = plane.fixed();
        let (a, b) = plane.free_axes();
        let p = &self.projection;
        let offset = p.column(fixed_axis) * fixed_value + p.column(3);
        Matrix3::from_columns(&[p.column(a), p.column(b), offset])
    }

    /// World position of the optical centre, the right null vector of `P`.
    pub fn camera_center(&self) -> Result<Vector3<f64>, CalibError> {
        let m_inv = self
            .projection
            .left_block()
            .try_inverse()
            .ok_or(CalibError::SingularCameraBlock)?;
        Ok(-(m_inv * self.projection.column(3)))
    }
}

fn is_at_infinity(h: &Vector3<f64>) -> bool {
    let scale = h.x.abs() + h.y.abs() + h.z.abs();
    !(h.z.abs() > f64::EPSILON * scale) || !scale.is_finite()
}
