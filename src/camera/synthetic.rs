//! Synthetic cameras for validating the pipeline without a trained model.

use crate::camera::{Calib, CalibError, Resolution};
use nalgebra::{Matrix3, Rotation3, Vector3};

/// A pinhole camera with square pixels and the principal point at the image
/// centre, placed at `center` (world meters) and looking along world `+Y`,
/// pitched down towards the floor by `tilt` radians.
///
/// This is the usual side-line broadcast view of a court whose length runs
/// along world `X`.
pub fn broadcast_camera(
    resolution: Resolution,
    focal: f64,
    center: Vector3<f64>,
    tilt: f64,
) -> Result<Calib, CalibError> {
    if focal <= 0.0 || !focal.is_finite() {
        return Err(CalibError::InvalidParams(format!(
            "focal length must be positive, got {focal}"
        )));
    }
    let (cx, cy) = resolution.center();
    let k = Matrix3::new(focal, 0.0, cx, 0.0, focal, cy, 0.0, 0.0, 1.0);

    // Camera x = world x, camera y (image down) = -world z, optical axis = world y.
    let level = Rotation3::from_matrix_unchecked(Matrix3::new(
        1.0, 0.0, 0.0, //
        0.0, 0.0, -1.0, //
        0.0, 1.0, 0.0,
    ));
    let r = Rotation3::from_axis_angle(&Vector3::x_axis(), tilt) * level;
    let t = -(r * center);
    Calib::from_krt(&k, &r, &t, resolution)
}
