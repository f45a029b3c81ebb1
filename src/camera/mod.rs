//! Projective camera representation used by the evaluator.
//!
//! A camera is a full 3×4 projection matrix ([`ProjectionMatrix`]) together
//! with the image size it was estimated for ([`Calib`]). The evaluator never
//! decomposes the matrix to compare two cameras; it back-projects image points
//! onto a world [`Plane`] and compares positions there.

use serde::{Deserialize, Serialize};

pub mod calib;
pub mod projection;
pub mod synthetic;

pub use calib::{Calib, Plane};
pub use projection::ProjectionMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    /// Resolution multiplied by an integer factor, e.g. a generated view size
    /// up-sampled before inference. `None` if either side overflows `u32`.
    pub fn scaled(&self, factor: u32) -> Option<Self> {
        Some(Resolution {
            width: self.width.checked_mul(factor)?,
            height: self.height.checked_mul(factor)?,
        })
    }

    /// Image centre in pixels, used as the principal point guess.
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum CalibError {
    #[error("Projection matrix needs 12 values, got {0}")]
    WrongMatrixLength(usize),
    #[error("Projection matrix contains non-finite values")]
    NonFiniteMatrix,
    #[error("Plane homography is singular, camera cannot see the {0} plane")]
    SingularPlaneHomography(Plane),
    #[error("Point {0} maps to infinity")]
    PointAtInfinity(usize),
    #[error("Left 3x3 block of the projection matrix is singular")]
    SingularCameraBlock,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_resolution(resolution: &Resolution) -> Result<(), CalibError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CalibError::InvalidParams(format!(
                "image size must be positive, got {}x{}",
                resolution.width, resolution.height
            )));
        }
        Ok(())
    }

    pub fn validate_finite(values: &[f64]) -> Result<(), CalibError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CalibError::NonFiniteMatrix);
        }
        Ok(())
    }
}
