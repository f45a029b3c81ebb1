//! Camera matrix estimation from 2D–3D landmark correspondences.
//!
//! A [`CalibrationSolver`] turns [`Correspondences`] plus the image size into
//! a [`ProjectionMatrix`], or reports a [`SolveError`]. The scorer treats any
//! error as "calibration not recovered" for that frame.
//!
//! [`DltSolver`] is the reference implementation:
//! 1. Landmarks on a horizontal plane (all court floor points): a normalised
//!    DLT homography, from which focal length, rotation and translation are
//!    recovered assuming square pixels and the principal point at the image
//!    centre. Optionally refined with Levenberg-Marquardt.
//! 2. Landmarks spread in 3D: a normalised DLT for the full 3×4 matrix.

use crate::camera::{Calib, CalibError, ProjectionMatrix, Resolution};
use crate::extraction::Correspondences;
use log::debug;
use serde::{Deserialize, Serialize};

pub mod dlt;
pub mod refine;

pub use dlt::{estimate_homography, estimate_projection, planar_pose, PlanarPose};
pub use refine::{refine_planar, PlanarRefinementCost};

/// Minimum correspondences for the planar case.
pub const MIN_PLANAR_POINTS: usize = 4;
/// Minimum correspondences for the general 3D case.
pub const MIN_GENERAL_POINTS: usize = 6;

#[derive(thiserror::Error, Debug)]
pub enum SolveError {
    #[error("Need at least {required} correspondences, found {found}")]
    InsufficientPoints { found: usize, required: usize },
    #[error("Got {points2d} image points but {points3d} world points")]
    MismatchedPoints { points2d: usize, points3d: usize },
    #[error("Correspondences contain non-finite coordinates")]
    NonFinitePoints,
    #[error("Degenerate point configuration: {0}")]
    DegenerateConfiguration(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Reprojection RMSE {rmse:.3} px exceeds the accepted {max:.3} px")]
    ReprojectionTooLarge { rmse: f64, max: f64 },
    #[error(transparent)]
    Calib(#[from] CalibError),
}

/// Estimates a camera from landmark correspondences.
pub trait CalibrationSolver {
    /// # Errors
    ///
    /// Any [`SolveError`] means no usable camera could be recovered.
    fn solve(
        &self,
        correspondences: &Correspondences,
        resolution: &Resolution,
    ) -> Result<ProjectionMatrix, SolveError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Refine planar estimates with Levenberg-Marquardt.
    pub refine: bool,
    /// Reject estimates whose RMS reprojection error (pixels) exceeds this.
    pub max_reprojection_error: Option<f64>,
    /// Relative tolerance used to decide that all landmarks share one height.
    pub coplanarity_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            refine: true,
            max_reprojection_error: None,
            coplanarity_tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DltSolver {
    pub options: SolverOptions,
}

impl DltSolver {
    pub fn new(options: SolverOptions) -> Self {
        DltSolver { options }
    }

    /// Height shared by every world point, if they all lie on one horizontal plane.
    fn common_height(&self, correspondences: &Correspondences) -> Option<f64> {
        let z = correspondences.points3d.row(2);
        let first = z[0];
        let tol = self.options.coplanarity_tolerance * (1.0 + first.abs());
        z.iter().all(|v| (v - first).abs() <= tol).then_some(first)
    }
}

impl CalibrationSolver for DltSolver {
    fn solve(
        &self,
        correspondences: &Correspondences,
        resolution: &Resolution,
    ) -> Result<ProjectionMatrix, SolveError> {
        let found = correspondences.len();
        if correspondences.points3d.ncols() != found {
            return Err(SolveError::MismatchedPoints {
                points2d: found,
                points3d: correspondences.points3d.ncols(),
            });
        }
        if found < MIN_PLANAR_POINTS {
            return Err(SolveError::InsufficientPoints {
                found,
                required: MIN_PLANAR_POINTS,
            });
        }
        if correspondences.points2d.iter().any(|v| !v.is_finite())
            || correspondences.points3d.iter().any(|v| !v.is_finite())
        {
            return Err(SolveError::NonFinitePoints);
        }

        let projection = match self.common_height(correspondences) {
            Some(height) => {
                let linear = planar_pose(correspondences, resolution, height)?;
                let pose = if self.options.refine {
                    refine_planar(&linear, correspondences, resolution).unwrap_or(linear)
                } else {
                    linear
                };
                pose.projection(resolution)?
            }
            None => {
                if found < MIN_GENERAL_POINTS {
                    return Err(SolveError::InsufficientPoints {
                        found,
                        required: MIN_GENERAL_POINTS,
                    });
                }
                estimate_projection(correspondences)?
            }
        };

        let calib = Calib::from_matrix(projection, resolution.width, resolution.height);
        let rmse = reprojection_rmse(&calib, correspondences)?;
        debug!("Solved camera from {found} points, reprojection RMSE {rmse:.4} px");
        if let Some(max) = self.options.max_reprojection_error {
            if rmse > max {
                return Err(SolveError::ReprojectionTooLarge { rmse, max });
            }
        }
        Ok(projection)
    }
}

/// RMS pixel distance between observed image points and the projection of
/// their world points.
pub fn reprojection_rmse(calib: &Calib, correspondences: &Correspondences) -> Result<f64, CalibError> {
    let n = correspondences.len();
    if n == 0 {
        return Ok(0.0);
    }
    let projected = calib.project_3d_to_2d(&correspondences.points3d)?;
    let sum_squared: f64 = (projected - &correspondences.points2d)
        .iter()
        .map(|d| d * d)
        .sum();
    Ok((sum_squared / n as f64).sqrt())
}
