//! The 3×4 projection matrix and the "calibration failed" sentinel.

use crate::camera::{validation, CalibError};
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use serde::{Deserialize, Serialize};

/// A camera's full projective mapping from homogeneous world coordinates to
/// homogeneous image coordinates, `x ~ P X`.
///
/// The matrix is immutable once built. On disk it is stored flattened in
/// row-major order as 12 numbers.
///
/// # Examples
///
/// ```rust
/// use court_calib_eval::camera::ProjectionMatrix;
///
/// let p = ProjectionMatrix::default_calib();
/// assert!(p.is_default_calib());
/// assert_eq!(p.to_row_major()[11], 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ProjectionMatrix {
    matrix: Matrix3x4<f64>,
}

impl ProjectionMatrix {
    /// Wraps a matrix after checking every entry is finite.
    pub fn new(matrix: Matrix3x4<f64>) -> Result<Self, CalibError> {
        validation::validate_finite(matrix.as_slice())?;
        Ok(ProjectionMatrix { matrix })
    }

    /// Builds the matrix from 12 row-major values.
    ///
    /// # Errors
    ///
    /// * [`CalibError::WrongMatrixLength`] if `values` does not hold exactly 12 numbers.
    /// * [`CalibError::NonFiniteMatrix`] if any value is NaN or infinite.
    pub fn from_row_slice(values: &[f64]) -> Result<Self, CalibError> {
        if values.len() != 12 {
            return Err(CalibError::WrongMatrixLength(values.len()));
        }
        Self::new(Matrix3x4::from_row_slice(values))
    }

    /// The sentinel stored when calibration recovery failed: a 3×4 identity
    /// whose third-row translation is 1. It is never a legitimate estimate.
    pub fn default_calib() -> Self {
        let mut matrix = Matrix3x4::identity();
        matrix[(2, 3)] = 1.0;
        ProjectionMatrix { matrix }
    }

    /// Exact element-wise comparison against [`ProjectionMatrix::default_calib`].
    pub fn is_default_calib(&self) -> bool {
        *self == Self::default_calib()
    }

    pub fn matrix(&self) -> &Matrix3x4<f64> {
        &self.matrix
    }

    pub fn to_row_major(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(12);
        for r in 0..3 {
            for c in 0..4 {
                values.push(self.matrix[(r, c)]);
            }
        }
        values
    }

    /// Column `index` of the matrix.
    pub fn column(&self, index: usize) -> Vector3<f64> {
        self.matrix.column(index).into_owned()
    }

    /// The left 3×3 block `M` of `P = [M | p4]`.
    pub fn left_block(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// The same scene seen at an image resolution scaled by `factor`:
    /// `diag(factor, factor, 1) * P`.
    pub fn scaled_image(&self, factor: f64) -> Result<Self, CalibError> {
        let scale = Matrix3::from_diagonal(&Vector3::new(factor, factor, 1.0));
        Self::new(scale * self.matrix)
    }
}

impl TryFrom<Vec<f64>> for ProjectionMatrix {
    type Error = CalibError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_row_slice(&values)
    }
}

impl From<ProjectionMatrix> for Vec<f64> {
    fn from(p: ProjectionMatrix) -> Self {
        p.to_row_major()
    }
}
