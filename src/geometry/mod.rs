//! Canonical reference points and the distances used to score a camera.
//!
//! Two projection matrices are compared by back-projecting a fixed set of
//! image anchors through each of them onto the court plane and measuring how
//! far apart the resulting world points land. Element-wise matrix comparison
//! is meaningless because a projection matrix is only defined up to scale.

use nalgebra::{Matrix2xX, Matrix3, Matrix3xX, Matrix4, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image anchors as fractions of (width, height): the right, centre and left
/// columns of the lower half of the frame, where the court floor is visible.
pub const CANONICAL_POINTS: [(f64, f64); 6] = [
    (1.0, 1.0),
    (1.0, 0.5),
    (0.5, 1.0),
    (0.5, 0.5),
    (0.0, 1.0),
    (0.0, 0.5),
];

/// Scales [`CANONICAL_POINTS`] to pixel coordinates for a `width × height` frame.
///
/// # Returns
///
/// A 2×6 matrix, one anchor per column.
pub fn reference_points(width: f64, height: f64) -> Matrix2xX<f64> {
    let columns: Vec<Vector2<f64>> = CANONICAL_POINTS
        .iter()
        .map(|&(fx, fy)| Vector2::new(fx * width, fy * height))
        .collect();
    Matrix2xX::from_columns(&columns)
}

/// How the distance between two back-projected point sets is reduced to a
/// single per-frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    /// Square root of the mean squared Euclidean distance between
    /// corresponding points.
    #[default]
    RmsEuclidean,
    /// Square root of the mean squared difference over every coordinate of
    /// every point. Equals `RmsEuclidean / sqrt(3)` for 3D points.
    RmsElementwise,
}

impl ErrorMetric {
    /// Distance between two equally shaped 3×N point sets.
    ///
    /// Returns `None` for empty or mismatched inputs.
    pub fn distance(&self, a: &Matrix3xX<f64>, b: &Matrix3xX<f64>) -> Option<f64> {
        if a.ncols() == 0 || a.ncols() != b.ncols() {
            return None;
        }
        let squared: f64 = (a - b).iter().map(|d| d * d).sum();
        let count = match self {
            ErrorMetric::RmsEuclidean => a.ncols(),
            ErrorMetric::RmsElementwise => a.len(),
        };
        Some((squared / count as f64).sqrt())
    }
}

impl fmt::Display for ErrorMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMetric::RmsEuclidean => write!(f, "rms_euclidean"),
            ErrorMetric::RmsElementwise => write!(f, "rms_elementwise"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl ErrorStatistics {
    /// Summary statistics of a list of errors, `None` if the list is empty.
    pub fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;

        let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
        let rmse = (sum_squared / n).sqrt();

        let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(ErrorStatistics {
            rmse,
            min,
            max,
            mean,
            stddev,
            median,
        })
    }
}

impl fmt::Debug for ErrorStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error Statistics [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Hartley normalisation of 2D points: zero mean, mean distance `sqrt(2)`.
///
/// Returns the normalised points and the similarity `T` with `x_n = T x`,
/// or `None` when the points are empty or all coincide.
pub fn normalize_points_2d(points: &Matrix2xX<f64>) -> Option<(Matrix2xX<f64>, Matrix3<f64>)> {
    let n = points.ncols();
    if n == 0 {
        return None;
    }
    let centroid: Vector2<f64> = points.column_mean();
    let mean_dist = points
        .column_iter()
        .map(|p| (p - centroid).norm())
        .sum::<f64>()
        / n as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 2.0_f64.sqrt() / mean_dist;
    let t = Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let mut normalized = points.clone();
    for mut col in normalized.column_iter_mut() {
        let p = (col.clone_owned() - centroid) * scale;
        col.copy_from(&p);
    }
    Some((normalized, t))
}

/// Hartley normalisation of 3D points: zero mean, mean distance `sqrt(3)`.
pub fn normalize_points_3d(points: &Matrix3xX<f64>) -> Option<(Matrix3xX<f64>, Matrix4<f64>)> {
    let n = points.ncols();
    if n == 0 {
        return None;
    }
    let centroid: Vector3<f64> = points.column_mean();
    let mean_dist = points
        .column_iter()
        .map(|p| (p - centroid).norm())
        .sum::<f64>()
        / n as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 3.0_f64.sqrt() / mean_dist;
    let mut t = Matrix4::identity() * scale;
    t[(0, 3)] = -scale * centroid.x;
    t[(1, 3)] = -scale * centroid.y;
    t[(2, 3)] = -scale * centroid.z;
    t[(3, 3)] = 1.0;

    let mut normalized = points.clone();
    for mut col in normalized.column_iter_mut() {
        let p = (col.clone_owned() - centroid) * scale;
        col.copy_from(&p);
    }
    Some((normalized, t))
}
