//! Landmark extraction from model output.
//!
//! The model emits one response map per court landmark. A [`PointExtractor`]
//! turns that tensor into 2D–3D [`Correspondences`]: where each detected
//! landmark sits in the image, paired with its known position on the court.
//! Any extraction strategy can be plugged in; [`HeatmapPeakExtractor`] is the
//! reference one.

use crate::camera::{Calib, Resolution};
use nalgebra::{DMatrix, Matrix2xX, Matrix3xX, Vector2, Vector3, Vector4};

pub mod court;

#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("Model output has no channels")]
    NoChannels,
    #[error("Channel {index} is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    ShapeMismatch {
        index: usize,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
    #[error("Got {points2d} image points but {points3d} world points")]
    MismatchedPoints { points2d: usize, points3d: usize },
}

/// A heatmap-like model output: `C` response maps of identical `H×W` shape.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    channels: Vec<DMatrix<f32>>,
}

impl ModelOutput {
    pub fn new(channels: Vec<DMatrix<f32>>) -> Result<Self, ExtractionError> {
        let first = channels.first().ok_or(ExtractionError::NoChannels)?;
        let (expected_rows, expected_cols) = first.shape();
        for (index, channel) in channels.iter().enumerate() {
            let (rows, cols) = channel.shape();
            if rows != expected_rows || cols != expected_cols {
                return Err(ExtractionError::ShapeMismatch {
                    index,
                    rows,
                    cols,
                    expected_rows,
                    expected_cols,
                });
            }
        }
        Ok(ModelOutput { channels })
    }

    pub fn channels(&self) -> &[DMatrix<f32>] {
        &self.channels
    }

    /// `(rows, cols)` of every channel.
    pub fn shape(&self) -> (usize, usize) {
        self.channels[0].shape()
    }
}

/// Image points (2×N) paired column by column with world points (3×N).
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondences {
    pub points2d: Matrix2xX<f64>,
    pub points3d: Matrix3xX<f64>,
}

impl Correspondences {
    pub fn new(
        points2d: Matrix2xX<f64>,
        points3d: Matrix3xX<f64>,
    ) -> Result<Self, ExtractionError> {
        if points2d.ncols() != points3d.ncols() {
            return Err(ExtractionError::MismatchedPoints {
                points2d: points2d.ncols(),
                points3d: points3d.ncols(),
            });
        }
        Ok(Correspondences { points2d, points3d })
    }

    pub fn empty() -> Self {
        Correspondences {
            points2d: Matrix2xX::zeros(0),
            points3d: Matrix3xX::zeros(0),
        }
    }

    pub fn from_pairs(pairs: &[(Vector2<f64>, Vector3<f64>)]) -> Self {
        if pairs.is_empty() {
            return Self::empty();
        }
        let points2d: Vec<Vector2<f64>> = pairs.iter().map(|(p, _)| *p).collect();
        let points3d: Vec<Vector3<f64>> = pairs.iter().map(|(_, p)| *p).collect();
        Correspondences {
            points2d: Matrix2xX::from_columns(&points2d),
            points3d: Matrix3xX::from_columns(&points3d),
        }
    }

    pub fn len(&self) -> usize {
        self.points2d.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps one model output to landmark correspondences. May return none.
pub trait PointExtractor {
    fn extract(&self, output: &ModelOutput) -> Correspondences;
}

/// Takes the strongest response of each channel as the landmark position.
///
/// Channel `k` belongs to `landmarks[k]`; channels beyond the landmark list
/// are ignored. A channel whose peak stays below `threshold` yields no point.
/// The peak is refined with a 3×3 weighted centroid and mapped from heatmap
/// cells to pixel centres of an image of size `resolution`.
#[derive(Debug, Clone)]
pub struct HeatmapPeakExtractor {
    pub landmarks: Vec<Vector3<f64>>,
    pub threshold: f32,
    pub resolution: Resolution,
}

impl HeatmapPeakExtractor {
    pub fn new(landmarks: Vec<Vector3<f64>>, threshold: f32, resolution: Resolution) -> Self {
        HeatmapPeakExtractor {
            landmarks,
            threshold,
            resolution,
        }
    }

    /// Sub-pixel `(col, row)` of the channel's peak, if it passes the threshold.
    fn peak(&self, channel: &DMatrix<f32>) -> Option<(f64, f64)> {
        let mut best: Option<(usize, usize, f32)> = None;
        for c in 0..channel.ncols() {
            for r in 0..channel.nrows() {
                let v = channel[(r, c)];
                if !v.is_finite() {
                    continue;
                }
                if best.map_or(true, |(_, _, b)| v > b) {
                    best = Some((r, c, v));
                }
            }
        }
        let (row, col, value) = best?;
        if value < self.threshold {
            return None;
        }

        let mut sum_w = 0.0;
        let mut sum_r = 0.0;
        let mut sum_c = 0.0;
        for r in row.saturating_sub(1)..=(row + 1).min(channel.nrows() - 1) {
            for c in col.saturating_sub(1)..=(col + 1).min(channel.ncols() - 1) {
                let v = channel[(r, c)];
                if v.is_finite() && v > 0.0 {
                    let w = v as f64;
                    sum_w += w;
                    sum_r += w * r as f64;
                    sum_c += w * c as f64;
                }
            }
        }
        if sum_w <= 0.0 {
            return Some((col as f64, row as f64));
        }
        Some((sum_c / sum_w, sum_r / sum_w))
    }
}

impl PointExtractor for HeatmapPeakExtractor {
    fn extract(&self, output: &ModelOutput) -> Correspondences {
        let (rows, cols) = output.shape();
        let sx = self.resolution.width as f64 / cols as f64;
        let sy = self.resolution.height as f64 / rows as f64;

        let pairs: Vec<(Vector2<f64>, Vector3<f64>)> = output
            .channels()
            .iter()
            .zip(self.landmarks.iter())
            .filter_map(|(channel, landmark)| {
                let (c, r) = self.peak(channel)?;
                let pixel = Vector2::new((c + 0.5) * sx - 0.5, (r + 0.5) * sy - 0.5);
                Some((pixel, *landmark))
            })
            .collect();
        Correspondences::from_pairs(&pairs)
    }
}

/// Renders the ideal model output for a camera: one Gaussian blob of width
/// `sigma` (heatmap cells) per landmark, peak value 1.
///
/// Landmarks that fall outside the image or behind the camera get an empty
/// channel. Useful to exercise the pipeline without a trained model.
pub fn render_landmark_heatmaps(
    calib: &Calib,
    landmarks: &[Vector3<f64>],
    heatmap: Resolution,
    sigma: f64,
) -> Result<ModelOutput, ExtractionError> {
    let rows = heatmap.height as usize;
    let cols = heatmap.width as usize;
    let sx = calib.width() as f64 / cols as f64;
    let sy = calib.height() as f64 / rows as f64;
    let p = calib.projection.matrix();

    let channels = landmarks
        .iter()
        .map(|landmark| {
            let mut channel = DMatrix::<f32>::zeros(rows, cols);
            let h = p * Vector4::new(landmark.x, landmark.y, landmark.z, 1.0);
            if h.z <= f64::EPSILON {
                return channel;
            }
            let (u, v) = (h.x / h.z, h.y / h.z);
            if u < 0.0 || v < 0.0 || u >= calib.width() as f64 || v >= calib.height() as f64 {
                return channel;
            }
            let (hc, hr) = ((u + 0.5) / sx - 0.5, (v + 0.5) / sy - 0.5);
            for c in 0..cols {
                for r in 0..rows {
                    let d2 = (c as f64 - hc).powi(2) + (r as f64 - hr).powi(2);
                    channel[(r, c)] = (-d2 / (2.0 * sigma * sigma)).exp() as f32;
                }
            }
            channel
        })
        .collect();
    ModelOutput::new(channels)
}
