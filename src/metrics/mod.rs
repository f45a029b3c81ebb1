//! Offline re-scoring of stored result sequences.
//!
//! [`MetricAggregator`] reads back what a run stored and turns it into a
//! [`Summary`]. Degenerate frames (calibration not recovered) are left out of
//! both the accuracy count and the error list. Every other frame is scored by
//! back-projecting the canonical reference points through the predicted and
//! the ground-truth camera onto a world plane and measuring the distance
//! between the two point sets. A stored camera that cannot back-project the
//! points is reported in [`Summary::unscored`] and the other frames are still
//! aggregated.
//!
//! The aggregator never needs the model, so a stored run can be re-scored
//! with a different [`ErrorMetric`] or plane at any time.

use crate::camera::{Calib, CalibError, Plane};
use crate::geometry::{reference_points, ErrorMetric, ErrorStatistics};
use crate::store::{self, ResultSequence, StoreError};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("No valid estimates among {total_frames} frames")]
    NoValidEstimates { total_frames: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Record {index}: back-projected point sets differ in size")]
    ShapeMismatch { index: usize },
    #[error("Failed to write CSV: {0}")]
    CsvError(String),
}

impl From<csv::Error> for MetricsError {
    fn from(err: csv::Error) -> Self {
        MetricsError::CsvError(err.to_string())
    }
}

/// Error of one non-degenerate frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameError {
    /// 1-based position of the record in the stored sequence, header excluded.
    pub index: usize,
    pub point_count: usize,
    pub error: f64,
}

#[derive(Debug, Clone)]
pub struct Summary {
    /// Frames with a recovered calibration, unscored ones included.
    pub accuracy: usize,
    /// Frames in the sequence, degenerate ones included.
    pub total_frames: usize,
    /// Mean per-frame error over recovered frames, in world units.
    pub mean_rms_error: f64,
    pub statistics: ErrorStatistics,
    pub metric: ErrorMetric,
    pub frames: Vec<FrameError>,
    /// Recovered frames whose cameras could not back-project the reference
    /// points, by 1-based record index. They carry no error value.
    pub unscored: Vec<(usize, CalibError)>,
}

impl Summary {
    /// Number of frames whose calibration was recovered. Kept as an absolute
    /// count for compatibility with earlier reports; see
    /// [`Summary::recovery_ratio`] for the normalised value.
    pub fn accuracy_rate(&self) -> usize {
        self.accuracy
    }

    /// Fraction of frames whose calibration was recovered.
    pub fn recovery_ratio(&self) -> f64 {
        self.accuracy as f64 / self.total_frames as f64
    }

    /// Writes one row per recovered frame: `index,point_count,error`.
    pub fn export_frame_errors_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), MetricsError> {
        let mut writer = csv::Writer::from_path(path)?;
        for frame in &self.frames {
            writer.serialize(frame)?;
        }
        writer
            .flush()
            .map_err(|e| MetricsError::CsvError(e.to_string()))?;
        Ok(())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "accuracy_rate: {} / {} frames ({:.1}%)",
            self.accuracy,
            self.total_frames,
            100.0 * self.recovery_ratio()
        )?;
        writeln!(f, "mean_rms_error: {:.6} ({})", self.mean_rms_error, self.metric)?;
        if !self.unscored.is_empty() {
            let indices: Vec<String> = self.unscored.iter().map(|(i, _)| i.to_string()).collect();
            writeln!(
                f,
                "unscored: {} frames (records {})",
                self.unscored.len(),
                indices.join(", ")
            )?;
        }
        write!(f, "{:?}", self.statistics)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregator {
    pub metric: ErrorMetric,
    pub plane: Plane,
}

impl Default for MetricAggregator {
    fn default() -> Self {
        MetricAggregator {
            metric: ErrorMetric::default(),
            plane: Plane::ground(),
        }
    }
}

impl MetricAggregator {
    pub fn new(metric: ErrorMetric, plane: Plane) -> Self {
        MetricAggregator { metric, plane }
    }

    /// Scores every non-degenerate record of `sequence`.
    ///
    /// # Errors
    ///
    /// * [`MetricsError::NoValidEstimates`] if the sequence is empty or no
    ///   record could be scored.
    ///
    /// A non-degenerate record whose cameras cannot back-project the reference
    /// points onto the plane is logged and listed in [`Summary::unscored`].
    pub fn run(&self, sequence: &ResultSequence) -> Result<Summary, MetricsError> {
        let header = sequence.header;
        let anchors = reference_points(header.width as f64, header.height as f64);

        let mut frames = Vec::new();
        let mut unscored = Vec::new();
        for (i, record) in sequence.records.iter().enumerate() {
            if record.is_degenerate() {
                continue;
            }
            let index = i + 1;
            let predicted = Calib::from_matrix(record.predicted_calib, header.width, header.height);
            let gt = Calib::from_matrix(record.gt_calib, header.width, header.height);

            let projected = predicted
                .project_2d_to_3d(&anchors, self.plane)
                .and_then(|p| gt.project_2d_to_3d(&anchors, self.plane).map(|g| (p, g)));
            let (predicted_3d, gt_3d) = match projected {
                Ok(points) => points,
                Err(err) => {
                    warn!("Record {index} not scored on plane {}: {err}", self.plane);
                    unscored.push((index, err));
                    continue;
                }
            };
            let error = self
                .metric
                .distance(&predicted_3d, &gt_3d)
                .ok_or(MetricsError::ShapeMismatch { index })?;

            frames.push(FrameError {
                index,
                point_count: record.point_count,
                error,
            });
        }

        let errors: Vec<f64> = frames.iter().map(|f| f.error).collect();
        let statistics = ErrorStatistics::from_errors(&errors).ok_or(
            MetricsError::NoValidEstimates {
                total_frames: sequence.len(),
            },
        )?;

        Ok(Summary {
            accuracy: frames.len() + unscored.len(),
            total_frames: sequence.len(),
            mean_rms_error: statistics.mean,
            statistics,
            metric: self.metric,
            frames,
            unscored,
        })
    }

    /// Reads a stored run and scores it. A malformed file fails before any
    /// record is scored.
    pub fn run_file<P: AsRef<Path>>(&self, path: P) -> Result<Summary, MetricsError> {
        let sequence = store::read(path)?;
        self.run(&sequence)
    }
}
