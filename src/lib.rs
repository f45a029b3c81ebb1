//! Court Calibration Evaluation Library
//!
//! Measures how well camera calibrations recovered from a learned keypoint
//! model match the ground truth on sports-venue imagery. The pipeline:
//! - Landmark extraction from heatmap-like model output
//! - Camera matrix estimation from 2D-3D correspondences (DLT with
//!   Levenberg-Marquardt refinement via tiny-solver)
//! - Per-frame result records, with failed frames marked by the DefaultCalib sentinel
//! - A JSON result store written once per run
//! - Offline re-scoring by back-projecting canonical image points onto the court plane

pub mod camera;
pub mod config;
pub mod evaluation;
pub mod extraction;
pub mod geometry;
pub mod metrics;
pub mod solver;
pub mod store;

// Re-export commonly used types
pub use camera::{Calib, CalibError, Plane, ProjectionMatrix, Resolution};
pub use config::{ConfigError, EvaluationConfig};
pub use evaluation::{EvaluationRun, FrameScore, FrameScorer};
pub use extraction::{Correspondences, HeatmapPeakExtractor, ModelOutput, PointExtractor};
pub use geometry::{reference_points, ErrorMetric, ErrorStatistics};
pub use metrics::{MetricAggregator, MetricsError, Summary};
pub use solver::{CalibrationSolver, DltSolver, SolveError, SolverOptions};
pub use store::{HeaderRecord, ResultRecord, ResultSequence, StoreError};
