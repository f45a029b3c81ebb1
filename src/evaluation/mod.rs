//! Per-frame scoring and the run that owns its results.
//!
//! [`FrameScorer`] is the pure part: model output and ground truth in, one
//! [`ResultRecord`] out. It performs no I/O and never fails; a frame whose
//! camera cannot be recovered is recorded with the DefaultCalib sentinel and
//! `recovered = false`.
//!
//! [`EvaluationRun`] owns the result buffer of one run. Its
//! [`on_frame`](EvaluationRun::on_frame) callback scores a frame and hands
//! back the two back-projected reference point sets for an external metrics
//! harness; [`finish`](EvaluationRun::finish) writes the buffer and re-scores
//! it from disk.

use crate::camera::{Calib, CalibError, Plane, ProjectionMatrix, Resolution};
use crate::extraction::{ModelOutput, PointExtractor};
use crate::geometry::reference_points;
use crate::metrics::{MetricAggregator, MetricsError, Summary};
use crate::solver::{CalibrationSolver, SolveError};
use crate::store::{self, HeaderRecord, ResultRecord, ResultSequence};
use log::{debug, info, warn};
use nalgebra::{Matrix2xX, Matrix3xX};
use std::path::Path;

/// A scored frame together with the reason its calibration was not recovered.
#[derive(Debug)]
pub struct FrameScore {
    pub record: ResultRecord,
    pub failure: Option<SolveError>,
}

impl FrameScore {
    pub fn is_recovered(&self) -> bool {
        self.failure.is_none()
    }
}

/// Extraction, then solving, for frames of one canonical size.
#[derive(Debug, Clone)]
pub struct FrameScorer<E, S> {
    extractor: E,
    solver: S,
    resolution: Resolution,
}

impl<E: PointExtractor, S: CalibrationSolver> FrameScorer<E, S> {
    pub fn new(extractor: E, solver: S, resolution: Resolution) -> Self {
        FrameScorer {
            extractor,
            solver,
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Scores one frame, keeping the solver error if there was one.
    pub fn score_frame(&self, output: &ModelOutput, gt: &ProjectionMatrix) -> FrameScore {
        let correspondences = self.extractor.extract(output);
        let point_count = correspondences.len();

        match self.solver.solve(&correspondences, &self.resolution) {
            Ok(predicted) => FrameScore {
                record: ResultRecord::recovered(point_count, predicted, *gt),
                failure: None,
            },
            Err(err) => FrameScore {
                record: ResultRecord::failed(point_count, *gt),
                failure: Some(err),
            },
        }
    }

    pub fn score(&self, output: &ModelOutput, gt: &ProjectionMatrix) -> ResultRecord {
        self.score_frame(output, gt).record
    }
}

/// Running mean absolute difference between the back-projected point sets
/// reported by [`EvaluationRun::on_frame`].
#[derive(Debug, Clone, Default)]
struct MeanAbsoluteError {
    sum: f64,
    count: usize,
}

impl MeanAbsoluteError {
    fn update(&mut self, predicted: &Matrix3xX<f64>, gt: &Matrix3xX<f64>) {
        self.sum += (predicted - gt).iter().map(|d| d.abs()).sum::<f64>();
        self.count += predicted.len();
    }

    fn compute(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// State of one evaluation run: the scorer, the reference points scaled to
/// the canonical frame and the buffered records.
pub struct EvaluationRun<E, S> {
    scorer: FrameScorer<E, S>,
    anchors: Matrix2xX<f64>,
    plane: Plane,
    sequence: ResultSequence,
    online_error: MeanAbsoluteError,
}

impl<E: PointExtractor, S: CalibrationSolver> EvaluationRun<E, S> {
    pub fn new(scorer: FrameScorer<E, S>, plane: Plane) -> Self {
        let resolution = scorer.resolution();
        EvaluationRun {
            anchors: reference_points(resolution.width as f64, resolution.height as f64),
            sequence: ResultSequence::new(HeaderRecord::from(resolution)),
            scorer,
            plane,
            online_error: MeanAbsoluteError::default(),
        }
    }

    pub fn scorer(&self) -> &FrameScorer<E, S> {
        &self.scorer
    }

    pub fn sequence(&self) -> &ResultSequence {
        &self.sequence
    }

    pub fn into_sequence(self) -> ResultSequence {
        self.sequence
    }

    /// Mean absolute coordinate difference over every frame seen so far,
    /// degenerate frames included.
    pub fn online_mean_absolute_error(&self) -> Option<f64> {
        self.online_error.compute()
    }

    /// Scores one frame and appends its record.
    ///
    /// `input` is the model input. It is not used for scoring and is accepted
    /// so the callback matches the harness signature.
    ///
    /// # Returns
    ///
    /// The reference points back-projected on the run's plane through the
    /// predicted and through the ground-truth camera, in that order. When the
    /// calibration was not recovered and the DefaultCalib sentinel cannot
    /// back-project onto the plane, the ground-truth points stand in for the
    /// prediction and the frame is left out of the online error.
    ///
    /// # Errors
    ///
    /// [`CalibError`] if the ground-truth camera, or a recovered prediction,
    /// cannot back-project onto the plane. The record is stored regardless.
    pub fn on_frame<I: ?Sized>(
        &mut self,
        _input: &I,
        target: &ProjectionMatrix,
        output: &ModelOutput,
    ) -> Result<(Matrix3xX<f64>, Matrix3xX<f64>), CalibError> {
        let frame = self.scorer.score_frame(output, target);
        if let Some(err) = &frame.failure {
            debug!(
                "Frame {}: calibration not recovered from {} points: {err}",
                self.sequence.len() + 1,
                frame.record.point_count
            );
        }

        let resolution = self.scorer.resolution();
        let predicted = Calib::from_matrix(
            frame.record.predicted_calib,
            resolution.width,
            resolution.height,
        );
        let gt = Calib::from_matrix(frame.record.gt_calib, resolution.width, resolution.height);
        let recovered = frame.is_recovered();
        self.sequence.push(frame.record);

        let gt_3d = gt.project_2d_to_3d(&self.anchors, self.plane)?;
        let predicted_3d = match predicted.project_2d_to_3d(&self.anchors, self.plane) {
            Ok(points) => points,
            Err(err) if !recovered => {
                debug!("Sentinel not projected on plane {}: {err}", self.plane);
                return Ok((gt_3d.clone(), gt_3d));
            }
            Err(err) => return Err(err),
        };
        self.online_error.update(&predicted_3d, &gt_3d);
        Ok((predicted_3d, gt_3d))
    }

    /// End-of-run hook: writes the buffered sequence to `path`, then reads
    /// it back and aggregates it.
    pub fn finish<P: AsRef<Path>>(
        &self,
        path: P,
        aggregator: &MetricAggregator,
    ) -> Result<Summary, MetricsError> {
        let path = path.as_ref();
        store::write(path, &self.sequence)?;
        info!(
            "Saved {} frame results to {}",
            self.sequence.len(),
            path.display()
        );
        if let Some(mae) = self.online_mean_absolute_error() {
            info!("Camera Evaluation Overall Results - MAE: {mae:.3}");
        }

        match aggregator.run_file(path) {
            Ok(summary) => {
                info!(
                    "accuracy_rate: {}, mean_rms_error: {:.6} m",
                    summary.accuracy_rate(),
                    summary.mean_rms_error
                );
                Ok(summary)
            }
            Err(err) => {
                warn!("Re-scoring {} failed: {err}", path.display());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::synthetic::broadcast_camera;
    use crate::extraction::Correspondences;
    use nalgebra::{DMatrix, Vector3};
    use std::cell::Cell;

    /// Returns a fixed set of correspondences and counts calls.
    struct FixedExtractor {
        correspondences: Correspondences,
        calls: Cell<usize>,
    }

    impl PointExtractor for FixedExtractor {
        fn extract(&self, _output: &ModelOutput) -> Correspondences {
            self.calls.set(self.calls.get() + 1);
            self.correspondences.clone()
        }
    }

    /// Succeeds with a fixed matrix when given at least `min_points`.
    struct StubSolver {
        answer: ProjectionMatrix,
        min_points: usize,
    }

    impl CalibrationSolver for StubSolver {
        fn solve(
            &self,
            correspondences: &Correspondences,
            _resolution: &Resolution,
        ) -> Result<ProjectionMatrix, SolveError> {
            if correspondences.len() < self.min_points {
                return Err(SolveError::InsufficientPoints {
                    found: correspondences.len(),
                    required: self.min_points,
                });
            }
            Ok(self.answer)
        }
    }

    fn resolution() -> Resolution {
        Resolution::new(1920, 1080)
    }

    fn gt() -> ProjectionMatrix {
        broadcast_camera(resolution(), 1800.0, Vector3::new(14.0, -10.0, 8.0), 0.6)
            .unwrap()
            .projection
    }

    fn output() -> ModelOutput {
        ModelOutput::new(vec![DMatrix::zeros(4, 4)]).unwrap()
    }

    fn points(n: usize) -> Correspondences {
        let pairs: Vec<_> = (0..n)
            .map(|i| {
                (
                    nalgebra::Vector2::new(i as f64, 0.0),
                    Vector3::new(i as f64, 0.0, 0.0),
                )
            })
            .collect();
        Correspondences::from_pairs(&pairs)
    }

    fn scorer(n: usize, min_points: usize) -> FrameScorer<FixedExtractor, StubSolver> {
        FrameScorer::new(
            FixedExtractor {
                correspondences: points(n),
                calls: Cell::new(0),
            },
            StubSolver {
                answer: gt(),
                min_points,
            },
            resolution(),
        )
    }

    #[test]
    fn test_successful_frame() {
        let record = scorer(6, 4).score(&output(), &gt());
        assert_eq!(record.point_count, 6);
        assert_eq!(record.predicted_calib, gt());
        assert_eq!(record.gt_calib, gt());
        assert_eq!(record.recovered, Some(true));
    }

    #[test]
    fn test_failed_frame_keeps_point_count() {
        let frame = scorer(3, 4).score_frame(&output(), &gt());
        assert!(!frame.is_recovered());
        assert!(matches!(
            frame.failure,
            Some(SolveError::InsufficientPoints { found: 3, .. })
        ));
        assert!(frame.record.predicted_calib.is_default_calib());
        assert_eq!(frame.record.point_count, 3);
        assert_eq!(frame.record.recovered, Some(false));
    }

    #[test]
    fn test_empty_extraction_is_a_failed_frame() {
        let record = scorer(0, 4).score(&output(), &gt());
        assert_eq!(record.point_count, 0);
        assert!(record.is_degenerate());
    }

    #[test]
    fn test_scoring_is_repeatable() {
        let s = scorer(5, 4);
        let a = s.score(&output(), &gt());
        let b = s.score(&output(), &gt());
        assert_eq!(a, b);
        assert_eq!(s.extractor.calls.get(), 2);
    }

    #[test]
    fn test_on_frame_buffers_records_in_order() {
        let mut run = EvaluationRun::new(scorer(6, 4), Plane::ground());
        let (pred, truth) = run.on_frame(&(), &gt(), &output()).unwrap();
        assert_eq!(pred.ncols(), 6);
        assert_eq!(pred, truth);
        assert_eq!(run.online_mean_absolute_error(), Some(0.0));

        run.on_frame(&(), &gt(), &output()).unwrap();
        let seq = run.into_sequence();
        assert_eq!(seq.header.width, 1920);
        assert_eq!(seq.header.height, 1080);
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_failed_frame_below_ground_plane() {
        // The sentinel's homography onto Z = -1 is singular.
        let mut run = EvaluationRun::new(scorer(2, 4), Plane::Z(-1.0));
        let (pred, truth) = run.on_frame(&(), &gt(), &output()).unwrap();
        assert_eq!(pred, truth);
        assert_eq!(pred.ncols(), 6);
        assert_eq!(run.online_mean_absolute_error(), None);
        assert!(run.sequence().records[0].is_degenerate());

        // On the ground plane the sentinel still contributes to the online error.
        let mut run = EvaluationRun::new(scorer(2, 4), Plane::ground());
        run.on_frame(&(), &gt(), &output()).unwrap();
        assert!(run.online_mean_absolute_error().unwrap() > 0.0);
    }

    #[test]
    fn test_finish_writes_and_rescores() {
        let path = std::env::temp_dir().join(format!("court_calib_run_{}.json", std::process::id()));
        let mut ok_run = EvaluationRun::new(scorer(6, 4), Plane::ground());
        ok_run.on_frame(&(), &gt(), &output()).unwrap();
        let summary = ok_run.finish(&path, &MetricAggregator::default()).unwrap();
        assert_eq!(summary.accuracy_rate(), 1);
        assert!(summary.mean_rms_error.abs() < 1e-9);

        let mut failing_run = EvaluationRun::new(scorer(2, 4), Plane::ground());
        failing_run.on_frame(&(), &gt(), &output()).unwrap();
        assert!(matches!(
            failing_run.finish(&path, &MetricAggregator::default()),
            Err(MetricsError::NoValidEstimates { total_frames: 1 })
        ));
        assert_eq!(store::read(&path).unwrap().records[0].point_count, 2);
        std::fs::remove_file(&path).unwrap();
    }
}
