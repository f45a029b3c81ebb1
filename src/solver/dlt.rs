//! Direct linear transform estimators.
//!
//! All estimators normalise their inputs (Hartley) before building the design
//! matrix and solve `A x = 0` with an SVD, taking the right singular vector of
//! the smallest singular value. A second near-zero singular value means the
//! solution is not unique and the configuration is reported as degenerate.

use crate::camera::{Calib, ProjectionMatrix, Resolution};
use crate::extraction::Correspondences;
use crate::geometry::{normalize_points_2d, normalize_points_3d};
use crate::solver::{SolveError, MIN_GENERAL_POINTS, MIN_PLANAR_POINTS};
use nalgebra::{DMatrix, DVector, Matrix2xX, Matrix3, Matrix3x4, Rotation3, Vector3};

/// Relative size below which the second smallest singular value counts as zero.
const RANK_TOLERANCE: f64 = 1e-8;

/// Largest focal length accepted, in units of the longer image side.
const MAX_FOCAL_RATIO: f64 = 1e3;

/// A camera with square pixels and the principal point at the image centre.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarPose {
    pub focal: f64,
    /// World-to-camera rotation.
    pub rotation: Rotation3<f64>,
    /// World-to-camera translation.
    pub translation: Vector3<f64>,
}

impl PlanarPose {
    pub fn intrinsics(&self, resolution: &Resolution) -> Matrix3<f64> {
        let (cx, cy) = resolution.center();
        Matrix3::new(self.focal, 0.0, cx, 0.0, self.focal, cy, 0.0, 0.0, 1.0)
    }

    pub fn calib(&self, resolution: &Resolution) -> Result<Calib, SolveError> {
        let k = self.intrinsics(resolution);
        Ok(Calib::from_krt(
            &k,
            &self.rotation,
            &self.translation,
            *resolution,
        )?)
    }

    pub fn projection(&self, resolution: &Resolution) -> Result<ProjectionMatrix, SolveError> {
        Ok(self.calib(resolution)?.projection)
    }
}

/// Right singular vector of the smallest singular value of `a`.
fn null_vector(a: DMatrix<f64>) -> Result<DVector<f64>, SolveError> {
    let mut a_work = a;
    if a_work.nrows() < a_work.ncols() {
        let rows = a_work.nrows();
        let cols = a_work.ncols();
        let mut a_pad = DMatrix::<f64>::zeros(cols, cols);
        a_pad.view_mut((0, 0), (rows, cols)).copy_from(&a_work);
        a_work = a_pad;
    }

    let svd = a_work.svd(true, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| SolveError::NumericalError("SVD did not produce V^T".to_string()))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[i].total_cmp(&svd.singular_values[j]));
    let smallest = order[0];
    let second = svd.singular_values[order[1]];
    let largest = svd.singular_values[order[order.len() - 1]];
    if !largest.is_finite() || second <= RANK_TOLERANCE * largest {
        return Err(SolveError::DegenerateConfiguration(
            "correspondences do not determine a unique solution".to_string(),
        ));
    }

    Ok(v_t.row(smallest).transpose())
}

/// Estimates `H` with `image ~ H world` from planar world coordinates (2×N)
/// and pixel coordinates (2×N).
pub fn estimate_homography(
    world: &Matrix2xX<f64>,
    image: &Matrix2xX<f64>,
) -> Result<Matrix3<f64>, SolveError> {
    let n = world.ncols();
    if image.ncols() != n {
        return Err(SolveError::MismatchedPoints {
            points2d: image.ncols(),
            points3d: n,
        });
    }
    if n < MIN_PLANAR_POINTS {
        return Err(SolveError::InsufficientPoints {
            found: n,
            required: MIN_PLANAR_POINTS,
        });
    }

    let (world_n, t_w) = normalize_points_2d(world).ok_or_else(|| {
        SolveError::DegenerateConfiguration("world points coincide".to_string())
    })?;
    let (image_n, t_i) = normalize_points_2d(image).ok_or_else(|| {
        SolveError::DegenerateConfiguration("image points coincide".to_string())
    })?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let (x, y) = (world_n[(0, i)], world_n[(1, i)]);
        let (u, v) = (image_n[(0, i)], image_n[(1, i)]);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h = null_vector(a)?;
    let h_n = Matrix3::from_row_slice(h.as_slice());
    let t_i_inv = t_i
        .try_inverse()
        .ok_or_else(|| SolveError::NumericalError("image normalisation not invertible".to_string()))?;
    Ok(t_i_inv * h_n * t_w)
}

/// Recovers focal length and pose from landmarks lying on the plane
/// `Z = height`.
///
/// With square pixels, zero skew and the principal point at the image centre
/// the image of the absolute conic is `diag(1/f², 1/f², 1)`. The two
/// homography columns must be orthogonal and of equal length under it, which
/// gives two linear equations in `1/f²`, solved in the least-squares sense.
pub fn planar_pose(
    correspondences: &Correspondences,
    resolution: &Resolution,
    height: f64,
) -> Result<PlanarPose, SolveError> {
    let world: Matrix2xX<f64> = correspondences.points3d.fixed_rows::<2>(0).into_owned();
    let h = estimate_homography(&world, &correspondences.points2d)?;

    let (cx, cy) = resolution.center();
    let s = resolution.width.max(resolution.height) as f64;
    let to_centered = Matrix3::new(
        1.0 / s,
        0.0,
        -cx / s,
        0.0,
        1.0 / s,
        -cy / s,
        0.0,
        0.0,
        1.0,
    );
    let a = to_centered * h;
    let a = a / a.norm();

    let (h11, h12) = (a[(0, 0)], a[(0, 1)]);
    let (h21, h22) = (a[(1, 0)], a[(1, 1)]);
    let (h31, h32) = (a[(2, 0)], a[(2, 1)]);
    let constraints = [
        (h11 * h12 + h21 * h22, h31 * h32),
        (
            h11 * h11 + h21 * h21 - h12 * h12 - h22 * h22,
            h31 * h31 - h32 * h32,
        ),
    ];
    let denom: f64 = constraints.iter().map(|(c, _)| c * c).sum();
    let numer: f64 = constraints.iter().map(|(c, d)| c * d).sum();
    if denom <= f64::EPSILON {
        return Err(SolveError::DegenerateConfiguration(
            "focal length is not observable from this view".to_string(),
        ));
    }
    let inv_f2 = -numer / denom;
    if !(inv_f2 * MAX_FOCAL_RATIO * MAX_FOCAL_RATIO > 1.0) || !inv_f2.is_finite() {
        return Err(SolveError::DegenerateConfiguration(format!(
            "recovered focal length is not real (1/f^2 = {inv_f2})"
        )));
    }
    let f_n = 1.0 / inv_f2.sqrt();

    let k_inv = Matrix3::new(1.0 / f_n, 0.0, 0.0, 0.0, 1.0 / f_n, 0.0, 0.0, 0.0, 1.0);
    let m = k_inv * a;
    let (m1, m2, m3): (Vector3<f64>, Vector3<f64>, Vector3<f64>) = (
        m.column(0).into_owned(),
        m.column(1).into_owned(),
        m.column(2).into_owned(),
    );
    let norm_sum = m1.norm() + m2.norm();
    if norm_sum <= f64::EPSILON {
        return Err(SolveError::NumericalError(
            "homography columns vanish".to_string(),
        ));
    }
    let mut lambda = 2.0 / norm_sum;

    // Put the landmarks in front of the camera.
    let centroid = world.column_mean();
    let depth = lambda * (m1.z * centroid.x + m2.z * centroid.y + m3.z);
    if depth < 0.0 {
        lambda = -lambda;
    }
    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let t_plane = m3 * lambda;
    let r3 = r1.cross(&r2);

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| SolveError::NumericalError("SVD did not produce U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| SolveError::NumericalError("SVD did not produce V^T".to_string()))?;
    let r = u * v_t;
    if r.determinant() <= 0.0 {
        return Err(SolveError::DegenerateConfiguration(
            "recovered rotation is a reflection".to_string(),
        ));
    }

    // The homography was estimated in plane coordinates; move Z back to `height`.
    let translation = t_plane - r.column(2) * height;

    Ok(PlanarPose {
        focal: f_n * s,
        rotation: Rotation3::from_matrix_unchecked(r),
        translation,
    })
}

/// Full 3×4 normalised DLT from non-coplanar landmarks.
///
/// The result is scaled so that the third row of the left 3×3 block has unit
/// norm and that block has a positive determinant.
pub fn estimate_projection(
    correspondences: &Correspondences,
) -> Result<ProjectionMatrix, SolveError> {
    let n = correspondences.len();
    if n < MIN_GENERAL_POINTS {
        return Err(SolveError::InsufficientPoints {
            found: n,
            required: MIN_GENERAL_POINTS,
        });
    }

    let (image_n, t_2) = normalize_points_2d(&correspondences.points2d).ok_or_else(|| {
        SolveError::DegenerateConfiguration("image points coincide".to_string())
    })?;
    let (world_n, t_3) = normalize_points_3d(&correspondences.points3d).ok_or_else(|| {
        SolveError::DegenerateConfiguration("world points coincide".to_string())
    })?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for i in 0..n {
        let x = [world_n[(0, i)], world_n[(1, i)], world_n[(2, i)], 1.0];
        let (u, v) = (image_n[(0, i)], image_n[(1, i)]);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        for (j, xj) in x.iter().enumerate() {
            a[(r0, j)] = *xj;
            a[(r0, 8 + j)] = -u * xj;
            a[(r1, 4 + j)] = *xj;
            a[(r1, 8 + j)] = -v * xj;
        }
    }

    let p = null_vector(a)?;
    let p_n = Matrix3x4::from_row_slice(p.as_slice());
    let t_2_inv = t_2
        .try_inverse()
        .ok_or_else(|| SolveError::NumericalError("image normalisation not invertible".to_string()))?;
    let mut p_full = t_2_inv * p_n * t_3;

    let left = p_full.fixed_view::<3, 3>(0, 0).into_owned();
    let det = left.determinant();
    let row_norm = left.row(2).norm();
    if det.abs() <= f64::EPSILON || row_norm <= f64::EPSILON {
        return Err(SolveError::DegenerateConfiguration(
            "estimated camera has a singular left block".to_string(),
        ));
    }
    p_full /= det.signum() * row_norm;

    Ok(ProjectionMatrix::new(p_full)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::synthetic::broadcast_camera;
    use crate::extraction::court::basketball_landmarks;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3xX, Vector2};

    fn resolution() -> Resolution {
        Resolution::new(1920, 1080)
    }

    fn camera() -> Calib {
        broadcast_camera(resolution(), 1600.0, Vector3::new(14.0, -9.0, 7.0), 0.55).unwrap()
    }

    #[test]
    fn test_homography_maps_square() {
        let world = Matrix2xX::from_columns(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(0.0, 1.0),
        ]);
        let image = Matrix2xX::from_columns(&[
            Vector2::new(100.0, 100.0),
            Vector2::new(300.0, 120.0),
            Vector2::new(280.0, 330.0),
            Vector2::new(90.0, 310.0),
        ]);
        let h = estimate_homography(&world, &image).unwrap();
        for i in 0..4 {
            let p = h * Vector3::new(world[(0, i)], world[(1, i)], 1.0);
            assert_relative_eq!(p.x / p.z, image[(0, i)], epsilon = 1e-8);
            assert_relative_eq!(p.y / p.z, image[(1, i)], epsilon = 1e-8);
        }
    }

    #[test]
    fn test_planar_pose_recovers_focal_and_center() {
        let gt = camera();
        let world = Matrix3xX::from_columns(&basketball_landmarks());
        let pixels = gt.project_3d_to_2d(&world).unwrap();
        let corr = Correspondences::new(pixels, world).unwrap();

        let pose = planar_pose(&corr, &resolution(), 0.0).unwrap();
        assert_relative_eq!(pose.focal, 1600.0, epsilon = 1e-6, max_relative = 1e-8);
        let center = -(pose.rotation.inverse() * pose.translation);
        assert_relative_eq!(center, Vector3::new(14.0, -9.0, 7.0), epsilon = 1e-6);
    }

    #[test]
    fn test_planar_pose_on_raised_plane() {
        let gt = camera();
        let world: Vec<Vector3<f64>> = basketball_landmarks()
            .into_iter()
            .map(|p| Vector3::new(p.x, p.y, 1.0))
            .collect();
        let world = Matrix3xX::from_columns(&world);
        let pixels = gt.project_3d_to_2d(&world).unwrap();
        let corr = Correspondences::new(pixels.clone(), world.clone()).unwrap();

        let pose = planar_pose(&corr, &resolution(), 1.0).unwrap();
        let calib = pose.calib(&resolution()).unwrap();
        let reprojected = calib.project_3d_to_2d(&world).unwrap();
        assert_relative_eq!(reprojected, pixels, epsilon = 1e-6);
    }

    #[test]
    fn test_general_dlt_from_volume_points() {
        let gt = camera();
        let mut world: Vec<Vector3<f64>> = basketball_landmarks();
        // Rim centres and backboard corners give height.
        world.push(Vector3::new(1.575, 7.5, 3.05));
        world.push(Vector3::new(26.425, 7.5, 3.05));
        world.push(Vector3::new(1.2, 6.6, 3.95));
        world.push(Vector3::new(26.8, 8.4, 2.9));
        let world = Matrix3xX::from_columns(&world);
        let pixels = gt.project_3d_to_2d(&world).unwrap();
        let corr = Correspondences::new(pixels.clone(), world.clone()).unwrap();

        let p = estimate_projection(&corr).unwrap();
        let calib = Calib::from_matrix(p, 1920, 1080);
        let reprojected = calib.project_3d_to_2d(&world).unwrap();
        assert_relative_eq!(reprojected, pixels, epsilon = 1e-5);
        assert_relative_eq!(
            calib.camera_center().unwrap(),
            Vector3::new(14.0, -9.0, 7.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_general_dlt_rejects_coplanar_points() {
        let gt = camera();
        let world = Matrix3xX::from_columns(&basketball_landmarks());
        let pixels = gt.project_3d_to_2d(&world).unwrap();
        let corr = Correspondences::new(pixels, world).unwrap();
        assert!(matches!(
            estimate_projection(&corr),
            Err(SolveError::DegenerateConfiguration(_))
        ));
    }

    #[test]
    fn test_fronto_parallel_view_has_no_focal() {
        // Camera straight above the court: orthogonality constraints vanish.
        let res = resolution();
        let gt = broadcast_camera(
            res,
            1600.0,
            Vector3::new(14.0, 7.5, 30.0),
            std::f64::consts::FRAC_PI_2,
        )
        .unwrap();
        let world = Matrix3xX::from_columns(&basketball_landmarks());
        let pixels = gt.project_3d_to_2d(&world).unwrap();
        let corr = Correspondences::new(pixels, world).unwrap();
        assert!(matches!(
            planar_pose(&corr, &res, 0.0),
            Err(SolveError::DegenerateConfiguration(_))
        ));
    }
}
