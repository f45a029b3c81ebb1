//! Non-linear refinement of a planar camera estimate.
//!
//! The linear estimate minimises an algebraic error. This module polishes it
//! by minimising the pixel reprojection error over focal length, rotation and
//! translation with the `tiny_solver` Levenberg-Marquardt optimizer. The
//! principal point stays fixed at the image centre.

use crate::camera::Resolution;
use crate::extraction::Correspondences;
use crate::solver::{reprojection_rmse, PlanarPose};

use log::debug;
use nalgebra::{DVector, Rotation3, Vector2, Vector3};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

/// Reprojection residuals of a pinhole camera with square pixels and a fixed
/// principal point.
///
/// Parameter block `params`: `[f, rx, ry, rz, tx, ty, tz]` where `r` is the
/// world-to-camera rotation as an axis-angle vector.
#[derive(Debug, Clone)]
pub struct PlanarRefinementCost {
    points3d: Vec<Vector3<f64>>,
    points2d: Vec<Vector2<f64>>,
    cx: f64,
    cy: f64,
}

impl PlanarRefinementCost {
    pub fn new(correspondences: &Correspondences, resolution: &Resolution) -> Self {
        let (cx, cy) = resolution.center();
        PlanarRefinementCost {
            points3d: correspondences
                .points3d
                .column_iter()
                .map(|c| c.into_owned())
                .collect(),
            points2d: correspondences
                .points2d
                .column_iter()
                .map(|c| c.into_owned())
                .collect(),
            cx,
            cy,
        }
    }

    pub fn num_residuals(&self) -> usize {
        self.points2d.len() * 2
    }
}

/// Rotates `p` by the axis-angle vector `w` (Rodrigues).
fn rotate<T: nalgebra::RealField>(w: [T; 3], p: [T; 3]) -> [T; 3] {
    let [wx, wy, wz] = w;
    let [px, py, pz] = p;
    let theta2 = wx.clone() * wx.clone() + wy.clone() * wy.clone() + wz.clone() * wz.clone();

    // w × p
    let cross = |ax: T, ay: T, az: T| {
        [
            ay.clone() * pz.clone() - az.clone() * py.clone(),
            az * px.clone() - ax.clone() * pz.clone(),
            ax * py.clone() - ay * px.clone(),
        ]
    };

    if theta2 < nalgebra::convert::<f64, T>(f64::EPSILON) {
        let [cx, cy, cz] = cross(wx, wy, wz);
        return [px + cx, py + cy, pz + cz];
    }

    let theta = theta2.sqrt();
    let (kx, ky, kz) = (
        wx / theta.clone(),
        wy / theta.clone(),
        wz / theta.clone(),
    );
    let cos = theta.clone().cos();
    let sin = theta.sin();
    let one_minus_cos = T::one() - cos.clone();
    let k_dot_p = kx.clone() * px.clone() + ky.clone() * py.clone() + kz.clone() * pz.clone();
    let [cx, cy, cz] = cross(kx.clone(), ky.clone(), kz.clone());

    [
        px * cos.clone() + cx * sin.clone() + kx * k_dot_p.clone() * one_minus_cos.clone(),
        py * cos.clone() + cy * sin.clone() + ky * k_dot_p.clone() * one_minus_cos.clone(),
        pz * cos + cz * sin + kz * k_dot_p * one_minus_cos,
    ]
}

impl<T: nalgebra::RealField> Factor<T> for PlanarRefinementCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let p = &params[0];
        let f = p[0].clone();
        let w = [p[1].clone(), p[2].clone(), p[3].clone()];
        let t = [p[4].clone(), p[5].clone(), p[6].clone()];
        let cx = nalgebra::convert::<f64, T>(self.cx);
        let cy = nalgebra::convert::<f64, T>(self.cy);

        let mut residuals = DVector::zeros(self.num_residuals());
        for (i, (p3d, p2d)) in self.points3d.iter().zip(self.points2d.iter()).enumerate() {
            let world = [
                nalgebra::convert::<f64, T>(p3d.x),
                nalgebra::convert::<f64, T>(p3d.y),
                nalgebra::convert::<f64, T>(p3d.z),
            ];
            let [x, y, z] = rotate(w.clone(), world);
            let x = x + t[0].clone();
            let y = y + t[1].clone();
            let z = z + t[2].clone();

            let u = f.clone() * x / z.clone() + cx.clone();
            let v = f.clone() * y / z + cy.clone();

            residuals[i * 2] = u - nalgebra::convert::<f64, T>(p2d.x);
            residuals[i * 2 + 1] = v - nalgebra::convert::<f64, T>(p2d.y);
        }
        residuals
    }
}

/// Refines `initial` against `correspondences`.
///
/// Returns `None` when the optimizer fails or the result does not lower the
/// reprojection error, in which case the caller keeps the linear estimate.
pub fn refine_planar(
    initial: &PlanarPose,
    correspondences: &Correspondences,
    resolution: &Resolution,
) -> Option<PlanarPose> {
    if correspondences.is_empty() {
        return None;
    }

    let w = initial.rotation.scaled_axis();
    let t = initial.translation;
    let initial_params = DVector::from_vec(vec![initial.focal, w.x, w.y, w.z, t.x, t.y, t.z]);

    let cost = PlanarRefinementCost::new(correspondences, resolution);
    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(cost.num_residuals(), &["params"], Box::new(cost), None);

    let mut initial_values = HashMap::new();
    initial_values.insert("params".to_string(), initial_params);

    let optimizer = LevenbergMarquardtOptimizer::default();
    let result = optimizer.optimize(&problem, &initial_values, None)?;
    let params = result.get("params")?;
    if params.len() != 7 || params.iter().any(|v| !v.is_finite()) || params[0] <= 0.0 {
        debug!("Discarding refinement with invalid parameters");
        return None;
    }

    let refined = PlanarPose {
        focal: params[0],
        rotation: Rotation3::new(Vector3::new(params[1], params[2], params[3])),
        translation: Vector3::new(params[4], params[5], params[6]),
    };

    let before = reprojection_rmse(&initial.calib(resolution).ok()?, correspondences).ok()?;
    let after = reprojection_rmse(&refined.calib(resolution).ok()?, correspondences).ok()?;
    debug!("Refinement changed reprojection RMSE from {before:.4} px to {after:.4} px");
    (after <= before).then_some(refined)
}
