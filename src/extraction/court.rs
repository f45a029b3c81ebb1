//! Floor landmarks of a FIBA basketball court.
//!
//! World frame: origin at a court corner, `X` along the 28 m length, `Y`
//! along the 15 m width, `Z` up. All landmarks lie on the floor, `Z = 0`.

use nalgebra::Vector3;

pub const COURT_LENGTH: f64 = 28.0;
pub const COURT_WIDTH: f64 = 15.0;
pub const CENTER_CIRCLE_RADIUS: f64 = 1.8;
pub const LANE_WIDTH: f64 = 4.9;
pub const LANE_LENGTH: f64 = 5.8;

/// The 16 line intersections a keypoint model is trained to detect, in
/// channel order.
pub fn basketball_landmarks() -> Vec<Vector3<f64>> {
    let mid_x = COURT_LENGTH / 2.0;
    let mid_y = COURT_WIDTH / 2.0;
    let lane_lo = mid_y - LANE_WIDTH / 2.0;
    let lane_hi = mid_y + LANE_WIDTH / 2.0;

    vec![
        // Corners
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(COURT_LENGTH, 0.0, 0.0),
        Vector3::new(COURT_LENGTH, COURT_WIDTH, 0.0),
        Vector3::new(0.0, COURT_WIDTH, 0.0),
        // Centre line with side lines and centre circle
        Vector3::new(mid_x, 0.0, 0.0),
        Vector3::new(mid_x, COURT_WIDTH, 0.0),
        Vector3::new(mid_x, mid_y - CENTER_CIRCLE_RADIUS, 0.0),
        Vector3::new(mid_x, mid_y + CENTER_CIRCLE_RADIUS, 0.0),
        // Left restricted area
        Vector3::new(0.0, lane_lo, 0.0),
        Vector3::new(0.0, lane_hi, 0.0),
        Vector3::new(LANE_LENGTH, lane_lo, 0.0),
        Vector3::new(LANE_LENGTH, lane_hi, 0.0),
        // Right restricted area
        Vector3::new(COURT_LENGTH, lane_lo, 0.0),
        Vector3::new(COURT_LENGTH, lane_hi, 0.0),
        Vector3::new(COURT_LENGTH - LANE_LENGTH, lane_lo, 0.0),
        Vector3::new(COURT_LENGTH - LANE_LENGTH, lane_hi, 0.0),
    ]
}
