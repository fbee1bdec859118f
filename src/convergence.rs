//! Arrival checks used by scenario code to advance between waypoints.

use crate::error::ArenaError;
use crate::structs::{wrap_angle, Poses, Positions};

/// Default position tolerance, metres.
pub const POSITION_ERROR: f64 = 0.05;
/// Default heading tolerance, radians.
pub const ROTATION_ERROR: f64 = 0.2;

/// Per agent: whether it is within `position_error` of its target point.
pub fn at_position(states: &Poses, targets: &Positions, position_error: f64) -> Result<Vec<bool>, ArenaError> {
    ArenaError::check_columns("targets", states.ncols(), targets.ncols())?;
    Ok((0..states.ncols())
        .map(|i| {
            let dx = states[(0, i)] - targets[(0, i)];
            let dy = states[(1, i)] - targets[(1, i)];
            dx.hypot(dy) < position_error
        })
        .collect())
}

/// Per agent: whether it is within `position_error` of the target point and
/// within `rotation_error` of the target heading.
pub fn at_pose(
    states: &Poses,
    targets: &Poses,
    position_error: f64,
    rotation_error: f64,
) -> Result<Vec<bool>, ArenaError> {
    ArenaError::check_columns("targets", states.ncols(), targets.ncols())?;
    Ok((0..states.ncols())
        .map(|i| {
            let dx = states[(0, i)] - targets[(0, i)];
            let dy = states[(1, i)] - targets[(1, i)];
            let heading = wrap_angle(states[(2, i)] - targets[(2, i)]).abs();
            dx.hypot(dy) < position_error && heading < rotation_error
        })
        .collect())
}
