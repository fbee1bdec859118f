//! # Controllers
//!
//! Stateless value types that map current states and targets to velocity
//! batches. Each holds only its gains and limits, so the same inputs always
//! produce the same outputs.
//!
//! - **SiPositionController**: planar velocity toward a target point, saturated
//!   by magnitude (the controller the safety pipeline is built around)
//! - **ClfUnicyclePositionController**: unicycle command toward a target point
//! - **ClfUnicyclePoseController**: unicycle command toward a target pose

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::ArenaError;
use crate::structs::{limit_magnitudes, wrap_angle, Poses, Positions, Velocities};

/// Uniform call contract shared by every controller.
pub trait Controller {
    type State;
    type Target;

    fn control(&self, states: &Self::State, targets: &Self::Target) -> Result<Velocities, ArenaError>;
}

/// Single-integrator position controller with velocity saturation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiPositionController {
    pub x_velocity_gain: f64,
    pub y_velocity_gain: f64,
    pub velocity_magnitude_limit: f64,
}

impl Default for SiPositionController {
    fn default() -> Self {
        SiPositionController {
            x_velocity_gain: 1.0,
            y_velocity_gain: 1.0,
            velocity_magnitude_limit: 0.12,
        }
    }
}

impl SiPositionController {
    pub fn validate(&self) -> Result<(), ArenaError> {
        if !(self.velocity_magnitude_limit > 0.0) {
            return Err(ArenaError::configuration(format!(
                "velocity_magnitude_limit must be positive, got {}",
                self.velocity_magnitude_limit
            )));
        }
        Ok(())
    }
}

impl Controller for SiPositionController {
    type State = Positions;
    type Target = Positions;

    fn control(&self, current: &Positions, targets: &Positions) -> Result<Velocities, ArenaError> {
        ArenaError::check_columns("targets", current.ncols(), targets.ncols())?;

        let mut dxi = targets - current;
        dxi.row_mut(0).scale_mut(self.x_velocity_gain);
        dxi.row_mut(1).scale_mut(self.y_velocity_gain);
        limit_magnitudes(&mut dxi, self.velocity_magnitude_limit);
        Ok(dxi)
    }
}

/// Control-Lyapunov unicycle controller that drives agents to target points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClfUnicyclePositionController {
    pub linear_velocity_gain: f64,
    pub angular_velocity_gain: f64,
    pub velocity_magnitude_limit: f64,
    pub angular_velocity_limit: f64,
}

impl Default for ClfUnicyclePositionController {
    fn default() -> Self {
        ClfUnicyclePositionController {
            linear_velocity_gain: 0.8,
            angular_velocity_gain: 3.0,
            velocity_magnitude_limit: 0.15,
            angular_velocity_limit: PI,
        }
    }
}

/// Distance and wrapped bearing error from a pose to a target point.
fn distance_and_heading_error(x: f64, y: f64, theta: f64, target_x: f64, target_y: f64) -> (f64, f64) {
    let dx = target_x - x;
    let dy = target_y - y;
    let distance = dx.hypot(dy);
    let heading_error = wrap_angle(dy.atan2(dx) - theta);
    (distance, heading_error)
}

impl Controller for ClfUnicyclePositionController {
    type State = Poses;
    type Target = Positions;

    fn control(&self, states: &Poses, targets: &Positions) -> Result<Velocities, ArenaError> {
        ArenaError::check_columns("targets", states.ncols(), targets.ncols())?;

        let mut dxu = Velocities::zeros(states.ncols());
        for i in 0..states.ncols() {
            let (distance, heading_error) = distance_and_heading_error(
                states[(0, i)],
                states[(1, i)],
                states[(2, i)],
                targets[(0, i)],
                targets[(1, i)],
            );
            let v = self.linear_velocity_gain * distance * heading_error.cos();
            let w = self.angular_velocity_gain * heading_error;
            dxu[(0, i)] = v.clamp(-self.velocity_magnitude_limit, self.velocity_magnitude_limit);
            dxu[(1, i)] = w.clamp(-self.angular_velocity_limit, self.angular_velocity_limit);
        }
        Ok(dxu)
    }
}

/// Control-Lyapunov unicycle controller that drives agents to target poses.
///
/// Far from the target it steers like [`ClfUnicyclePositionController`]; once
/// within `position_error` it stops translating and rotates to the target heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClfUnicyclePoseController {
    pub linear_velocity_gain: f64,
    pub angular_velocity_gain: f64,
    pub rotation_error_gain: f64,
    pub velocity_magnitude_limit: f64,
    pub angular_velocity_limit: f64,
    pub position_error: f64,
}

impl Default for ClfUnicyclePoseController {
    fn default() -> Self {
        ClfUnicyclePoseController {
            linear_velocity_gain: 0.8,
            angular_velocity_gain: 3.0,
            rotation_error_gain: 0.4,
            velocity_magnitude_limit: 0.15,
            angular_velocity_limit: PI,
            position_error: 0.02,
        }
    }
}

impl Controller for ClfUnicyclePoseController {
    type State = Poses;
    type Target = Poses;

    fn control(&self, states: &Poses, targets: &Poses) -> Result<Velocities, ArenaError> {
        ArenaError::check_columns("targets", states.ncols(), targets.ncols())?;

        let mut dxu = Velocities::zeros(states.ncols());
        for i in 0..states.ncols() {
            let theta = states[(2, i)];
            let (distance, heading_error) = distance_and_heading_error(
                states[(0, i)],
                states[(1, i)],
                theta,
                targets[(0, i)],
                targets[(1, i)],
            );

            let (v, w) = if distance > self.position_error {
                (
                    self.linear_velocity_gain * distance * heading_error.cos(),
                    self.angular_velocity_gain * heading_error,
                )
            } else {
                let rotation_error = wrap_angle(targets[(2, i)] - theta);
                (0.0, self.rotation_error_gain * rotation_error)
            };
            dxu[(0, i)] = v.clamp(-self.velocity_magnitude_limit, self.velocity_magnitude_limit);
            dxu[(1, i)] = w.clamp(-self.angular_velocity_limit, self.angular_velocity_limit);
        }
        Ok(dxu)
    }
}
