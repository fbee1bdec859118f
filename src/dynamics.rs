//! # Dynamics Converters
//!
//! Mappings between planar single-integrator velocities `[vx; vy]` and the
//! unicycle commands `[v; ω]` the state store consumes. All converters act on
//! each column independently.
//!
//! The projection-based pair is a near-identity diffeomorphism: a point held
//! `p` metres ahead of the wheel axle moves with
//!
//! ```text
//! vx = v·cosθ − p·ω·sinθ
//! vy = v·sinθ + p·ω·cosθ
//! ```
//!
//! and the inverse recovers `(v, ω)` exactly for any `p > 0`.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::ArenaError;
use crate::structs::{wrap_angle, Poses, Velocities, DISTANCE_FLOOR};

/// Uniform call contract shared by every converter.
pub trait DynamicsConverter {
    fn validate(&self) -> Result<(), ArenaError> {
        Ok(())
    }

    fn convert(&self, input: &Velocities, poses: &Poses) -> Result<Velocities, ArenaError>;
}

/// Planar velocity of the point `p` ahead of an agent driving with `(v, ω)`.
pub fn unicycle_to_si(v: f64, w: f64, theta: f64, projection_distance: f64) -> Vector2<f64> {
    let (s, c) = theta.sin_cos();
    Vector2::new(
        v * c - projection_distance * w * s,
        v * s + projection_distance * w * c,
    )
}

/// Inverse of [`unicycle_to_si`]; the projection distance is floored away from zero.
pub fn si_to_unicycle_projected(vx: f64, vy: f64, theta: f64, projection_distance: f64) -> Vector2<f64> {
    let (s, c) = theta.sin_cos();
    Vector2::new(
        c * vx + s * vy,
        (-s * vx + c * vy) / projection_distance.max(DISTANCE_FLOOR),
    )
}

fn check_limits(linear_velocity_gain: f64, angular_velocity_limit: f64) -> Result<(), ArenaError> {
    if !linear_velocity_gain.is_finite() || !(angular_velocity_limit >= 0.0) {
        return Err(ArenaError::configuration(format!(
            "linear_velocity_gain must be finite and angular_velocity_limit non-negative, got ({linear_velocity_gain}, {angular_velocity_limit})"
        )));
    }
    Ok(())
}

fn check_projection(projection_distance: f64) -> Result<(), ArenaError> {
    if !(projection_distance > 0.0 && projection_distance.is_finite()) {
        return Err(ArenaError::configuration(format!(
            "projection_distance must be positive, got {projection_distance}"
        )));
    }
    Ok(())
}

/// Heading-tracking conversion: drive at the planar speed, turn toward its direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiToUnicycle {
    pub linear_velocity_gain: f64,
    pub angular_velocity_limit: f64,
}

impl Default for SiToUnicycle {
    fn default() -> Self {
        SiToUnicycle {
            linear_velocity_gain: 1.0,
            angular_velocity_limit: PI,
        }
    }
}

impl SiToUnicycle {
    /// Wrapped difference between the direction of `(vx, vy)` and `theta`.
    pub fn heading_error(vx: f64, vy: f64, theta: f64) -> f64 {
        wrap_angle(vy.atan2(vx) - theta)
    }
}

impl DynamicsConverter for SiToUnicycle {
    fn validate(&self) -> Result<(), ArenaError> {
        check_limits(self.linear_velocity_gain, self.angular_velocity_limit)
    }

    fn convert(&self, dxi: &Velocities, poses: &Poses) -> Result<Velocities, ArenaError> {
        ArenaError::check_columns("planar velocities", poses.ncols(), dxi.ncols())?;

        let mut dxu = Velocities::zeros(dxi.ncols());
        for i in 0..dxi.ncols() {
            let (vx, vy) = (dxi[(0, i)], dxi[(1, i)]);
            let heading_error = Self::heading_error(vx, vy, poses[(2, i)]);
            dxu[(0, i)] = vx.hypot(vy) * self.linear_velocity_gain;
            dxu[(1, i)] = (2.0 * heading_error).clamp(-self.angular_velocity_limit, self.angular_velocity_limit);
        }
        Ok(dxu)
    }
}

/// Exact inverse of [`UnicycleToSi`], with the angular rate clamped.
///
/// Suited to runs where a unicycle barrier certificate projects agents by the
/// same distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiToUnicycleDiffeomorphic {
    pub linear_velocity_gain: f64,
    pub angular_velocity_limit: f64,
    pub projection_distance: f64,
}

impl Default for SiToUnicycleDiffeomorphic {
    fn default() -> Self {
        SiToUnicycleDiffeomorphic {
            linear_velocity_gain: 1.0,
            angular_velocity_limit: PI,
            projection_distance: 0.05,
        }
    }
}

impl DynamicsConverter for SiToUnicycleDiffeomorphic {
    fn validate(&self) -> Result<(), ArenaError> {
        check_limits(self.linear_velocity_gain, self.angular_velocity_limit)?;
        check_projection(self.projection_distance)
    }

    fn convert(&self, dxi: &Velocities, poses: &Poses) -> Result<Velocities, ArenaError> {
        ArenaError::check_columns("planar velocities", poses.ncols(), dxi.ncols())?;

        let mut dxu = Velocities::zeros(dxi.ncols());
        for i in 0..dxi.ncols() {
            let command = si_to_unicycle_projected(dxi[(0, i)], dxi[(1, i)], poses[(2, i)], self.projection_distance);
            dxu[(0, i)] = command.x * self.linear_velocity_gain;
            dxu[(1, i)] = command.y.clamp(-self.angular_velocity_limit, self.angular_velocity_limit);
        }
        Ok(dxu)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnicycleToSi {
    pub projection_distance: f64,
}

impl Default for UnicycleToSi {
    fn default() -> Self {
        UnicycleToSi {
            projection_distance: 0.05,
        }
    }
}

impl DynamicsConverter for UnicycleToSi {
    fn validate(&self) -> Result<(), ArenaError> {
        check_projection(self.projection_distance)
    }

    fn convert(&self, dxu: &Velocities, poses: &Poses) -> Result<Velocities, ArenaError> {
        ArenaError::check_columns("unicycle commands", poses.ncols(), dxu.ncols())?;

        let mut dxi = Velocities::zeros(dxu.ncols());
        for i in 0..dxu.ncols() {
            let planar = unicycle_to_si(dxu[(0, i)], dxu[(1, i)], poses[(2, i)], self.projection_distance);
            dxi.set_column(i, &planar);
        }
        Ok(dxi)
    }
}
