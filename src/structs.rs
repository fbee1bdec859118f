//! # Core Data Structures
//!
//! Batches are column-per-agent matrices: column `i` always refers to agent `i`.
//!
//! - **Poses**: 3×N `[x; y; θ]`, heading normalized to (−π, π]
//! - **Positions**: 2×N `[x; y]`
//! - **Velocities**: 2×N, either planar `[vx; vy]` or unicycle `[v; ω]`
//! - **Arena**: the axis-aligned rectangle `[-x_max, x_max] × [-y_max, y_max]`

use nalgebra::{Matrix2xX, Matrix3xX, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

use crate::error::ArenaError;

pub type Poses = Matrix3xX<f64>;
pub type Positions = Matrix2xX<f64>;
pub type Velocities = Matrix2xX<f64>;

/// Distances below this are treated as coincident points.
pub const DISTANCE_FLOOR: f64 = 1e-6;

/// Wraps an angle into (−π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Extracts the `[x; y]` rows of a pose matrix.
pub fn positions_of(poses: &Poses) -> Positions {
    poses.fixed_rows::<2>(0).into_owned()
}

/// Rescales every column whose norm exceeds `limit` down to exactly `limit`.
pub fn limit_magnitudes(velocities: &mut Velocities, limit: f64) {
    for mut column in velocities.column_iter_mut() {
        let magnitude = column.norm();
        if magnitude > limit {
            column *= limit / magnitude;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Arena {
    pub x_max: f64,
    pub y_max: f64,
}

impl Default for Arena {
    fn default() -> Self {
        Arena {
            x_max: 1.6,
            y_max: 1.0,
        }
    }
}

impl Arena {
    pub fn new(x_max: f64, y_max: f64) -> Self {
        Arena { x_max, y_max }
    }

    pub fn validate(&self) -> Result<(), ArenaError> {
        if !(self.x_max > 0.0 && self.y_max > 0.0) {
            return Err(ArenaError::configuration(format!(
                "arena half-extents must be positive, got ({}, {})",
                self.x_max, self.y_max
            )));
        }
        Ok(())
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x.abs() <= self.x_max && y.abs() <= self.y_max
    }

    pub fn clamp(&self, x: f64, y: f64) -> Vector2<f64> {
        Vector2::new(
            x.clamp(-self.x_max, self.x_max),
            y.clamp(-self.y_max, self.y_max),
        )
    }
}
