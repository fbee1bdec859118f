//! Simulator configuration.
//!
//! Every instance carries its own copy, so independent simulations with
//! different limits can coexist in one process.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::ArenaError;
use crate::structs::Arena;

/// Configuration for the kinematic state store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Integration step in seconds (~30 Hz)
    pub time_step: f64,

    /// Linear speed limit applied to stored commands, m/s
    pub max_linear_velocity: f64,

    /// Angular rate limit applied to stored commands, rad/s
    pub max_angular_velocity: f64,

    /// Arena the poses are clamped into
    pub arena: Arena,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            time_step: 0.033,
            max_linear_velocity: 0.2,
            max_angular_velocity: PI,
            arena: Arena::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ArenaError> {
        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(ArenaError::configuration(format!(
                "time_step must be positive, got {}",
                self.time_step
            )));
        }
        if !(self.max_linear_velocity >= 0.0) || !(self.max_angular_velocity >= 0.0) {
            return Err(ArenaError::configuration(
                "velocity limits must be non-negative",
            ));
        }
        self.arena.validate()
    }

    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ArenaError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ArenaError::configuration(format!("invalid simulator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_robotarium() {
        let config = SimulatorConfig::default();
        assert_eq!(config.time_step, 0.033);
        assert_eq!(config.max_linear_velocity, 0.2);
        assert_eq!(config.max_angular_velocity, PI);
        assert_eq!(config.arena, Arena::new(1.6, 1.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_time_step() {
        let config = SimulatorConfig {
            time_step: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ArenaError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_negative_limits() {
        let config = SimulatorConfig {
            max_linear_velocity: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SimulatorConfig::from_json(r#"{ "time_step": 0.01, "arena": { "x_max": 2.0 } }"#).unwrap();
        assert_eq!(config.time_step, 0.01);
        assert_eq!(config.arena.x_max, 2.0);
        assert_eq!(config.arena.y_max, 1.0);
        assert_eq!(config.max_linear_velocity, 0.2);
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        assert!(SimulatorConfig::from_json(r#"{ "time_step": -1.0 }"#).is_err());
        assert!(SimulatorConfig::from_json("not json").is_err());
    }
}
