//! # Control Loop Driver
//!
//! One tick of the safety pipeline:
//!
//! 1. read the current poses from the state store
//! 2. certify the desired planar velocities at the agents' positions
//! 3. convert the certified velocities to unicycle commands
//! 4. store the commands for every agent and step the state once
//!
//! The loop is single-threaded and strictly ordered; nothing runs between
//! the certificate and the step that could invalidate its guarantee.

use tracing::{debug, info};

use crate::barrier::BarrierCertificate;
use crate::dynamics::DynamicsConverter;
use crate::error::ArenaError;
use crate::state::ArenaState;
use crate::structs::{positions_of, Poses, Positions, Velocities};

/// What happened during a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Iteration count after the step
    pub iteration: u64,
    /// Coincident pairs the certificate could not separate this tick
    pub degenerate_pairs: Vec<(usize, usize)>,
}

pub struct ControlLoop<B, D> {
    state: ArenaState,
    barrier: B,
    converter: D,
    near_collision_events: usize,
}

impl<B, D> ControlLoop<B, D>
where
    B: BarrierCertificate<State = Positions>,
    D: DynamicsConverter,
{
    /// Wires the stages together, rejecting a certificate or converter whose
    /// parameters are invalid.
    pub fn new(state: ArenaState, barrier: B, converter: D) -> Result<Self, ArenaError> {
        barrier.validate()?;
        converter.validate()?;
        Ok(ControlLoop {
            state,
            barrier,
            converter,
            near_collision_events: 0,
        })
    }

    pub fn state(&self) -> &ArenaState {
        &self.state
    }

    pub fn barrier(&self) -> &B {
        &self.barrier
    }

    /// Total degenerate pairs reported across all ticks so far.
    pub fn near_collision_events(&self) -> usize {
        self.near_collision_events
    }

    /// Certifies `desired`, converts it and advances the state by one step.
    ///
    /// On error the state is left untouched.
    pub fn tick(&mut self, desired: &Velocities) -> Result<TickReport, ArenaError> {
        let poses = self.state.get_poses();
        let positions = positions_of(&poses);

        let certified = self.barrier.certify(desired, &positions)?;
        let commands = self.converter.convert(&certified.velocities, &poses)?;
        self.state.set_all_velocities(&commands)?;
        self.state.step();

        if !certified.degenerate_pairs.is_empty() {
            self.near_collision_events += certified.degenerate_pairs.len();
            debug!(
                iteration = self.state.iteration(),
                pairs = ?certified.degenerate_pairs,
                "coincident agents left uncorrected"
            );
        }

        Ok(TickReport {
            iteration: self.state.iteration(),
            degenerate_pairs: certified.degenerate_pairs,
        })
    }

    /// Runs `iterations` ticks, asking `scenario` for the desired velocities
    /// before each one.
    pub fn run<F>(&mut self, iterations: u64, mut scenario: F) -> Result<(), ArenaError>
    where
        F: FnMut(u64, &Poses) -> Velocities,
    {
        for _ in 0..iterations {
            let poses = self.state.get_poses();
            let desired = scenario(self.state.iteration(), &poses);
            self.tick(&desired)?;
        }
        info!(
            iterations = self.state.iteration(),
            near_collisions = self.near_collision_events,
            "control loop finished"
        );
        Ok(())
    }

    /// Hands back the state store, e.g. to export its history.
    pub fn into_state(self) -> ArenaState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::{QpBarrierCertificate, SiBarrierCertificate};
    use crate::config::SimulatorConfig;
    use crate::dynamics::SiToUnicycle;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn two_agents(left: Vector3<f64>, right: Vector3<f64>) -> ArenaState {
        let poses = Poses::from_columns(&[left, right]);
        ArenaState::new(2, Some(poses), SimulatorConfig::default()).unwrap()
    }

    #[test]
    fn test_tick_moves_free_agents_along_desired_velocity() {
        let state = two_agents(Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        let mut control = ControlLoop::new(state, SiBarrierCertificate::repulsion(), SiToUnicycle::default()).unwrap();

        let desired = Velocities::from_columns(&[Vector2::new(0.1, 0.0), Vector2::new(0.1, 0.0)]);
        let report = control.tick(&desired).unwrap();

        assert_eq!(report.iteration, 1);
        assert!(report.degenerate_pairs.is_empty());
        let poses = control.state().get_poses();
        assert_relative_eq!(poses[(0, 0)], -1.0 + 0.033 * 0.1, epsilon = 1e-12);
        assert_relative_eq!(poses[(0, 1)], 1.0 + 0.033 * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_tick_counts_coincident_pairs() {
        let state = two_agents(Vector3::new(0.2, 0.2, 0.0), Vector3::new(0.2, 0.2, 0.0));
        let mut control = ControlLoop::new(state, SiBarrierCertificate::repulsion(), SiToUnicycle::default()).unwrap();

        let report = control.tick(&Velocities::zeros(2)).unwrap();

        assert_eq!(report.degenerate_pairs, vec![(0, 1)]);
        assert_eq!(control.near_collision_events(), 1);
    }

    #[test]
    fn test_tick_rejects_wrong_width_without_stepping() {
        let state = two_agents(Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        let mut control = ControlLoop::new(state, SiBarrierCertificate::repulsion(), SiToUnicycle::default()).unwrap();

        let err = control.tick(&Velocities::zeros(3)).unwrap_err();

        assert!(matches!(err, ArenaError::ShapeMismatch { .. }));
        assert_eq!(control.state().iteration(), 0);
    }

    #[test]
    fn test_new_rejects_invalid_stages() {
        let state = two_agents(Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        let barrier = SiBarrierCertificate {
            safety_radius: -1.0,
            ..SiBarrierCertificate::repulsion()
        };
        let result = ControlLoop::new(state.clone(), barrier, SiToUnicycle::default());
        assert!(matches!(result, Err(ArenaError::Configuration(_))));

        let qp = QpBarrierCertificate {
            safety_radius: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            ControlLoop::new(state.clone(), qp, SiToUnicycle::default()),
            Err(ArenaError::Configuration(_))
        ));

        let converter = SiToUnicycle {
            angular_velocity_limit: -1.0,
            ..Default::default()
        };
        assert!(ControlLoop::new(state, SiBarrierCertificate::repulsion(), converter).is_err());
    }

    #[test]
    fn test_run_calls_scenario_once_per_iteration() {
        let state = two_agents(Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        let mut control = ControlLoop::new(state, SiBarrierCertificate::repulsion(), SiToUnicycle::default()).unwrap();

        let mut seen = Vec::new();
        control
            .run(5, |iteration, poses| {
                seen.push(iteration);
                Velocities::zeros(poses.ncols())
            })
            .unwrap();

        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(control.into_state().history().len(), 6);
    }
}
