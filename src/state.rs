//! # Kinematic State Store
//!
//! Owns the pose of every agent, the pending unicycle command per agent and
//! the pose history. `step()` advances all agents at once by one Euler step of
//! unicycle kinematics:
//!
//! ```text
//! x += Δt·v·cos θ
//! y += Δt·v·sin θ
//! θ += Δt·ω        (then wrapped into (−π, π])
//! ```
//!
//! followed by a hard clamp of (x, y) into the arena.

use tracing::trace;

use crate::config::SimulatorConfig;
use crate::error::ArenaError;
use crate::structs::{wrap_angle, Poses, Velocities};

#[derive(Debug, Clone)]
pub struct ArenaState {
    config: SimulatorConfig,
    poses: Poses,
    /// Last stored `[v; ω]` per agent, consumed by every `step()`
    commands: Velocities,
    history: Vec<Poses>,
    iteration: u64,
}

impl ArenaState {
    /// Creates state for `number_of_agents` agents.
    ///
    /// Without `initial_poses` every agent starts at the origin facing +x.
    /// A pose matrix with the wrong number of columns is rejected, never reshaped.
    pub fn new(
        number_of_agents: usize,
        initial_poses: Option<Poses>,
        config: SimulatorConfig,
    ) -> Result<Self, ArenaError> {
        config.validate()?;
        if number_of_agents == 0 {
            return Err(ArenaError::configuration("number of agents must be positive"));
        }

        let mut poses = match initial_poses {
            Some(poses) => {
                ArenaError::check_columns("initial poses", number_of_agents, poses.ncols())?;
                poses
            }
            None => Poses::zeros(number_of_agents),
        };
        for i in 0..number_of_agents {
            poses[(2, i)] = wrap_angle(poses[(2, i)]);
        }

        Ok(ArenaState {
            config,
            commands: Velocities::zeros(number_of_agents),
            history: vec![poses.clone()],
            poses,
            iteration: 0,
        })
    }

    pub fn number_of_agents(&self) -> usize {
        self.poses.ncols()
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn time_step(&self) -> f64 {
        self.config.time_step
    }

    /// Number of completed steps.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Simulated time in seconds.
    pub fn elapsed(&self) -> f64 {
        self.iteration as f64 * self.config.time_step
    }

    /// Returns a copy of the current 3×N pose matrix.
    pub fn get_poses(&self) -> Poses {
        self.poses.clone()
    }

    pub fn pending_commands(&self) -> &Velocities {
        &self.commands
    }

    /// Stores clamped unicycle commands for the agents in `indices`.
    ///
    /// Column `k` of `commands` goes to agent `indices[k]`. Agents not listed
    /// keep whatever command they had before.
    pub fn set_velocities(&mut self, indices: &[usize], commands: &Velocities) -> Result<(), ArenaError> {
        ArenaError::check_columns("velocity commands", indices.len(), commands.ncols())?;
        let agents = self.number_of_agents();
        if let Some(&index) = indices.iter().find(|&&index| index >= agents) {
            return Err(ArenaError::IndexOutOfRange { index, agents });
        }

        let v_max = self.config.max_linear_velocity;
        let w_max = self.config.max_angular_velocity;
        for (k, &index) in indices.iter().enumerate() {
            self.commands[(0, index)] = commands[(0, k)].clamp(-v_max, v_max);
            self.commands[(1, index)] = commands[(1, k)].clamp(-w_max, w_max);
        }
        Ok(())
    }

    /// Stores commands for every agent, in column order.
    pub fn set_all_velocities(&mut self, commands: &Velocities) -> Result<(), ArenaError> {
        let indices: Vec<usize> = (0..self.number_of_agents()).collect();
        self.set_velocities(&indices, commands)
    }

    /// Integrates every agent forward by one time step and records the result.
    pub fn step(&mut self) {
        let dt = self.config.time_step;
        let arena = self.config.arena;

        for i in 0..self.number_of_agents() {
            let theta = self.poses[(2, i)];
            let v = self.commands[(0, i)];
            let w = self.commands[(1, i)];

            let x = self.poses[(0, i)] + dt * v * theta.cos();
            let y = self.poses[(1, i)] + dt * v * theta.sin();
            let clamped = arena.clamp(x, y);

            self.poses[(0, i)] = clamped.x;
            self.poses[(1, i)] = clamped.y;
            self.poses[(2, i)] = wrap_angle(theta + dt * w);
        }

        self.iteration += 1;
        self.history.push(self.poses.clone());
        trace!(iteration = self.iteration, "state stepped");
    }

    /// Pose snapshots: the initial poses followed by one entry per step.
    pub fn history(&self) -> &[Poses] {
        &self.history
    }

    /// Moves the recorded history out, leaving only the current poses behind.
    pub fn take_history(&mut self) -> Vec<Poses> {
        let current = vec![self.poses.clone()];
        std::mem::replace(&mut self.history, current)
    }

    /// Matches the Robotarium script epilogue; the simulator has nothing to flush.
    pub fn call_at_scripts_end(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Arena;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn two_agents() -> ArenaState {
        let poses = Poses::from_columns(&[Vector3::new(-0.4, 0.0, 0.0), Vector3::new(0.4, 0.0, PI)]);
        ArenaState::new(2, Some(poses), SimulatorConfig::default()).unwrap()
    }

    #[test]
    fn test_new_defaults_to_origin() {
        let state = ArenaState::new(3, None, SimulatorConfig::default()).unwrap();
        assert_eq!(state.get_poses(), Poses::zeros(3));
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.iteration(), 0);
    }

    #[test]
    fn test_new_rejects_wrong_shape() {
        let poses = Poses::zeros(2);
        let err = ArenaState::new(3, Some(poses), SimulatorConfig::default()).unwrap_err();
        assert!(matches!(err, ArenaError::ShapeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_new_rejects_zero_agents_and_bad_config() {
        assert!(ArenaState::new(0, None, SimulatorConfig::default()).is_err());
        let config = SimulatorConfig {
            time_step: -0.1,
            ..Default::default()
        };
        assert!(ArenaState::new(1, None, config).is_err());
    }

    #[test]
    fn test_get_poses_is_a_copy() {
        let state = two_agents();
        let mut poses = state.get_poses();
        poses[(0, 0)] = 99.0;
        assert_eq!(state.get_poses()[(0, 0)], -0.4);
    }

    #[test]
    fn test_set_velocities_shape_checked() {
        let mut state = two_agents();
        let err = state.set_velocities(&[0, 1], &Velocities::zeros(1)).unwrap_err();
        assert!(matches!(err, ArenaError::ShapeMismatch { .. }));
        let err = state.set_velocities(&[2], &Velocities::zeros(1)).unwrap_err();
        assert_eq!(err, ArenaError::IndexOutOfRange { index: 2, agents: 2 });
    }

    #[test]
    fn test_set_velocities_clamps() {
        let mut state = two_agents();
        let commands = Velocities::from_columns(&[Vector2::new(1.0, -10.0), Vector2::new(-1.0, 0.5)]);
        state.set_velocities(&[0, 1], &commands).unwrap();
        let pending = state.pending_commands();
        assert_eq!(pending[(0, 0)], 0.2);
        assert_eq!(pending[(1, 0)], -PI);
        assert_eq!(pending[(0, 1)], -0.2);
        assert_eq!(pending[(1, 1)], 0.5);
    }

    #[test]
    fn test_unaddressed_agents_keep_previous_command() {
        let mut state = two_agents();
        state
            .set_all_velocities(&Velocities::from_columns(&[Vector2::new(0.1, 0.0), Vector2::new(0.1, 0.0)]))
            .unwrap();
        state
            .set_velocities(&[1], &Velocities::from_columns(&[Vector2::new(0.05, 0.2)]))
            .unwrap();
        let pending = state.pending_commands();
        assert_eq!(pending[(0, 0)], 0.1);
        assert_eq!(pending[(0, 1)], 0.05);
        assert_eq!(pending[(1, 1)], 0.2);
    }

    #[test]
    fn test_step_integrates_unicycle_kinematics() {
        let mut state = two_agents();
        state
            .set_all_velocities(&Velocities::from_columns(&[Vector2::new(0.1, 1.0), Vector2::new(0.1, 0.0)]))
            .unwrap();
        state.step();
        let poses = state.get_poses();
        assert_relative_eq!(poses[(0, 0)], -0.4 + 0.033 * 0.1, epsilon = 1e-12);
        assert_relative_eq!(poses[(1, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(poses[(2, 0)], 0.033, epsilon = 1e-12);
        // Agent 1 faces -x
        assert_relative_eq!(poses[(0, 1)], 0.4 - 0.033 * 0.1, epsilon = 1e-12);
        assert_eq!(state.iteration(), 1);
        assert_relative_eq!(state.elapsed(), 0.033);
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history()[1], poses);
    }

    #[test]
    fn test_step_clamps_to_arena() {
        let poses = Poses::from_columns(&[Vector3::new(1.59, 0.99, PI / 4.0)]);
        let mut state = ArenaState::new(1, Some(poses), SimulatorConfig::default()).unwrap();
        state.set_all_velocities(&Velocities::from_columns(&[Vector2::new(0.2, 0.0)])).unwrap();
        for _ in 0..50 {
            state.step();
            let p = state.get_poses();
            assert!(p[(0, 0)] <= 1.6 && p[(1, 0)] <= 1.0);
        }
        let p = state.get_poses();
        assert_eq!(p[(0, 0)], 1.6);
        assert_eq!(p[(1, 0)], 1.0);
    }

    #[test]
    fn test_step_respects_custom_arena() {
        let config = SimulatorConfig {
            arena: Arena::new(0.5, 0.5),
            ..Default::default()
        };
        let mut state = ArenaState::new(1, None, config).unwrap();
        state.set_all_velocities(&Velocities::from_columns(&[Vector2::new(0.2, 0.0)])).unwrap();
        for _ in 0..200 {
            state.step();
        }
        assert_eq!(state.get_poses()[(0, 0)], 0.5);
    }

    #[test]
    fn test_take_history_streams_out() {
        let mut state = two_agents();
        state.step();
        state.step();
        let taken = state.take_history();
        assert_eq!(taken.len(), 3);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0], state.get_poses());
    }

    #[test]
    fn test_initial_headings_normalized() {
        let poses = Poses::from_columns(&[Vector3::new(0.0, 0.0, 2.5 * PI)]);
        let state = ArenaState::new(1, Some(poses), SimulatorConfig::default()).unwrap();
        assert_relative_eq!(state.get_poses()[(2, 0)], PI / 2.0, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_headings_stay_normalized(
            omega in -PI..PI,
            v in -0.2f64..0.2,
            steps in 1usize..400,
        ) {
            let mut state = ArenaState::new(1, None, SimulatorConfig::default()).unwrap();
            state.set_all_velocities(&Velocities::from_columns(&[Vector2::new(v, omega)])).unwrap();
            for _ in 0..steps {
                state.step();
                let heading = state.get_poses()[(2, 0)];
                prop_assert!(heading > -PI && heading <= PI);
            }
        }

        #[test]
        fn prop_outward_commands_never_leave_arena(
            x in -1.6f64..1.6,
            y in -1.0f64..1.0,
            theta in -PI..PI,
        ) {
            let poses = Poses::from_columns(&[Vector3::new(x, y, theta)]);
            let mut state = ArenaState::new(1, Some(poses), SimulatorConfig::default()).unwrap();
            state.set_all_velocities(&Velocities::from_columns(&[Vector2::new(0.2, 0.0)])).unwrap();
            for _ in 0..100 {
                state.step();
                let p = state.get_poses();
                prop_assert!(p[(0, 0)].abs() <= 1.6 && p[(1, 0)].abs() <= 1.0);
            }
        }
    }
}
