//! Python bindings for scenario scripts.
//!
//! Matrices cross the boundary as row-major `list[list[float]]`: a 3×N pose
//! matrix is three lists of N floats. Malformed shapes raise `ValueError`.

use nalgebra::{Const, Dyn, OMatrix};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::f64::consts::PI;

use crate::barrier::{BarrierCertificate, QpBarrierCertificate, SiBarrierCertificate, UnicycleBarrierCertificate};
use crate::config::SimulatorConfig;
use crate::controllers::{ClfUnicyclePoseController, ClfUnicyclePositionController, Controller, SiPositionController};
use crate::convergence;
use crate::dynamics::{DynamicsConverter, SiToUnicycle, SiToUnicycleDiffeomorphic, UnicycleToSi};
use crate::error::ArenaError;
use crate::state::ArenaState;
use crate::structs::{Poses, Positions, Velocities};

type Rows = Vec<Vec<f64>>;

impl From<ArenaError> for PyErr {
    fn from(err: ArenaError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn from_rows<const R: usize>(what: &'static str, rows: &[Vec<f64>]) -> Result<OMatrix<f64, Const<R>, Dyn>, ArenaError> {
    ArenaError::check_columns(what, R, rows.len())?;
    let n = rows.first().map_or(0, Vec::len);
    for row in rows {
        ArenaError::check_columns(what, n, row.len())?;
    }
    Ok(OMatrix::<f64, Const<R>, Dyn>::from_fn_generic(
        Const::<R>,
        Dyn(n),
        |r, c| rows[r][c],
    ))
}

fn to_rows<const R: usize>(matrix: &OMatrix<f64, Const<R>, Dyn>) -> Rows {
    matrix.row_iter().map(|row| row.iter().copied().collect()).collect()
}

fn poses(rows: &[Vec<f64>]) -> Result<Poses, ArenaError> {
    from_rows::<3>("pose rows", rows)
}

fn planar(what: &'static str, rows: &[Vec<f64>]) -> Result<Positions, ArenaError> {
    from_rows::<2>(what, rows)
}

/// Default simulator settings with the caller's integration step.
fn simulator_config(time_step: f64) -> Result<SimulatorConfig, ArenaError> {
    let config = SimulatorConfig {
        time_step,
        ..Default::default()
    };
    config.validate()?;
    Ok(config)
}

/// Unicycle certificate over pairwise repulsion, walls reflected or ignored.
fn unicycle_repulsion(
    safety_radius: f64,
    projection_distance: f64,
    boundary_margin: Option<f64>,
    magnitude_limit: f64,
) -> Result<UnicycleBarrierCertificate<SiBarrierCertificate>, ArenaError> {
    let base = match boundary_margin {
        Some(boundary_margin) => SiBarrierCertificate {
            boundary_margin,
            ..SiBarrierCertificate::with_boundary()
        },
        None => SiBarrierCertificate::repulsion(),
    };
    let barrier = UnicycleBarrierCertificate::new(
        SiBarrierCertificate {
            safety_radius,
            magnitude_limit,
            ..base
        },
        projection_distance,
    );
    barrier.validate()?;
    Ok(barrier)
}

/// Simulated arena driven from Python.
#[pyclass]
pub struct Robotarium {
    state: ArenaState,
    show_figure: bool,
    sim_in_real_time: bool,
}

#[pymethods]
impl Robotarium {
    #[new]
    #[pyo3(signature = (number_of_robots, show_figure=false, initial_conditions=None, sim_in_real_time=false, time_step=0.033))]
    pub fn new(
        number_of_robots: usize,
        show_figure: bool,
        initial_conditions: Option<Rows>,
        sim_in_real_time: bool,
        time_step: f64,
    ) -> PyResult<Self> {
        let initial = initial_conditions.as_deref().map(poses).transpose()?;
        let state = ArenaState::new(number_of_robots, initial, simulator_config(time_step)?)?;
        Ok(Robotarium {
            state,
            show_figure,
            sim_in_real_time,
        })
    }

    #[getter]
    pub fn number_of_robots(&self) -> usize {
        self.state.number_of_agents()
    }

    #[getter]
    pub fn time_step(&self) -> f64 {
        self.state.time_step()
    }

    /// Accepted for script compatibility; nothing is drawn.
    #[getter]
    pub fn show_figure(&self) -> bool {
        self.show_figure
    }

    /// Accepted for script compatibility; steps never sleep.
    #[getter]
    pub fn sim_in_real_time(&self) -> bool {
        self.sim_in_real_time
    }

    pub fn get_poses(&self) -> Rows {
        to_rows(&self.state.get_poses())
    }

    pub fn set_velocities(&mut self, ids: Vec<usize>, velocities: Rows) -> PyResult<()> {
        let commands: Velocities = planar("velocity rows", &velocities)?;
        self.state.set_velocities(&ids, &commands)?;
        Ok(())
    }

    pub fn step(&mut self) {
        self.state.step();
    }

    pub fn history(&self) -> Vec<Rows> {
        self.state.history().iter().map(to_rows::<3>).collect()
    }

    pub fn call_at_scripts_end(&self) {
        self.state.call_at_scripts_end();
    }

    pub fn __str__(&self) -> String {
        format!(
            "Robotarium(robots={}, iteration={})",
            self.state.number_of_agents(),
            self.state.iteration()
        )
    }
}

#[pyfunction]
#[pyo3(signature = (states, targets, x_velocity_gain=1.0, y_velocity_gain=1.0, velocity_magnitude_limit=0.12))]
fn si_position_controller(
    states: Rows,
    targets: Rows,
    x_velocity_gain: f64,
    y_velocity_gain: f64,
    velocity_magnitude_limit: f64,
) -> PyResult<Rows> {
    let controller = SiPositionController {
        x_velocity_gain,
        y_velocity_gain,
        velocity_magnitude_limit,
    };
    controller.validate()?;
    let dxi = controller.control(&planar("state rows", &states)?, &planar("target rows", &targets)?)?;
    Ok(to_rows(&dxi))
}

#[pyfunction]
#[pyo3(signature = (dxi, states, safety_radius=0.17))]
fn si_barrier_certificate(dxi: Rows, states: Rows, safety_radius: f64) -> PyResult<Rows> {
    let barrier = SiBarrierCertificate {
        safety_radius,
        ..SiBarrierCertificate::repulsion()
    };
    barrier.validate()?;
    let safe = barrier.apply(&planar("velocity rows", &dxi)?, &planar("state rows", &states)?)?;
    Ok(to_rows(&safe))
}

#[pyfunction]
#[pyo3(signature = (dxi, states, safety_radius=0.17))]
fn si_barrier_certificate_with_boundary(dxi: Rows, states: Rows, safety_radius: f64) -> PyResult<Rows> {
    let barrier = SiBarrierCertificate {
        safety_radius,
        ..SiBarrierCertificate::with_boundary()
    };
    barrier.validate()?;
    let safe = barrier.apply(&planar("velocity rows", &dxi)?, &planar("state rows", &states)?)?;
    Ok(to_rows(&safe))
}

#[pyfunction]
#[pyo3(signature = (dxi, states, safety_radius=0.17, barrier_gain=100.0, magnitude_limit=0.2))]
fn si_barrier_certificate_qp(
    dxi: Rows,
    states: Rows,
    safety_radius: f64,
    barrier_gain: f64,
    magnitude_limit: f64,
) -> PyResult<Rows> {
    let barrier = QpBarrierCertificate {
        safety_radius,
        barrier_gain,
        magnitude_limit,
        ..Default::default()
    };
    let safe = barrier.apply(&planar("velocity rows", &dxi)?, &planar("state rows", &states)?)?;
    Ok(to_rows(&safe))
}

#[pyfunction]
#[pyo3(signature = (dxu, states, safety_radius=0.15, projection_distance=0.05, magnitude_limit=0.2))]
fn unicycle_barrier_certificate(
    dxu: Rows,
    states: Rows,
    safety_radius: f64,
    projection_distance: f64,
    magnitude_limit: f64,
) -> PyResult<Rows> {
    let barrier = unicycle_repulsion(safety_radius, projection_distance, None, magnitude_limit)?;
    let safe = barrier.apply(&planar("command rows", &dxu)?, &poses(&states)?)?;
    Ok(to_rows(&safe))
}

#[pyfunction]
#[pyo3(signature = (dxu, states, safety_radius=0.15, projection_distance=0.05, boundary_margin=0.05, magnitude_limit=0.2))]
fn unicycle_barrier_certificate_with_boundary(
    dxu: Rows,
    states: Rows,
    safety_radius: f64,
    projection_distance: f64,
    boundary_margin: f64,
    magnitude_limit: f64,
) -> PyResult<Rows> {
    let barrier = unicycle_repulsion(safety_radius, projection_distance, Some(boundary_margin), magnitude_limit)?;
    let safe = barrier.apply(&planar("command rows", &dxu)?, &poses(&states)?)?;
    Ok(to_rows(&safe))
}

#[pyfunction]
#[pyo3(signature = (dxu, states, safety_radius=0.17, projection_distance=0.05, barrier_gain=100.0, magnitude_limit=0.2))]
fn unicycle_qp_barrier_certificate(
    dxu: Rows,
    states: Rows,
    safety_radius: f64,
    projection_distance: f64,
    barrier_gain: f64,
    magnitude_limit: f64,
) -> PyResult<Rows> {
    let inner = QpBarrierCertificate {
        safety_radius,
        barrier_gain,
        magnitude_limit,
        ..Default::default()
    };
    let barrier = UnicycleBarrierCertificate::new(inner, projection_distance);
    let safe = barrier.apply(&planar("command rows", &dxu)?, &poses(&states)?)?;
    Ok(to_rows(&safe))
}

#[pyfunction]
#[pyo3(signature = (states, targets, linear_velocity_gain=0.8, angular_velocity_gain=3.0, velocity_magnitude_limit=0.15, angular_velocity_limit=PI))]
fn clf_unicycle_position_controller(
    states: Rows,
    targets: Rows,
    linear_velocity_gain: f64,
    angular_velocity_gain: f64,
    velocity_magnitude_limit: f64,
    angular_velocity_limit: f64,
) -> PyResult<Rows> {
    let controller = ClfUnicyclePositionController {
        linear_velocity_gain,
        angular_velocity_gain,
        velocity_magnitude_limit,
        angular_velocity_limit,
    };
    let dxu = controller.control(&poses(&states)?, &planar("target rows", &targets)?)?;
    Ok(to_rows(&dxu))
}

#[allow(clippy::too_many_arguments)]
#[pyfunction]
#[pyo3(signature = (states, targets, linear_velocity_gain=0.8, angular_velocity_gain=3.0, rotation_error_gain=0.4, velocity_magnitude_limit=0.15, angular_velocity_limit=PI, position_error=0.02))]
fn clf_unicycle_pose_controller(
    states: Rows,
    targets: Rows,
    linear_velocity_gain: f64,
    angular_velocity_gain: f64,
    rotation_error_gain: f64,
    velocity_magnitude_limit: f64,
    angular_velocity_limit: f64,
    position_error: f64,
) -> PyResult<Rows> {
    let controller = ClfUnicyclePoseController {
        linear_velocity_gain,
        angular_velocity_gain,
        rotation_error_gain,
        velocity_magnitude_limit,
        angular_velocity_limit,
        position_error,
    };
    let dxu = controller.control(&poses(&states)?, &poses(&targets)?)?;
    Ok(to_rows(&dxu))
}

#[pyfunction]
#[pyo3(signature = (dxi, states, linear_velocity_gain=1.0, angular_velocity_limit=PI))]
fn si_to_uni_dynamics(dxi: Rows, states: Rows, linear_velocity_gain: f64, angular_velocity_limit: f64) -> PyResult<Rows> {
    let converter = SiToUnicycle {
        linear_velocity_gain,
        angular_velocity_limit,
    };
    converter.validate()?;
    let dxu = converter.convert(&planar("velocity rows", &dxi)?, &poses(&states)?)?;
    Ok(to_rows(&dxu))
}

#[pyfunction]
#[pyo3(signature = (dxi, states, linear_velocity_gain=1.0, angular_velocity_limit=PI, projection_distance=0.05))]
fn si_to_uni_dynamics_with_obstacles(
    dxi: Rows,
    states: Rows,
    linear_velocity_gain: f64,
    angular_velocity_limit: f64,
    projection_distance: f64,
) -> PyResult<Rows> {
    let converter = SiToUnicycleDiffeomorphic {
        linear_velocity_gain,
        angular_velocity_limit,
        projection_distance,
    };
    converter.validate()?;
    let dxu = converter.convert(&planar("velocity rows", &dxi)?, &poses(&states)?)?;
    Ok(to_rows(&dxu))
}

#[pyfunction]
#[pyo3(signature = (dxu, states, projection_distance=0.05))]
fn uni_to_si_dynamics(dxu: Rows, states: Rows, projection_distance: f64) -> PyResult<Rows> {
    let converter = UnicycleToSi { projection_distance };
    converter.validate()?;
    let dxi = converter.convert(&planar("command rows", &dxu)?, &poses(&states)?)?;
    Ok(to_rows(&dxi))
}

#[pyfunction]
#[pyo3(signature = (states, targets, position_error=convergence::POSITION_ERROR))]
fn at_position(states: Rows, targets: Rows, position_error: f64) -> PyResult<Vec<bool>> {
    Ok(convergence::at_position(&poses(&states)?, &planar("target rows", &targets)?, position_error)?)
}

#[pyfunction]
#[pyo3(signature = (states, targets, position_error=convergence::POSITION_ERROR, rotation_error=convergence::ROTATION_ERROR))]
fn at_pose(states: Rows, targets: Rows, position_error: f64, rotation_error: f64) -> PyResult<Vec<bool>> {
    Ok(convergence::at_pose(&poses(&states)?, &poses(&targets)?, position_error, rotation_error)?)
}

#[pymodule]
fn arena_control(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Robotarium>()?;

    // Controllers and safety filters
    m.add_function(wrap_pyfunction!(si_position_controller, m)?)?;
    m.add_function(wrap_pyfunction!(clf_unicycle_position_controller, m)?)?;
    m.add_function(wrap_pyfunction!(clf_unicycle_pose_controller, m)?)?;
    m.add_function(wrap_pyfunction!(si_barrier_certificate, m)?)?;
    m.add_function(wrap_pyfunction!(si_barrier_certificate_with_boundary, m)?)?;
    m.add_function(wrap_pyfunction!(si_barrier_certificate_qp, m)?)?;
    m.add_function(wrap_pyfunction!(unicycle_barrier_certificate, m)?)?;
    m.add_function(wrap_pyfunction!(unicycle_barrier_certificate_with_boundary, m)?)?;
    m.add_function(wrap_pyfunction!(unicycle_qp_barrier_certificate, m)?)?;

    // Dynamics and arrival checks
    m.add_function(wrap_pyfunction!(si_to_uni_dynamics, m)?)?;
    m.add_function(wrap_pyfunction!(si_to_uni_dynamics_with_obstacles, m)?)?;
    m.add_function(wrap_pyfunction!(uni_to_si_dynamics, m)?)?;
    m.add_function(wrap_pyfunction!(at_position, m)?)?;
    m.add_function(wrap_pyfunction!(at_pose, m)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::SafetyPolicy;

    #[test]
    fn test_rows_round_trip_is_row_major() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let matrix = poses(&rows).unwrap();
        assert_eq!(matrix[(2, 0)], 5.0);
        assert_eq!(matrix[(0, 1)], 2.0);
        assert_eq!(to_rows(&matrix), rows);
    }

    #[test]
    fn test_rows_wrong_row_count() {
        let err = poses(&[vec![0.0], vec![0.0]]).unwrap_err();
        assert!(matches!(err, ArenaError::ShapeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_simulator_config_takes_time_step() {
        let config = simulator_config(0.01).unwrap();
        assert_eq!(config.time_step, 0.01);
        assert_eq!(config.arena, SimulatorConfig::default().arena);
        assert!(matches!(simulator_config(0.0), Err(ArenaError::Configuration(_))));
    }

    #[test]
    fn test_unicycle_repulsion_policies() {
        let plain = unicycle_repulsion(0.15, 0.05, None, 0.2).unwrap();
        assert_eq!(plain.inner.policy, SafetyPolicy::Repulsion);
        assert_eq!(plain.inner.safety_radius, 0.15);
        assert_eq!(plain.projection_distance, 0.05);

        let walled = unicycle_repulsion(0.15, 0.05, Some(0.08), 0.2).unwrap();
        assert_eq!(walled.inner.policy, SafetyPolicy::BoundaryReflection);
        assert_eq!(walled.inner.boundary_margin, 0.08);
    }

    #[test]
    fn test_unicycle_repulsion_rejects_bad_parameters() {
        assert!(unicycle_repulsion(-0.15, 0.05, None, 0.2).is_err());
        assert!(unicycle_repulsion(0.15, 0.0, None, 0.2).is_err());
    }

    #[test]
    fn test_rows_ragged() {
        let err = planar("velocity rows", &[vec![0.0, 1.0], vec![0.0]]).unwrap_err();
        assert!(matches!(err, ArenaError::ShapeMismatch { expected: 2, actual: 1, .. }));
    }
}
