//! # Barrier Certificates
//!
//! Safety filters that take a batch of desired planar velocities and return a
//! corrected batch that keeps agents apart and inside the arena.
//!
//! ## Pairwise repulsion (`SiBarrierCertificate`)
//!
//! For every unordered pair (i, j) closer than the safety radius `r`:
//!
//! ```text
//! push = (r − d) · (p_i − p_j) / d
//! u_i += k · push
//! u_j −= k · push
//! ```
//!
//! The correction is applied symmetrically so neither agent of the pair is
//! favoured. Pairs closer than [`DISTANCE_FLOOR`] have no defined direction and
//! are skipped for that tick; they are returned in [`Certified::degenerate_pairs`]
//! so the host can count them as near-collisions.
//!
//! Near a wall the velocity component perpendicular to that wall is forced to
//! point inward. Whether a final magnitude re-limit runs depends on the
//! [`SafetyPolicy`].
//!
//! The repulsion gain is a heuristic: it slows an approach in proportion to the
//! penetration depth but only starts acting once agents are already inside `r`.
//!
//! ## Control barrier function (`QpBarrierCertificate`)
//!
//! With `h_ij = ‖p_i − p_j‖² − r²` the certificate solves
//!
//! ```text
//! minimize    ‖u − u_desired‖²
//! subject to  −2 (p_i − p_j)ᵀ (u_i − u_j) ≤ γ h_ij³      for every pair
//!             ±u_x, ±u_y ≤ 0.4 γ (wall distance − r/2)³   for every agent (optional)
//! ```
//!
//! with OSQP. The allowed closing rate of a pair shrinks cubically as it
//! approaches `r`, so agents slow down before contact rather than after.
//!
//! ## Unicycle agents (`UnicycleBarrierCertificate`)
//!
//! Unicycles cannot move sideways, so their commands are certified at a
//! virtual point projected a short distance ahead along the heading, where the
//! near-identity diffeomorphism in [`crate::dynamics`] makes them behave like
//! single integrators.

use nalgebra::Vector2;
use osqp::{CscMatrix, Problem, Settings};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, warn};

use crate::dynamics::{si_to_unicycle_projected, unicycle_to_si};
use crate::error::ArenaError;
use crate::structs::{limit_magnitudes, Arena, Poses, Positions, Velocities, DISTANCE_FLOOR};

/// Output of a certificate for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Certified {
    pub velocities: Velocities,
    /// Pairs (i < j) that were effectively coincident and left uncorrected
    pub degenerate_pairs: Vec<(usize, usize)>,
    /// Pairs whose desired velocities had to be corrected
    pub active_pairs: usize,
}

/// Uniform call contract shared by every safety filter.
pub trait BarrierCertificate {
    /// What the certificate needs to know about the agents: positions or poses.
    type State;

    /// Rejects parameters that would make the filter meaningless, such as a
    /// non-positive or NaN safety radius.
    fn validate(&self) -> Result<(), ArenaError> {
        Ok(())
    }

    fn certify(&self, velocities: &Velocities, states: &Self::State) -> Result<Certified, ArenaError>;

    fn apply(&self, velocities: &Velocities, states: &Self::State) -> Result<Velocities, ArenaError> {
        self.certify(velocities, states).map(|certified| certified.velocities)
    }
}

/// Which corrections a [`SiBarrierCertificate`] applies after pairwise repulsion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyPolicy {
    /// Magnitude re-limit only; walls are ignored
    Repulsion,
    /// Inward reflection near walls, no magnitude re-limit
    BoundaryReflection,
    /// Inward reflection near walls, then magnitude re-limit
    BoundaryReflectionWithScaling,
}

impl SafetyPolicy {
    pub fn reflects_at_boundary(self) -> bool {
        !matches!(self, SafetyPolicy::Repulsion)
    }

    pub fn limits_magnitude(self) -> bool {
        !matches!(self, SafetyPolicy::BoundaryReflection)
    }
}

/// Single-integrator barrier certificate based on linear pairwise repulsion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiBarrierCertificate {
    pub safety_radius: f64,
    pub repulsion_gain: f64,
    pub boundary_margin: f64,
    pub magnitude_limit: f64,
    pub arena: Arena,
    pub policy: SafetyPolicy,
}

impl Default for SiBarrierCertificate {
    fn default() -> Self {
        SiBarrierCertificate {
            safety_radius: 0.17,
            repulsion_gain: 0.3,
            boundary_margin: 0.05,
            magnitude_limit: 0.2,
            arena: Arena::default(),
            policy: SafetyPolicy::BoundaryReflection,
        }
    }
}

impl SiBarrierCertificate {
    /// Pairwise repulsion with magnitude re-limiting and no wall handling.
    pub fn repulsion() -> Self {
        SiBarrierCertificate {
            policy: SafetyPolicy::Repulsion,
            ..Default::default()
        }
    }

    /// Pairwise repulsion with wall reflection and no magnitude re-limiting.
    pub fn with_boundary() -> Self {
        SiBarrierCertificate {
            policy: SafetyPolicy::BoundaryReflection,
            ..Default::default()
        }
    }

    pub fn with_boundary_and_scaling() -> Self {
        SiBarrierCertificate {
            policy: SafetyPolicy::BoundaryReflectionWithScaling,
            ..Default::default()
        }
    }

    fn reflect_at_walls(&self, velocity: &mut Vector2<f64>, x: f64, y: f64) {
        let arena = &self.arena;
        let margin = self.boundary_margin;
        if x < -arena.x_max + margin {
            velocity.x = velocity.x.abs();
        }
        if x > arena.x_max - margin {
            velocity.x = -velocity.x.abs();
        }
        if y < -arena.y_max + margin {
            velocity.y = velocity.y.abs();
        }
        if y > arena.y_max - margin {
            velocity.y = -velocity.y.abs();
        }
    }
}

impl BarrierCertificate for SiBarrierCertificate {
    type State = Positions;

    fn validate(&self) -> Result<(), ArenaError> {
        if !(self.safety_radius > 0.0) {
            return Err(ArenaError::configuration(format!(
                "safety_radius must be positive, got {}",
                self.safety_radius
            )));
        }
        if !(self.boundary_margin >= 0.0) || !(self.magnitude_limit > 0.0) || !(self.repulsion_gain >= 0.0) {
            return Err(ArenaError::configuration(
                "boundary_margin and repulsion_gain must be non-negative, magnitude_limit positive",
            ));
        }
        self.arena.validate()
    }

    fn certify(&self, dxi: &Velocities, positions: &Positions) -> Result<Certified, ArenaError> {
        self.validate()?;
        ArenaError::check_columns("desired velocities", positions.ncols(), dxi.ncols())?;

        let n = positions.ncols();
        let r = self.safety_radius;
        let mut safe = dxi.clone();
        let mut degenerate_pairs = Vec::new();
        let mut active_pairs = 0;

        for i in 0..n {
            for j in (i + 1)..n {
                let diff = positions.column(i) - positions.column(j);
                let distance = diff.norm();
                if distance >= r {
                    continue;
                }
                if distance <= DISTANCE_FLOOR {
                    debug!(i, j, distance, "coincident agents skipped by barrier certificate");
                    degenerate_pairs.push((i, j));
                    continue;
                }

                let push = diff * (self.repulsion_gain * (r - distance) / distance);
                safe[(0, i)] += push.x;
                safe[(1, i)] += push.y;
                safe[(0, j)] -= push.x;
                safe[(1, j)] -= push.y;
                active_pairs += 1;
            }
        }

        if self.policy.reflects_at_boundary() {
            for i in 0..n {
                let mut velocity = Vector2::new(safe[(0, i)], safe[(1, i)]);
                self.reflect_at_walls(&mut velocity, positions[(0, i)], positions[(1, i)]);
                safe.set_column(i, &velocity);
            }
        }

        if self.policy.limits_magnitude() {
            limit_magnitudes(&mut safe, self.magnitude_limit);
        }

        if active_pairs > 0 {
            debug!(active_pairs, "barrier certificate corrected approaching pairs");
        }

        Ok(Certified {
            velocities: safe,
            degenerate_pairs,
            active_pairs,
        })
    }
}

/// One row of `A u ≤ b`, with at most four nonzero coefficients.
#[derive(Debug, Clone)]
struct ConstraintRow {
    coefficients: Vec<(usize, f64)>,
    bound: f64,
}

impl ConstraintRow {
    fn evaluate(&self, u: &[f64]) -> f64 {
        self.coefficients.iter().map(|&(col, value)| value * u[col]).sum()
    }
}

/// Number of rows `u` violates by more than `tolerance`.
fn count_violated(rows: &[ConstraintRow], u: &[f64], tolerance: f64) -> usize {
    rows.iter().filter(|row| row.evaluate(u) > row.bound + tolerance).count()
}

/// Keeps a solver result only if it satisfies every row within tolerance.
fn accept_solution(rows: &[ConstraintRow], solution: Vec<f64>) -> Option<Vec<f64>> {
    let infeasible = count_violated(rows, &solution, FEASIBILITY_TOLERANCE);
    if infeasible > 0 {
        warn!(infeasible, "barrier program returned an infeasible solution");
        return None;
    }
    Some(solution)
}

/// Quadratic-program barrier certificate built on control barrier functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QpBarrierCertificate {
    pub safety_radius: f64,
    pub barrier_gain: f64,
    pub magnitude_limit: f64,
    pub enforce_boundary: bool,
    pub arena: Arena,
}

impl Default for QpBarrierCertificate {
    fn default() -> Self {
        QpBarrierCertificate {
            safety_radius: 0.17,
            barrier_gain: 100.0,
            magnitude_limit: 0.2,
            enforce_boundary: true,
            arena: Arena::default(),
        }
    }
}

const BOUNDARY_GAIN_FACTOR: f64 = 0.4;

/// Slack allowed on a constraint row before a solver result is rejected.
const FEASIBILITY_TOLERANCE: f64 = 1e-6;

impl QpBarrierCertificate {
    /// Certificate used when the solver cannot produce a feasible solution.
    fn fallback(&self) -> SiBarrierCertificate {
        SiBarrierCertificate {
            safety_radius: self.safety_radius,
            magnitude_limit: self.magnitude_limit,
            arena: self.arena,
            policy: if self.enforce_boundary {
                SafetyPolicy::BoundaryReflectionWithScaling
            } else {
                SafetyPolicy::Repulsion
            },
            ..Default::default()
        }
    }

    fn constraints(&self, positions: &Positions, degenerate_pairs: &mut Vec<(usize, usize)>) -> Vec<ConstraintRow> {
        let n = positions.ncols();
        let gamma = self.barrier_gain;
        let r = self.safety_radius;
        let mut rows = Vec::with_capacity(n * n.saturating_sub(1) / 2 + 4 * n);

        for i in 0..n {
            for j in (i + 1)..n {
                let error = positions.column(i) - positions.column(j);
                if error.norm() <= DISTANCE_FLOOR {
                    debug!(i, j, "coincident agents left out of barrier program");
                    degenerate_pairs.push((i, j));
                    continue;
                }
                let h = error.norm_squared() - r * r;
                rows.push(ConstraintRow {
                    coefficients: vec![
                        (2 * i, -2.0 * error.x),
                        (2 * i + 1, -2.0 * error.y),
                        (2 * j, 2.0 * error.x),
                        (2 * j + 1, 2.0 * error.y),
                    ],
                    bound: gamma * h.powi(3),
                });
            }
        }

        if self.enforce_boundary {
            let k = BOUNDARY_GAIN_FACTOR * gamma;
            let half_r = r / 2.0;
            for i in 0..n {
                let (x, y) = (positions[(0, i)], positions[(1, i)]);
                rows.push(ConstraintRow {
                    coefficients: vec![(2 * i + 1, 1.0)],
                    bound: k * (self.arena.y_max - half_r - y).powi(3),
                });
                rows.push(ConstraintRow {
                    coefficients: vec![(2 * i + 1, -1.0)],
                    bound: k * (self.arena.y_max - half_r + y).powi(3),
                });
                rows.push(ConstraintRow {
                    coefficients: vec![(2 * i, 1.0)],
                    bound: k * (self.arena.x_max - half_r - x).powi(3),
                });
                rows.push(ConstraintRow {
                    coefficients: vec![(2 * i, -1.0)],
                    bound: k * (self.arena.x_max - half_r + x).powi(3),
                });
            }
        }

        rows
    }
}

/// Builds the CSC form of the constraint matrix, column by column.
fn constraint_matrix(rows: &[ConstraintRow], ncols: usize) -> CscMatrix<'static> {
    let mut a_data = Vec::new();
    let mut a_indices = Vec::new();
    let mut a_indptr = vec![0];

    for col in 0..ncols {
        for (row_idx, row) in rows.iter().enumerate() {
            for &(c, value) in &row.coefficients {
                if c == col && value != 0.0 {
                    a_data.push(value);
                    a_indices.push(row_idx);
                }
            }
        }
        a_indptr.push(a_data.len());
    }

    CscMatrix {
        nrows: rows.len(),
        ncols,
        indptr: Cow::Owned(a_indptr),
        indices: Cow::Owned(a_indices),
        data: Cow::Owned(a_data),
    }
}

/// Solves `min ‖u − desired‖²` subject to `rows`, returning `None` if OSQP fails
/// or its result violates a row.
fn solve_barrier_program(rows: &[ConstraintRow], desired: &[f64]) -> Option<Vec<f64>> {
    let n = desired.len();

    // P = 2I, upper triangular CSC
    let p_matrix = CscMatrix {
        nrows: n,
        ncols: n,
        indptr: Cow::Owned((0..=n).collect()),
        indices: Cow::Owned((0..n).collect()),
        data: Cow::Owned(vec![2.0; n]),
    };
    let q: Vec<f64> = desired.iter().map(|d| -2.0 * d).collect();
    let a_matrix = constraint_matrix(rows, n);
    let l_bounds = vec![f64::NEG_INFINITY; rows.len()];
    let u_bounds: Vec<f64> = rows.iter().map(|row| row.bound).collect();

    let settings = Settings::default()
        .verbose(false)
        .eps_abs(1e-9)
        .eps_rel(1e-9)
        .max_iter(20_000)
        .polishing(true);

    let mut problem = match Problem::new(p_matrix, &q, a_matrix, &l_bounds, &u_bounds, &settings) {
        Ok(p) => p,
        Err(_e) => return None,
    };

    let solution = match problem.solve() {
        osqp::Status::Solved(sol) => sol.x().to_vec(),
        osqp::Status::SolvedInaccurate(sol) => sol.x().to_vec(),
        osqp::Status::MaxIterationsReached(sol) => sol.x().to_vec(),
        _ => return None,
    };
    accept_solution(rows, solution)
}

impl BarrierCertificate for QpBarrierCertificate {
    type State = Positions;

    fn validate(&self) -> Result<(), ArenaError> {
        if !(self.safety_radius > 0.0) {
            return Err(ArenaError::configuration(format!(
                "safety_radius must be positive, got {}",
                self.safety_radius
            )));
        }
        if !(self.barrier_gain > 0.0) || !(self.magnitude_limit > 0.0) {
            return Err(ArenaError::configuration(
                "barrier_gain and magnitude_limit must be positive",
            ));
        }
        self.arena.validate()
    }

    fn certify(&self, dxi: &Velocities, positions: &Positions) -> Result<Certified, ArenaError> {
        self.validate()?;
        ArenaError::check_columns("desired velocities", positions.ncols(), dxi.ncols())?;

        let mut desired = dxi.clone();
        limit_magnitudes(&mut desired, self.magnitude_limit);

        let mut degenerate_pairs = Vec::new();
        let rows = self.constraints(positions, &mut degenerate_pairs);
        let flat = desired.as_slice();
        let violated = count_violated(&rows, flat, 0.0);

        if violated == 0 {
            return Ok(Certified {
                velocities: desired,
                degenerate_pairs,
                active_pairs: 0,
            });
        }

        match solve_barrier_program(&rows, flat) {
            Some(solution) => {
                debug!(violated, "barrier program corrected desired velocities");
                Ok(Certified {
                    velocities: Velocities::from_fn(solution.len() / 2, |row, col| solution[2 * col + row]),
                    degenerate_pairs,
                    active_pairs: violated,
                })
            }
            None => {
                warn!(violated, "barrier program failed, falling back to pairwise repulsion");
                self.fallback().certify(dxi, positions)
            }
        }
    }
}

/// Certifies unicycle commands by running a single-integrator certificate at
/// points projected ahead of each agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnicycleBarrierCertificate<B> {
    pub inner: B,
    pub projection_distance: f64,
}

impl<B> UnicycleBarrierCertificate<B>
where
    B: BarrierCertificate<State = Positions>,
{
    pub fn new(inner: B, projection_distance: f64) -> Self {
        UnicycleBarrierCertificate {
            inner,
            projection_distance,
        }
    }

    /// Virtual points `projection_distance` ahead of each agent.
    pub fn projected_positions(&self, poses: &Poses) -> Positions {
        let mut projected = Positions::zeros(poses.ncols());
        for i in 0..poses.ncols() {
            let (s, c) = poses[(2, i)].sin_cos();
            projected[(0, i)] = poses[(0, i)] + self.projection_distance * c;
            projected[(1, i)] = poses[(1, i)] + self.projection_distance * s;
        }
        projected
    }
}

impl<B> BarrierCertificate for UnicycleBarrierCertificate<B>
where
    B: BarrierCertificate<State = Positions>,
{
    type State = Poses;

    fn validate(&self) -> Result<(), ArenaError> {
        if !(self.projection_distance > 0.0 && self.projection_distance.is_finite()) {
            return Err(ArenaError::configuration(format!(
                "projection_distance must be positive, got {}",
                self.projection_distance
            )));
        }
        self.inner.validate()
    }

    fn certify(&self, dxu: &Velocities, poses: &Poses) -> Result<Certified, ArenaError> {
        self.validate()?;
        ArenaError::check_columns("unicycle commands", poses.ncols(), dxu.ncols())?;

        let n = poses.ncols();
        let p = self.projection_distance;
        let mut dxi = Velocities::zeros(n);
        for i in 0..n {
            dxi.set_column(i, &unicycle_to_si(dxu[(0, i)], dxu[(1, i)], poses[(2, i)], p));
        }

        let certified = self.inner.certify(&dxi, &self.projected_positions(poses))?;

        let mut out = Velocities::zeros(n);
        for i in 0..n {
            let safe = certified.velocities.column(i);
            out.set_column(i, &si_to_unicycle_projected(safe[0], safe[1], poses[(2, i)], p));
        }

        Ok(Certified {
            velocities: out,
            ..certified
        })
    }
}
