//! # Arena Control
//!
//! A safety-constrained control pipeline for a simulated multi-robot arena.
//! Differential-drive agents share a bounded rectangle; every tick the
//! desired velocities from a scenario are filtered so agents keep their
//! distance from each other and from the walls.
//!
//! ## Pipeline
//!
//! - **Controllers**: desired velocities toward target points or poses
//! - **Barrier certificates**: minimal corrections that keep pairs apart
//!   (linear repulsion, or a quadratic program solved with OSQP)
//! - **Dynamics converters**: planar velocities to unicycle commands
//! - **State store**: unicycle kinematics, arena clamping and pose history
//!
//! [`driver::ControlLoop`] wires the stages together in order.
//!
//! ## Usage
//!
//! The library is used directly from Rust, through the `arena-sim` host, or
//! from Python scenario scripts when built with the `python` feature.

pub mod barrier;
pub mod config;
pub mod controllers;
pub mod convergence;
pub mod driver;
pub mod dynamics;
pub mod error;
pub mod graph;
pub mod state;
pub mod structs;

#[cfg(feature = "python")]
mod python;

pub use barrier::{
    BarrierCertificate, Certified, QpBarrierCertificate, SafetyPolicy, SiBarrierCertificate, UnicycleBarrierCertificate,
};
pub use config::SimulatorConfig;
pub use controllers::{ClfUnicyclePoseController, ClfUnicyclePositionController, Controller, SiPositionController};
pub use driver::{ControlLoop, TickReport};
pub use dynamics::{DynamicsConverter, SiToUnicycle, SiToUnicycleDiffeomorphic, UnicycleToSi};
pub use error::ArenaError;
pub use state::ArenaState;
pub use structs::{Arena, Poses, Positions, Velocities};
