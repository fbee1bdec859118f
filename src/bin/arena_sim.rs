//! Arena simulation host.
//!
//! Runs the antipodal swap: agents start evenly spaced on a circle and each
//! drives toward the point opposite its start, so every path crosses the
//! centre at roughly the same time.

use anyhow::{Context, Result};
use arena_control::convergence::{at_position, POSITION_ERROR};
use arena_control::structs::positions_of;
use arena_control::{
    ArenaState, BarrierCertificate, ControlLoop, Controller, Poses, Positions, QpBarrierCertificate,
    SiBarrierCertificate, SiPositionController, SiToUnicycle, SimulatorConfig,
};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::f64::consts::PI;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BarrierChoice {
    /// Linear pairwise repulsion, walls ignored
    Repulsion,
    /// Pairwise repulsion with inward reflection at the walls
    Boundary,
    /// Quadratic-program certificate solved with OSQP
    Qp,
}

#[derive(Parser, Debug)]
#[command(name = "arena-sim")]
#[command(about = "Run the antipodal swap scenario in a simulated arena", long_about = None)]
struct Args {
    /// Number of control ticks to run
    #[arg(short, long, default_value = "600")]
    iterations: u64,

    /// Number of agents on the starting circle
    #[arg(short, long, default_value = "6")]
    agents: usize,

    /// Safety filter applied to the desired velocities
    #[arg(short, long, value_enum, default_value = "qp")]
    barrier: BarrierChoice,

    /// Simulator configuration as JSON (missing fields take defaults)
    #[arg(short, long)]
    config: Option<String>,

    /// Write the pose history to this JSON file
    #[arg(long)]
    export: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Export<'a> {
    time_step: f64,
    barrier: String,
    near_collision_events: usize,
    history: &'a [Poses],
}

/// Evenly spaced poses on a circle, each facing the centre.
fn circle_poses(agents: usize, radius: f64) -> Poses {
    let mut poses = Poses::zeros(agents);
    for i in 0..agents {
        let angle = 2.0 * PI * i as f64 / agents as f64;
        poses[(0, i)] = radius * angle.cos();
        poses[(1, i)] = radius * angle.sin();
        poses[(2, i)] = angle + PI;
    }
    poses
}

fn run_swap<B>(args: &Args, state: ArenaState, barrier: B) -> Result<()>
where
    B: BarrierCertificate<State = Positions>,
{
    let controller = SiPositionController::default();
    let targets: Positions = -positions_of(&state.get_poses());
    let mut control = ControlLoop::new(state, barrier, SiToUnicycle::default())?;

    for tick in 0..args.iterations {
        let poses = control.state().get_poses();
        let desired = controller.control(&positions_of(&poses), &targets)?;
        let report = control.tick(&desired)?;

        if tick % 30 == 0 {
            let arrived = at_position(&poses, &targets, POSITION_ERROR)?;
            debug!(
                elapsed = control.state().elapsed(),
                arrived = arrived.iter().filter(|&&a| a).count(),
                "swap progress"
            );
        }
        if !report.degenerate_pairs.is_empty() {
            warn!(iteration = report.iteration, pairs = ?report.degenerate_pairs, "coincident agents");
        }
    }

    let state = control.state();
    let arrived = at_position(&state.get_poses(), &targets, POSITION_ERROR)?;
    let arrived_count = arrived.iter().filter(|&&a| a).count();
    info!(
        arrived = arrived_count,
        agents = state.number_of_agents(),
        near_collisions = control.near_collision_events(),
        elapsed = state.elapsed(),
        "antipodal swap finished"
    );

    if let Some(path) = &args.export {
        let export = Export {
            time_step: state.time_step(),
            barrier: format!("{:?}", args.barrier).to_lowercase(),
            near_collision_events: control.near_collision_events(),
            history: state.history(),
        };
        let json = serde_json::to_string_pretty(&export).context("serializing pose history")?;
        std::fs::write(path, json).with_context(|| format!("writing export to {path}"))?;
        info!(path = %path, frames = state.history().len(), "exported pose history");
    }

    state.call_at_scripts_end();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting tracing subscriber")?;

    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
            SimulatorConfig::from_json(&json)?
        }
        None => SimulatorConfig::default(),
    };

    let radius = 0.8 * config.arena.y_max;
    let state = ArenaState::new(args.agents, Some(circle_poses(args.agents, radius)), config)?;
    info!(agents = args.agents, barrier = ?args.barrier, iterations = args.iterations, "starting antipodal swap");

    let arena = config.arena;
    match args.barrier {
        BarrierChoice::Repulsion => {
            let barrier = SiBarrierCertificate {
                arena,
                ..SiBarrierCertificate::repulsion()
            };
            run_swap(&args, state, barrier)
        }
        BarrierChoice::Boundary => {
            let barrier = SiBarrierCertificate {
                arena,
                ..SiBarrierCertificate::with_boundary_and_scaling()
            };
            run_swap(&args, state, barrier)
        }
        BarrierChoice::Qp => {
            let barrier = QpBarrierCertificate {
                arena,
                ..Default::default()
            };
            run_swap(&args, state, barrier)
        }
    }
}
