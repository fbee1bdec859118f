//! Graph Laplacians for consensus-style scenario code.

use nalgebra::DMatrix;
use rand::Rng;

use crate::error::ArenaError;

/// Laplacian of the cycle graph on `n` vertices.
pub fn cycle_laplacian(n: usize) -> DMatrix<f64> {
    let mut laplacian = DMatrix::zeros(n, n);
    for i in 0..n {
        laplacian[(i, i)] = 2.0;
        laplacian[(i, (i + 1) % n)] = -1.0;
        laplacian[(i, (i + n - 1) % n)] = -1.0;
    }
    laplacian
}

/// Laplacian of the path graph `0 - 1 - … - n-1`.
pub fn line_laplacian(n: usize) -> DMatrix<f64> {
    let mut laplacian = DMatrix::zeros(n, n);
    for i in 0..n {
        if i > 0 {
            laplacian[(i, i)] += 1.0;
            laplacian[(i, i - 1)] = -1.0;
        }
        if i + 1 < n {
            laplacian[(i, i)] += 1.0;
            laplacian[(i, i + 1)] = -1.0;
        }
    }
    laplacian
}

/// Laplacian of the complete graph K_n.
pub fn complete_laplacian(n: usize) -> DMatrix<f64> {
    DMatrix::<f64>::identity(n, n) * n as f64 - DMatrix::from_element(n, n, 1.0)
}

/// Laplacian of a random connected graph: a path spanning tree plus extra
/// edges, each present with `edge_probability`.
///
/// The caller owns the generator; a seeded one gives reproducible graphs.
pub fn random_connected_laplacian<R: Rng + ?Sized>(
    n: usize,
    edge_probability: f64,
    rng: &mut R,
) -> Result<DMatrix<f64>, ArenaError> {
    if !(0.0..=1.0).contains(&edge_probability) {
        return Err(ArenaError::configuration(format!(
            "edge_probability must be within [0, 1], got {edge_probability}"
        )));
    }

    let mut adjacency = DMatrix::<f64>::zeros(n, n);
    for i in 0..n.saturating_sub(1) {
        adjacency[(i, i + 1)] = 1.0;
        adjacency[(i + 1, i)] = 1.0;
    }
    for i in 0..n {
        for j in (i + 2)..n {
            if rng.gen_bool(edge_probability) {
                adjacency[(i, j)] = 1.0;
                adjacency[(j, i)] = 1.0;
            }
        }
    }

    let degrees = DMatrix::from_diagonal(&adjacency.column_sum());
    Ok(degrees - adjacency)
}

/// Agents adjacent to `agent` in the graph described by `laplacian`.
pub fn topological_neighbors(laplacian: &DMatrix<f64>, agent: usize) -> Result<Vec<usize>, ArenaError> {
    if agent >= laplacian.nrows() {
        return Err(ArenaError::IndexOutOfRange {
            index: agent,
            agents: laplacian.nrows(),
        });
    }
    Ok(laplacian
        .row(agent)
        .iter()
        .enumerate()
        .filter(|&(_, &weight)| weight < 0.0)
        .map(|(j, _)| j)
        .collect())
}
