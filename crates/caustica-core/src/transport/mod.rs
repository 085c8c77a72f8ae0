//! Optimal transport abstraction and implementations.
//!
//! The [`TransportSolver`] trait defines the contract the pipeline relies on:
//! initialise for a grid resolution, then solve one density against the
//! uniform measure on the unit square, producing a [`TransportMap`]. The grid
//! mesh-morphing solver ([`grid::GridTransportSolver`]) is the default
//! implementation.

pub mod grid;
pub mod map;
mod poisson;

pub use grid::GridTransportSolver;
pub use map::TransportMap;

use thiserror::Error;

use crate::density::DensityField;

/// Errors that can occur during a transport solve.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Transport solver failed to converge after {max_iter} iterations (residual: {residual:.2e})")]
    ConvergenceFailure { max_iter: usize, residual: f64 },

    #[error("Transport solver stalled at iteration {iteration} (residual: {residual:.2e}); no step reduced the mass error")]
    Stalled { iteration: usize, residual: f64 },

    #[error("Invalid density: {0}")]
    InvalidDensity(String),

    #[error("Transport solver used before init()")]
    NotInitialised,

    #[error("Degenerate transport grid: {0}")]
    Degenerate(String),
}

/// Options controlling a transport solve.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// Maximum number of outer iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the max relative mass error per cell.
    pub threshold: f64,
    /// Density floor, relative to the field maximum. Keeps dark regions from
    /// demanding unbounded cell growth.
    pub min_density: f64,
    /// Step halvings tried before an iteration counts as stalled.
    pub max_backtracks: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            threshold: 1e-3,
            min_density: 0.02,
            max_backtracks: 30,
        }
    }
}

/// The core trait every transport method implements.
pub trait TransportSolver {
    /// Prepare the solver for maps of `resolution x resolution` cells.
    fn init(&mut self, resolution: usize);

    /// Compute the map pushing the uniform measure onto `density`.
    fn solve(&self, density: &DensityField, options: &TransportOptions) -> Result<TransportMap, SolverError>;

    /// Human-readable name of the method.
    fn method_name(&self) -> &str;
}
