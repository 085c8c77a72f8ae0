//! Core types shared across the Caustica pipeline.
//!
//! Lens parameters, default constants and the serialisable run report.

use serde::{Deserialize, Serialize};

/// Refractive index of acrylic (PMMA), the default lens material.
pub const DEFAULT_REFRACTIVE_INDEX: f64 = 1.49;

/// Distance from the lens to the receiver plane, in mesh units.
pub const DEFAULT_RECEIVER_DISTANCE: f64 = 2.0;

/// Thickness added below the lowest surface point when solidifying.
pub const DEFAULT_SOLID_THICKNESS: f64 = 0.2;

/// Number of estimate/integrate rounds in the refinement loop.
pub const REFINEMENT_ITERATIONS: usize = 20;

/// Default mesh grid resolution (vertices per side).
pub const DEFAULT_MESH_RESOLUTION: usize = 100;

/// Physical description of the lens being designed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LensParams {
    /// Refractive index of the lens material (air is 1).
    pub refractive_index: f64,
    /// Distance from the lens to the receiver plane.
    pub receiver_distance: f64,
    /// Solid thickness below the surface on export.
    pub thickness: f64,
}

impl Default for LensParams {
    fn default() -> Self {
        Self {
            refractive_index: DEFAULT_REFRACTIVE_INDEX,
            receiver_distance: DEFAULT_RECEIVER_DISTANCE,
            thickness: DEFAULT_SOLID_THICKNESS,
        }
    }
}

/// Outcome of one transport solve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportReport {
    /// Grid resolution of the transport map.
    pub resolution: usize,
    /// Iterations the solver used.
    pub iterations: usize,
    /// Final max relative mass error per cell.
    pub residual: f64,
    /// Wall-clock time of `init` (s).
    pub init_seconds: f64,
    /// Wall-clock time of `solve` (s).
    pub solve_seconds: f64,
}

/// Outcome of one outer pass (one exported surface).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassReport {
    /// Output label of this pass.
    pub label: u32,
    /// Files written by the export sink.
    pub outputs: Vec<String>,
    /// Mean angle (rad) between mesh normals and desired normals, per iteration.
    pub normal_deviation: Vec<f64>,
    /// Height range `[min, max]` of the final surface.
    pub height_range: [f64; 2],
    /// Time spent redistributing the tile (s).
    pub redistribute_seconds: f64,
    /// Time spent in the refinement loop (s).
    pub refine_seconds: f64,
}

/// Complete record of a design run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Transport solver in use.
    pub method: String,
    /// Mesh vertices per side.
    pub mesh_resolution: usize,
    pub lens: LensParams,
    pub source: TransportReport,
    pub target: TransportReport,
    pub passes: Vec<PassReport>,
}
