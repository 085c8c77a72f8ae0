//! Run orchestration.
//!
//! A design run solves the source and target transport maps once, then
//! executes one outer pass per output label. Every pass:
//!
//! 1. rebuilds the tile from the mesh's planar grid and normalizes it,
//! 2. redistributes it (source map forward, then target map inverse),
//! 3. refines the persistent mesh towards the redistributed targets,
//! 4. hands the result to a [`SurfaceSink`] exactly once.
//!
//! The mesh carries over between passes, so later labels continue refining
//! the previous surface.

use std::path::PathBuf;
use std::time::Instant;

use caustica_geometry::export::ExportError;
use caustica_geometry::{MeshError, SurfaceMesh};
use log::{debug, info};
use thiserror::Error;

use crate::density::{DensityError, DensityField};
use crate::integration::{LeastSquaresIntegrator, NormalIntegrator};
use crate::refine::{refine_surface, RefineError, RefinementParams, SnellEstimator};
use crate::tile::{Tile, TileError};
use crate::transport::{
    GridTransportSolver, SolverError, TransportMap, TransportOptions, TransportSolver,
};
use crate::types::{
    LensParams, PassReport, RunReport, TransportReport, DEFAULT_MESH_RESOLUTION,
    REFINEMENT_ITERATIONS,
};

/// Any failure during a design run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Density(#[from] DensityError),

    #[error("Source transport failed: {0}")]
    SourceTransport(#[source] SolverError),

    #[error("Target transport failed: {0}")]
    TargetTransport(#[source] SolverError),

    #[error("Tile normalization failed: {0}")]
    Tile(#[from] TileError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Refine(#[from] RefineError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Transport maps must be solved before running a pass")]
    TransportNotSolved,
}

/// Settings of a design run.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignSettings {
    /// Mesh vertices per side.
    pub mesh_resolution: usize,
    /// Transport grid resolution; `None` uses each density's row count.
    pub map_resolution: Option<usize>,
    pub transport: TransportOptions,
    pub lens: LensParams,
    /// Refinement rounds per pass.
    pub refinement_iterations: usize,
    /// Output labels, one pass each.
    pub labels: Vec<u32>,
}

impl Default for DesignSettings {
    fn default() -> Self {
        Self {
            mesh_resolution: DEFAULT_MESH_RESOLUTION,
            map_resolution: None,
            transport: TransportOptions::default(),
            lens: LensParams::default(),
            refinement_iterations: REFINEMENT_ITERATIONS,
            labels: vec![1],
        }
    }
}

/// What a sink receives at the end of a pass.
#[derive(Debug, Clone, Copy)]
pub struct PassOutput<'a> {
    pub label: u32,
    pub mesh: &'a SurfaceMesh,
    /// The redistributed tile the surface was refined against.
    pub tile: &'a Tile,
    pub lens: &'a LensParams,
}

/// Destination for finished surfaces.
pub trait SurfaceSink {
    /// Persist one pass. Returns the files written.
    fn export(&mut self, pass: &PassOutput<'_>) -> Result<Vec<PathBuf>, ExportError>;
}

/// The source and target maps of a run.
#[derive(Debug, Clone)]
pub struct TransportPair {
    pub source: TransportMap,
    pub target: TransportMap,
    pub source_report: TransportReport,
    pub target_report: TransportReport,
}

impl TransportPair {
    /// Solve both maps with `solver`, each at `resolution` (or the density's
    /// row count).
    pub fn solve<S>(
        solver: &mut S,
        source: &DensityField,
        target: &DensityField,
        resolution: Option<usize>,
        options: &TransportOptions,
    ) -> Result<Self, PipelineError>
    where
        S: TransportSolver + ?Sized,
    {
        let (source, source_report) = solve_one(solver, source, resolution, options)
            .map_err(PipelineError::SourceTransport)?;
        let (target, target_report) = solve_one(solver, target, resolution, options)
            .map_err(PipelineError::TargetTransport)?;
        Ok(Self {
            source,
            target,
            source_report,
            target_report,
        })
    }

    /// Total `(init, solve)` seconds over both maps.
    pub fn timings(&self) -> (f64, f64) {
        (
            self.source_report.init_seconds + self.target_report.init_seconds,
            self.source_report.solve_seconds + self.target_report.solve_seconds,
        )
    }

    /// Push the tile through the source map, then pull it back through the
    /// target map. Length and order are preserved.
    pub fn redistribute(&self, tile: &mut Tile) {
        self.source.apply_forward(tile.points_mut());
        self.target.apply_inverse(tile.points_mut());
    }
}

fn solve_one<S>(
    solver: &mut S,
    density: &DensityField,
    resolution: Option<usize>,
    options: &TransportOptions,
) -> Result<(TransportMap, TransportReport), SolverError>
where
    S: TransportSolver + ?Sized,
{
    let resolution = resolution.unwrap_or_else(|| density.rows());

    let start = Instant::now();
    solver.init(resolution);
    let init_seconds = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let map = solver.solve(density, options)?;
    let solve_seconds = start.elapsed().as_secs_f64();

    info!(
        "{}: {}x{} map in {} iterations (residual {:.2e}, {:.3}s)",
        solver.method_name(),
        map.resolution(),
        map.resolution(),
        map.iterations(),
        map.residual(),
        solve_seconds
    );

    let report = TransportReport {
        resolution: map.resolution(),
        iterations: map.iterations(),
        residual: map.residual(),
        init_seconds,
        solve_seconds,
    };
    Ok((map, report))
}

/// Drives a full design run.
pub struct DesignPipeline<S = GridTransportSolver, I = LeastSquaresIntegrator> {
    settings: DesignSettings,
    solver: S,
    integrator: I,
    mesh: SurfaceMesh,
    transport: Option<TransportPair>,
}

impl DesignPipeline {
    /// Pipeline with the default grid solver and least-squares integrator.
    pub fn new(settings: DesignSettings) -> Result<Self, PipelineError> {
        Self::with_components(settings, GridTransportSolver::new(), LeastSquaresIntegrator::default())
    }
}

impl<S: TransportSolver, I: NormalIntegrator> DesignPipeline<S, I> {
    pub fn with_components(
        settings: DesignSettings,
        solver: S,
        integrator: I,
    ) -> Result<Self, PipelineError> {
        let mesh = SurfaceMesh::unit_square(settings.mesh_resolution)?;
        Ok(Self {
            settings,
            solver,
            integrator,
            mesh,
            transport: None,
        })
    }

    pub fn settings(&self) -> &DesignSettings {
        &self.settings
    }

    pub fn mesh(&self) -> &SurfaceMesh {
        &self.mesh
    }

    pub fn transport(&self) -> Option<&TransportPair> {
        self.transport.as_ref()
    }

    pub fn method_name(&self) -> &str {
        self.solver.method_name()
    }

    /// Solve the source and target maps. Must precede [`run_pass`](Self::run_pass).
    pub fn solve_transport(
        &mut self,
        source: &DensityField,
        target: &DensityField,
    ) -> Result<&TransportPair, PipelineError> {
        let pair = TransportPair::solve(
            &mut self.solver,
            source,
            target,
            self.settings.map_resolution,
            &self.settings.transport,
        )?;
        Ok(&*self.transport.insert(pair))
    }

    /// Run one outer pass and export its surface through `sink`.
    pub fn run_pass<K>(&mut self, label: u32, sink: &mut K) -> Result<PassReport, PipelineError>
    where
        K: SurfaceSink + ?Sized,
    {
        let transport = self.transport.as_ref().ok_or(PipelineError::TransportNotSolved)?;

        let start = Instant::now();
        let mut tile = Tile::from_mesh(&self.mesh);
        let bbox = tile.normalize()?;
        debug!(
            "pass {label}: tile bbox ({:.4}, {:.4}) - ({:.4}, {:.4})",
            bbox.min.x, bbox.min.y, bbox.max.x, bbox.max.y
        );
        transport.redistribute(&mut tile);
        let redistribute_seconds = start.elapsed().as_secs_f64();

        let start = Instant::now();
        let params = RefinementParams {
            iterations: self.settings.refinement_iterations,
            lens: self.settings.lens,
        };
        let normal_deviation = refine_surface(
            &mut self.mesh,
            &tile,
            &params,
            &SnellEstimator,
            &mut self.integrator,
        )?;
        let refine_seconds = start.elapsed().as_secs_f64();

        let outputs = sink.export(&PassOutput {
            label,
            mesh: &self.mesh,
            tile: &tile,
            lens: &self.settings.lens,
        })?;

        let (lo, hi) = self.mesh.height_range();
        Ok(PassReport {
            label,
            outputs: outputs.iter().map(|p| p.display().to_string()).collect(),
            normal_deviation,
            height_range: [lo, hi],
            redistribute_seconds,
            refine_seconds,
        })
    }

    /// Assemble the run report from the solved maps and finished passes.
    pub fn report(&self, passes: Vec<PassReport>) -> RunReport {
        let (source, target) = self
            .transport
            .as_ref()
            .map(|t| (t.source_report.clone(), t.target_report.clone()))
            .unwrap_or_default();
        RunReport {
            method: self.method_name().to_string(),
            mesh_resolution: self.settings.mesh_resolution,
            lens: self.settings.lens,
            source,
            target,
            passes,
        }
    }

    /// Solve both maps and run every configured pass.
    pub fn run<K>(
        &mut self,
        source: &DensityField,
        target: &DensityField,
        sink: &mut K,
    ) -> Result<RunReport, PipelineError>
    where
        K: SurfaceSink + ?Sized,
    {
        self.solve_transport(source, target)?;

        let labels = self.settings.labels.clone();
        let mut passes = Vec::with_capacity(labels.len());
        for label in labels {
            passes.push(self.run_pass(label, sink)?);
        }
        Ok(self.report(passes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[derive(Default)]
    struct RecordingSink {
        labels: Vec<u32>,
        tiles: Vec<Tile>,
    }

    impl SurfaceSink for RecordingSink {
        fn export(&mut self, pass: &PassOutput<'_>) -> Result<Vec<PathBuf>, ExportError> {
            self.labels.push(pass.label);
            self.tiles.push(pass.tile.clone());
            Ok(vec![PathBuf::from(format!("surface_{}.obj", pass.label))])
        }
    }

    fn settings(labels: Vec<u32>) -> DesignSettings {
        DesignSettings {
            mesh_resolution: 4,
            labels,
            ..DesignSettings::default()
        }
    }

    #[test]
    fn test_one_export_per_label() {
        let density = DensityField::constant(4, 4, 1.0).unwrap();
        let mut pipeline = DesignPipeline::new(settings(vec![1, 2, 5])).unwrap();
        let mut sink = RecordingSink::default();

        let report = pipeline.run(&density, &density, &mut sink).unwrap();

        assert_eq!(sink.labels, vec![1, 2, 5]);
        assert_eq!(report.passes.len(), 3);
        assert_eq!(report.passes[2].outputs, vec!["surface_5.obj".to_string()]);
        assert_eq!(report.source.resolution, 4);
        assert_eq!(report.source.iterations, 0);
    }

    #[test]
    fn test_uniform_densities_leave_tile_on_grid() {
        let density = DensityField::constant(8, 8, 0.5).unwrap();
        let mut pipeline = DesignPipeline::new(settings(vec![1])).unwrap();
        let mut sink = RecordingSink::default();
        pipeline.run(&density, &density, &mut sink).unwrap();

        let grid = pipeline.mesh().planar_points();
        let tile = &sink.tiles[0];
        assert_eq!(tile.len(), grid.len());
        for (p, g) in tile.points().iter().zip(&grid) {
            assert_relative_eq!(*p, *g, epsilon = 1e-9);
        }
        assert!(pipeline.mesh().heights().iter().all(|h| h.abs() < 1e-9));
    }

    #[test]
    fn test_pass_requires_transport() {
        let mut pipeline = DesignPipeline::new(settings(vec![1])).unwrap();
        assert!(matches!(
            pipeline.run_pass(1, &mut RecordingSink::default()),
            Err(PipelineError::TransportNotSolved)
        ));
    }

    #[test]
    fn test_map_resolution_override() {
        let density = DensityField::constant(10, 6, 1.0).unwrap();
        let mut pipeline = DesignPipeline::new(DesignSettings {
            map_resolution: Some(3),
            ..settings(vec![1])
        })
        .unwrap();
        let pair = pipeline.solve_transport(&density, &density).unwrap();
        assert_eq!(pair.source.resolution(), 3);
        assert_eq!(pair.target.resolution(), 3);
    }

    #[test]
    fn test_target_failure_is_tagged() {
        let source = DensityField::constant(4, 4, 1.0).unwrap();
        let target = DensityField::constant(4, 4, 0.0).unwrap();
        let mut pipeline = DesignPipeline::new(settings(vec![1])).unwrap();
        assert!(matches!(
            pipeline.solve_transport(&source, &target),
            Err(PipelineError::TargetTransport(SolverError::InvalidDensity(_)))
        ));
    }

    #[test]
    fn test_invalid_mesh_resolution() {
        let settings = DesignSettings {
            mesh_resolution: 1,
            ..DesignSettings::default()
        };
        assert!(matches!(
            DesignPipeline::new(settings),
            Err(PipelineError::Mesh(MeshError::InvalidResolution { .. }))
        ));
    }
}
