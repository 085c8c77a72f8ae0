//! Design runner: loads densities, drives the pipeline, writes files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::info;

use caustica_core::density::{load_density, DensityField};
use caustica_core::pipeline::{DesignPipeline, PassOutput, SurfaceSink};
use caustica_core::types::RunReport;
use caustica_geometry::export::obj::save_solid_obj;
use caustica_geometry::export::{write_file, write_grid_off, write_points_eps, ExportError};

use crate::config::{OutputSettings, RunConfig};

/// Run a full design from a resolved configuration.
pub fn run_design(config: &RunConfig) -> Result<RunReport> {
    let source = load_normalized(&config.source, "source")?;
    let target = load_normalized(&config.target, "target")?;

    let mut pipeline = DesignPipeline::new(config.design.clone())
        .context("Failed to set up the design pipeline")?;
    println!(
        "Mesh: {0}x{0} vertices, {1} refinement iterations per pass",
        config.design.mesh_resolution, config.design.refinement_iterations
    );
    println!("Transport: {}", pipeline.method_name());

    let pair = pipeline
        .solve_transport(&source, &target)
        .context("Transport solve failed")?;
    let (init, solve) = pair.timings();
    println!("STATS solver -- init: {init:.3}s  solve: {solve:.3}s");

    let mut sink = FileSink::new(&config.output);
    let mut passes = Vec::with_capacity(config.design.labels.len());
    for &label in &config.design.labels {
        let start = Instant::now();
        let pass = pipeline
            .run_pass(label, &mut sink)
            .with_context(|| format!("Design pass {label} failed"))?;
        println!(
            "Pass {}: heights [{:.4}, {:.4}], {:.2}s",
            label,
            pass.height_range[0],
            pass.height_range[1],
            start.elapsed().as_secs_f64()
        );
        passes.push(pass);
    }

    let report = pipeline.report(passes);
    if let Some(path) = &config.output.report {
        write_report_json(&report, path)?;
    }
    Ok(report)
}

/// Load a density image and scale it into `[0, 1]`.
fn load_normalized(path: &Path, role: &str) -> Result<DensityField> {
    let mut density = load_density(path)
        .with_context(|| format!("Failed to load {role} density from {}", path.display()))?;
    density.normalize_max();
    println!(
        "Loaded {role}: {} ({}x{})",
        path.display(),
        density.cols(),
        density.rows()
    );
    Ok(density)
}

/// Writes every pass to disk: the solid lens, plus the map and point plot
/// when requested.
pub struct FileSink<'a> {
    output: &'a OutputSettings,
}

impl<'a> FileSink<'a> {
    pub fn new(output: &'a OutputSettings) -> Self {
        Self { output }
    }
}

impl SurfaceSink for FileSink<'_> {
    fn export(&mut self, pass: &PassOutput<'_>) -> Result<Vec<PathBuf>, ExportError> {
        let stem = self.output.stem(pass.label);

        let obj = with_suffix(&stem, ".obj");
        save_solid_obj(pass.mesh, pass.lens.thickness, &obj)?;
        let mut written = vec![obj];

        if self.output.export_maps {
            let off = with_suffix(&stem, "_map.off");
            let targets = pass.tile.to_targets();
            write_file(&off, |w| write_grid_off(pass.mesh, &targets, w))?;

            let eps = with_suffix(&stem, "_points.eps");
            write_file(&eps, |w| write_points_eps(pass.tile.points(), self.output.ptscale, w))?;

            written.push(off);
            written.push(eps);
        }

        for path in &written {
            println!("Written: {}", path.display());
        }
        Ok(written)
    }
}

/// Append `suffix` to the final path component without touching any dots
/// already in it.
fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write the run report as pretty JSON.
pub fn write_report_json(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;

    info!("report covers {} passes", report.passes.len());
    println!("Report written to: {}", path.display());
    Ok(())
}
