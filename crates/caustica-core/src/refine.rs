//! The surface refinement loop.
//!
//! Each round estimates, for every mesh vertex, the normal that refracts the
//! incoming beam onto the vertex's redistributed target point, then rewrites
//! the heights so the surface follows those normals. The loop runs a fixed
//! number of rounds; the angular deviation between the surface and the
//! desired normals is recorded for diagnostics only.

use caustica_geometry::{MeshError, NormalComponents, SurfaceMesh};
use log::{debug, info};
use nalgebra::{Point3, Vector3};
use thiserror::Error;

use crate::integration::{IntegrationError, NormalIntegrator};
use crate::tile::Tile;
use crate::types::{LensParams, REFINEMENT_ITERATIONS};

/// A refinement round failed.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("Normal estimation failed in refinement iteration {iteration}: {source}")]
    Estimate {
        iteration: usize,
        #[source]
        source: MeshError,
    },

    #[error("Normal integration failed in refinement iteration {iteration}: {source}")]
    Integrate {
        iteration: usize,
        #[source]
        source: IntegrationError,
    },
}

/// Parameters of the refinement loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementParams {
    /// Number of estimate/integrate rounds.
    pub iterations: usize,
    pub lens: LensParams,
}

impl Default for RefinementParams {
    fn default() -> Self {
        Self {
            iterations: REFINEMENT_ITERATIONS,
            lens: LensParams::default(),
        }
    }
}

/// Produces the per-vertex normals that steer light onto target points.
pub trait NormalEstimator {
    fn estimate(
        &self,
        mesh: &SurfaceMesh,
        targets: &[Point3<f64>],
        lens: &LensParams,
    ) -> Result<NormalComponents, MeshError>;
}

/// Snell's-law estimator for a collimated beam travelling along `+z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnellEstimator;

impl NormalEstimator for SnellEstimator {
    fn estimate(
        &self,
        mesh: &SurfaceMesh,
        targets: &[Point3<f64>],
        lens: &LensParams,
    ) -> Result<NormalComponents, MeshError> {
        mesh.refractive_normals(targets, lens.receiver_distance, lens.refractive_index)
    }
}

/// Run the refinement loop on `mesh`, aiming each vertex at the matching
/// point of `tile`.
///
/// # Returns
/// The mean angular deviation (radians) between the surface normals and the
/// desired normals after each round.
pub fn refine_surface<E, I>(
    mesh: &mut SurfaceMesh,
    tile: &Tile,
    params: &RefinementParams,
    estimator: &E,
    integrator: &mut I,
) -> Result<Vec<f64>, RefineError>
where
    E: NormalEstimator + ?Sized,
    I: NormalIntegrator + ?Sized,
{
    let targets = tile.to_targets();
    let mut deviations = Vec::with_capacity(params.iterations);

    for iteration in 0..params.iterations {
        let normals = estimator
            .estimate(mesh, &targets, &params.lens)
            .and_then(|components| components.to_vectors())
            .map_err(|source| RefineError::Estimate { iteration, source })?;

        let stats = integrator
            .integrate(mesh, &normals)
            .map_err(|source| RefineError::Integrate { iteration, source })?;

        let deviation = mean_deviation(&mesh.vertex_normals(), &normals);
        debug!(
            "refine {}/{}: mean deviation {:.4e} rad ({} CG iterations)",
            iteration + 1,
            params.iterations,
            deviation,
            stats.iterations
        );
        deviations.push(deviation);
    }

    if let Some(last) = deviations.last() {
        info!(
            "Refinement finished after {} iterations, mean deviation {:.4e} rad",
            params.iterations, last
        );
    }
    Ok(deviations)
}

/// Mean angle between paired unit vectors.
fn mean_deviation(actual: &[Vector3<f64>], desired: &[Vector3<f64>]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let total: f64 = actual
        .iter()
        .zip(desired)
        .map(|(a, d)| a.dot(d).clamp(-1.0, 1.0).acos())
        .sum();
    total / actual.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{IntegrationStats, LeastSquaresIntegrator};
    use approx::assert_relative_eq;

    /// Integrator that records its calls and leaves the mesh alone.
    #[derive(Default)]
    struct CountingIntegrator {
        calls: usize,
        lengths: Vec<usize>,
        fail_at: Option<usize>,
    }

    impl NormalIntegrator for CountingIntegrator {
        fn integrate(
            &mut self,
            mesh: &mut SurfaceMesh,
            normals: &[Vector3<f64>],
        ) -> Result<IntegrationStats, IntegrationError> {
            self.calls += 1;
            self.lengths.push(normals.len());
            if self.fail_at == Some(self.calls - 1) {
                return Err(IntegrationError::NonFinite { vertex: 0 });
            }
            assert_eq!(normals.len(), mesh.vertex_count());
            Ok(IntegrationStats {
                iterations: 0,
                residual: 0.0,
            })
        }
    }

    #[test]
    fn test_integrator_called_exactly_k_times() {
        let mut mesh = SurfaceMesh::unit_square(4).unwrap();
        let tile = Tile::from_mesh(&mesh);
        let mut integrator = CountingIntegrator::default();

        let deviations = refine_surface(
            &mut mesh,
            &tile,
            &RefinementParams::default(),
            &SnellEstimator,
            &mut integrator,
        )
        .unwrap();

        assert_eq!(integrator.calls, REFINEMENT_ITERATIONS);
        assert_eq!(deviations.len(), REFINEMENT_ITERATIONS);
        assert!(integrator.lengths.iter().all(|&n| n == 16));
    }

    #[test]
    fn test_targets_above_vertices_keep_surface_flat() {
        let mut mesh = SurfaceMesh::unit_square(5).unwrap();
        let tile = Tile::from_mesh(&mesh);
        let params = RefinementParams {
            iterations: 3,
            ..RefinementParams::default()
        };
        let deviations = refine_surface(
            &mut mesh,
            &tile,
            &params,
            &SnellEstimator,
            &mut LeastSquaresIntegrator::default(),
        )
        .unwrap();

        assert_eq!(deviations.len(), 3);
        for d in deviations {
            assert_relative_eq!(d, 0.0, epsilon = 1e-9);
        }
        assert!(mesh.heights().iter().all(|h| h.abs() < 1e-12));
        assert_eq!(tile.len(), mesh.vertex_count());
    }

    #[test]
    fn test_integrator_failure_names_iteration() {
        let mut mesh = SurfaceMesh::unit_square(3).unwrap();
        let tile = Tile::from_mesh(&mesh);
        let mut integrator = CountingIntegrator {
            fail_at: Some(2),
            ..CountingIntegrator::default()
        };
        let err = refine_surface(
            &mut mesh,
            &tile,
            &RefinementParams::default(),
            &SnellEstimator,
            &mut integrator,
        )
        .unwrap_err();
        assert!(matches!(err, RefineError::Integrate { iteration: 2, .. }));
        assert_eq!(integrator.calls, 3);
    }

    #[test]
    fn test_tile_size_mismatch_fails_estimation() {
        let mut mesh = SurfaceMesh::unit_square(3).unwrap();
        let tile = Tile::new(vec![nalgebra::Point2::new(0.5, 0.5); 4]);
        let err = refine_surface(
            &mut mesh,
            &tile,
            &RefinementParams::default(),
            &SnellEstimator,
            &mut CountingIntegrator::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RefineError::Estimate { iteration: 0, .. }));
    }

    #[test]
    fn test_pulled_targets_bend_surface() {
        let mut mesh = SurfaceMesh::unit_square(9).unwrap();
        // Squeeze every target towards the centre
        let points = mesh
            .planar_points()
            .into_iter()
            .map(|p| nalgebra::Point2::new(0.5 + 0.8 * (p.x - 0.5), 0.5 + 0.8 * (p.y - 0.5)))
            .collect();
        let tile = Tile::new(points);
        refine_surface(
            &mut mesh,
            &tile,
            &RefinementParams::default(),
            &SnellEstimator,
            &mut LeastSquaresIntegrator::default(),
        )
        .unwrap();

        let (lo, hi) = mesh.height_range();
        assert!(hi - lo > 1e-3);
        assert!(mesh.heights().iter().all(|h| h.is_finite()));
        // Converging lens: centre sits above the corners
        let centre = mesh.positions()[mesh.index(4, 4)].z;
        let corner = mesh.positions()[mesh.index(0, 0)].z;
        assert!(centre > corner);
    }
}
