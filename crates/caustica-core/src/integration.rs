//! Height-field reconstruction from target normals.
//!
//! A surface `z = h(x, y)` with unit normal `n` has slopes
//! `∂h/∂x = -n_x / n_z` and `∂h/∂y = -n_y / n_z`. Along every grid edge
//! `a → b` this prescribes a height difference `g_ab`; the integrator finds
//! the heights minimising
//!
//! $$ \sum_{(a, b)} \left( h_b - h_a - g_{ab} \right)^2 $$
//!
//! whose normal equations are the graph-Laplacian system `L h = div g`. The
//! system is solved with Jacobi-preconditioned conjugate gradients, warm
//! started from the current heights. The free constant is fixed by keeping
//! the mean height unchanged.

use caustica_geometry::{MeshError, SurfaceMesh};
use log::{debug, warn};
use nalgebra::Vector3;
use rayon::prelude::*;
use thiserror::Error;

/// Smallest `n_z` accepted before a normal counts as tangent to the plane.
const MIN_NORMAL_Z: f64 = 1e-9;

/// Errors that can occur while integrating normals into heights.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Expected {expected} normals, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Normal at vertex {vertex} is degenerate: {normal:?}")]
    DegenerateNormal { vertex: usize, normal: [f64; 3] },

    #[error("Integration produced a non-finite height at vertex {vertex}")]
    NonFinite { vertex: usize },

    #[error(transparent)]
    Mesh(#[from] MeshError),
}

/// Outcome of one integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationStats {
    pub iterations: usize,
    /// Relative residual `|b - L h| / |b|` at exit.
    pub residual: f64,
}

/// Anything that can rewrite mesh heights so the surface follows a normal field.
pub trait NormalIntegrator {
    fn integrate(
        &mut self,
        mesh: &mut SurfaceMesh,
        normals: &[Vector3<f64>],
    ) -> Result<IntegrationStats, IntegrationError>;
}

/// Least-squares gradient integration on the mesh grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresIntegrator {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for LeastSquaresIntegrator {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 2000,
        }
    }
}

impl NormalIntegrator for LeastSquaresIntegrator {
    fn integrate(
        &mut self,
        mesh: &mut SurfaceMesh,
        normals: &[Vector3<f64>],
    ) -> Result<IntegrationStats, IntegrationError> {
        if normals.len() != mesh.vertex_count() {
            return Err(IntegrationError::LengthMismatch {
                expected: mesh.vertex_count(),
                actual: normals.len(),
            });
        }

        let slopes = normals
            .iter()
            .enumerate()
            .map(|(vertex, n)| {
                if !(n.z > MIN_NORMAL_Z && n.iter().all(|c| c.is_finite())) {
                    return Err(IntegrationError::DegenerateNormal {
                        vertex,
                        normal: [n.x, n.y, n.z],
                    });
                }
                Ok((-n.x / n.z, -n.y / n.z))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let grid = GridLaplacian::new(mesh.res_x(), mesh.res_y());
        let rhs = grid.divergence(&slopes, mesh.spacing());

        let mut heights = mesh.heights();
        let mean = heights.iter().sum::<f64>() / heights.len() as f64;
        let stats = grid.conjugate_gradient(&rhs, &mut heights, self.max_iterations, self.tolerance);
        if stats.residual > self.tolerance {
            warn!(
                "Normal integration stopped after {} iterations (residual {:.2e})",
                stats.iterations, stats.residual
            );
        } else {
            debug!(
                "Normal integration converged in {} iterations (residual {:.2e})",
                stats.iterations, stats.residual
            );
        }

        let shift = mean - heights.iter().sum::<f64>() / heights.len() as f64;
        for (vertex, h) in heights.iter_mut().enumerate() {
            *h += shift;
            if !h.is_finite() {
                return Err(IntegrationError::NonFinite { vertex });
            }
        }

        mesh.set_heights(&heights)?;
        Ok(stats)
    }
}

/// Unweighted 4-neighbour Laplacian of a `res_x * res_y` vertex grid.
struct GridLaplacian {
    res_x: usize,
    res_y: usize,
}

impl GridLaplacian {
    fn new(res_x: usize, res_y: usize) -> Self {
        Self { res_x, res_y }
    }

    fn len(&self) -> usize {
        self.res_x * self.res_y
    }

    fn neighbours(&self, v: usize) -> impl Iterator<Item = usize> {
        let (col, row) = (v % self.res_x, v / self.res_x);
        let (rx, ry) = (self.res_x, self.res_y);
        [
            (col > 0).then(|| v - 1),
            (col + 1 < rx).then(|| v + 1),
            (row > 0).then(|| v - rx),
            (row + 1 < ry).then(|| v + rx),
        ]
        .into_iter()
        .flatten()
    }

    fn diagonal(&self, v: usize) -> f64 {
        self.neighbours(v).count() as f64
    }

    /// `y = L x`
    fn apply(&self, x: &[f64], y: &mut [f64]) {
        y.par_iter_mut().enumerate().for_each(|(v, out)| {
            let sum: f64 = self.neighbours(v).map(|u| x[u]).sum();
            *out = self.diagonal(v) * x[v] - sum;
        });
    }

    /// Right-hand side `b` of the normal equations: each edge `a → b` with
    /// target difference `g` adds `g` at `b` and `-g` at `a`.
    fn divergence(&self, slopes: &[(f64, f64)], (dx, dy): (f64, f64)) -> Vec<f64> {
        let mut b = vec![0.0; self.len()];
        for row in 0..self.res_y {
            for col in 0..self.res_x {
                let a = row * self.res_x + col;
                if col + 1 < self.res_x {
                    let g = 0.5 * (slopes[a].0 + slopes[a + 1].0) * dx;
                    b[a + 1] += g;
                    b[a] -= g;
                }
                if row + 1 < self.res_y {
                    let up = a + self.res_x;
                    let g = 0.5 * (slopes[a].1 + slopes[up].1) * dy;
                    b[up] += g;
                    b[a] -= g;
                }
            }
        }
        b
    }

    /// Jacobi-preconditioned CG on the singular but consistent system `L x = b`.
    fn conjugate_gradient(
        &self,
        b: &[f64],
        x: &mut [f64],
        max_iterations: usize,
        tolerance: f64,
    ) -> IntegrationStats {
        let n = self.len();
        let dot = |u: &[f64], v: &[f64]| -> f64 { u.par_iter().zip(v).map(|(a, b)| a * b).sum() };
        let inv_diag: Vec<f64> = (0..n)
            .map(|v| {
                let d = self.diagonal(v);
                if d > 0.0 { 1.0 / d } else { 1.0 }
            })
            .collect();

        let mut ax = vec![0.0; n];
        self.apply(x, &mut ax);
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
        let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(ri, mi)| ri * mi).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let b_norm = dot(b, b).sqrt().max(1e-15);

        let mut ap = vec![0.0; n];
        let mut residual = dot(&r, &r).sqrt() / b_norm;
        let mut iterations = 0;
        while iterations < max_iterations && residual > tolerance {
            self.apply(&p, &mut ap);
            let pap = dot(&p, &ap);
            if pap.abs() < 1e-30 {
                break;
            }
            let alpha = rz / pap;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }
            for i in 0..n {
                z[i] = r[i] * inv_diag[i];
            }
            let rz_new = dot(&r, &z);
            let beta = rz_new / rz.max(1e-30);
            rz = rz_new;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
            iterations += 1;
            residual = dot(&r, &r).sqrt() / b_norm;
        }

        IntegrationStats {
            iterations,
            residual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_normals_keep_flat_surface() {
        let mut mesh = SurfaceMesh::unit_square(6).unwrap();
        let normals = vec![Vector3::z(); mesh.vertex_count()];
        LeastSquaresIntegrator::default()
            .integrate(&mut mesh, &normals)
            .unwrap();
        assert!(mesh.heights().iter().all(|h| h.abs() < 1e-12));
    }

    #[test]
    fn test_tilted_normals_recover_plane() {
        let mut mesh = SurfaceMesh::grid(2.0, 1.0, 9, 5).unwrap();
        let (a, b) = (0.3, -0.7);
        let normal = Vector3::new(-a, -b, 1.0).normalize();
        let normals = vec![normal; mesh.vertex_count()];
        LeastSquaresIntegrator::default()
            .integrate(&mut mesh, &normals)
            .unwrap();

        let heights = mesh.heights();
        let mean = heights.iter().sum::<f64>() / heights.len() as f64;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-9);
        for p in mesh.positions() {
            assert_relative_eq!(p.z, a * (p.x - 1.0) + b * (p.y - 0.5), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_mean_height_is_preserved() {
        let mut mesh = SurfaceMesh::unit_square(4).unwrap();
        mesh.set_heights(&vec![0.25; 16]).unwrap();
        let normal = Vector3::new(0.1, 0.0, 1.0).normalize();
        LeastSquaresIntegrator::default()
            .integrate(&mut mesh, &vec![normal; 16])
            .unwrap();
        let mean = mesh.heights().iter().sum::<f64>() / 16.0;
        assert_relative_eq!(mean, 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_horizontal_normal_is_rejected() {
        let mut mesh = SurfaceMesh::unit_square(3).unwrap();
        let mut normals = vec![Vector3::z(); 9];
        normals[4] = Vector3::x();
        match LeastSquaresIntegrator::default().integrate(&mut mesh, &normals) {
            Err(IntegrationError::DegenerateNormal { vertex, .. }) => assert_eq!(vertex, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_length_mismatch() {
        let mut mesh = SurfaceMesh::unit_square(3).unwrap();
        assert!(matches!(
            LeastSquaresIntegrator::default().integrate(&mut mesh, &[Vector3::z()]),
            Err(IntegrationError::LengthMismatch { expected: 9, actual: 1 })
        ));
    }
}
