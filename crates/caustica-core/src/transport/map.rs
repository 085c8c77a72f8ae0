//! Transport maps between the uniform unit square and a density domain.
//!
//! A [`TransportMap`] of resolution `n` is a deformed copy of the regular
//! `n x n` quad grid over the unit square. Reference vertex `(i, j)` sits at
//! `(i / n, j / n)`; the map stores where it lands. Inside a cell the map is
//! the bilinear patch through the four deformed corners.
//!
//! - **Forward** (uniform → density): locate the reference cell, interpolate.
//! - **Inverse** (density → uniform): locate the deformed cell containing the
//!   point via a bin grid, invert its bilinear patch with Newton steps.
//!
//! Both directions preserve the length and order of the point slices they
//! are applied to.

use nalgebra::{Point2, Vector2};
use rayon::prelude::*;

use super::SolverError;

const NEWTON_ITERATIONS: usize = 16;
const INSIDE_TOLERANCE: f64 = 1e-9;

/// Deformed quad grid mapping the uniform measure onto a density.
#[derive(Debug, Clone)]
pub struct TransportMap {
    resolution: usize,
    vertices: Vec<Point2<f64>>,
    locator: CellLocator,
    iterations: usize,
    residual: f64,
}

impl TransportMap {
    /// The identity map on an `n x n` grid.
    pub fn identity(resolution: usize) -> Self {
        let n = resolution.max(1);
        let vertices = reference_vertices(n);
        let locator = CellLocator::build(n, &vertices);
        Self {
            resolution: n,
            vertices,
            locator,
            iterations: 0,
            residual: 0.0,
        }
    }

    /// Build a map from deformed vertex positions, `(n + 1)^2` of them in
    /// row-major order (`index = j * (n + 1) + i`).
    ///
    /// Rejects non-finite vertices and cells that are not positively oriented.
    pub fn from_vertices(
        resolution: usize,
        vertices: Vec<Point2<f64>>,
        iterations: usize,
        residual: f64,
    ) -> Result<Self, SolverError> {
        let n = resolution;
        if n == 0 || vertices.len() != (n + 1) * (n + 1) {
            return Err(SolverError::Degenerate(format!(
                "expected {} vertices for resolution {}, got {}",
                (n + 1) * (n + 1),
                n,
                vertices.len()
            )));
        }
        if let Some(i) = vertices.iter().position(|v| !(v.x.is_finite() && v.y.is_finite())) {
            return Err(SolverError::Degenerate(format!("vertex {i} is not finite")));
        }
        for j in 0..n {
            for i in 0..n {
                if !cell_is_valid(&cell_corners(&vertices, n, i, j)) {
                    return Err(SolverError::Degenerate(format!("cell ({i}, {j}) is folded")));
                }
            }
        }
        let locator = CellLocator::build(n, &vertices);
        Ok(Self {
            resolution: n,
            vertices,
            locator,
            iterations,
            residual,
        })
    }

    /// Number of cells per side.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    /// Solver iterations spent producing this map.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Max relative mass error per cell at termination.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Signed areas of the deformed cells, row-major.
    pub fn cell_areas(&self) -> Vec<f64> {
        let n = self.resolution;
        (0..n * n)
            .map(|c| quad_area(&cell_corners(&self.vertices, n, c % n, c / n)))
            .collect()
    }

    /// Push a point of the uniform square into the density domain.
    pub fn forward(&self, p: &Point2<f64>) -> Point2<f64> {
        let n = self.resolution;
        let nf = n as f64;
        let (i, s) = split_coordinate(p.x.clamp(0.0, 1.0) * nf, n);
        let (j, t) = split_coordinate(p.y.clamp(0.0, 1.0) * nf, n);
        bilinear(&cell_corners(&self.vertices, n, i, j), s, t)
    }

    /// Pull a point of the density domain back to the uniform square.
    pub fn inverse(&self, p: &Point2<f64>) -> Point2<f64> {
        let n = self.resolution;
        let q = Point2::new(
            p.x.clamp(self.locator.min.x, self.locator.max.x),
            p.y.clamp(self.locator.min.y, self.locator.max.y),
        );

        let mut best: Option<(f64, usize, f64, f64)> = None;
        let mut consider = |cell: usize| -> bool {
            let corners = cell_corners(&self.vertices, n, cell % n, cell / n);
            let (s, t) = invert_bilinear(&corners, &q);
            let range = -INSIDE_TOLERANCE..=1.0 + INSIDE_TOLERANCE;
            if range.contains(&s) && range.contains(&t) {
                best = Some((0.0, cell, s, t));
                return true;
            }
            let (sc, tc) = (s.clamp(0.0, 1.0), t.clamp(0.0, 1.0));
            let miss = (bilinear(&corners, sc, tc) - q).norm();
            if best.map_or(true, |(d, ..)| miss < d) {
                best = Some((miss, cell, sc, tc));
            }
            false
        };

        let candidates = self.locator.candidates(&q);
        if candidates.is_empty() {
            // Empty bin: fall back to an exhaustive scan
            (0..n * n).any(&mut consider);
        } else {
            candidates.iter().any(|&c| consider(c));
        }

        let (_, cell, s, t) = best.unwrap_or((0.0, 0, q.x, q.y));
        let nf = n as f64;
        Point2::new(
            (((cell % n) as f64 + s.clamp(0.0, 1.0)) / nf).clamp(0.0, 1.0),
            (((cell / n) as f64 + t.clamp(0.0, 1.0)) / nf).clamp(0.0, 1.0),
        )
    }

    /// Apply [`forward`](Self::forward) to every point in place.
    pub fn apply_forward(&self, points: &mut [Point2<f64>]) {
        points.par_iter_mut().for_each(|p| *p = self.forward(p));
    }

    /// Apply [`inverse`](Self::inverse) to every point in place.
    pub fn apply_inverse(&self, points: &mut [Point2<f64>]) {
        points.par_iter_mut().for_each(|p| *p = self.inverse(p));
    }
}

/// Regular grid vertices `(i / n, j / n)`, row-major.
pub(crate) fn reference_vertices(n: usize) -> Vec<Point2<f64>> {
    let nf = n as f64;
    (0..=n)
        .flat_map(|j| (0..=n).map(move |i| Point2::new(i as f64 / nf, j as f64 / nf)))
        .collect()
}

/// Corners `[p00, p10, p01, p11]` of cell `(i, j)`.
#[inline]
pub(crate) fn cell_corners(vertices: &[Point2<f64>], n: usize, i: usize, j: usize) -> [Point2<f64>; 4] {
    let stride = n + 1;
    let base = j * stride + i;
    [
        vertices[base],
        vertices[base + 1],
        vertices[base + stride],
        vertices[base + stride + 1],
    ]
}

/// Shoelace area of the quad `p00 → p10 → p11 → p01`.
pub(crate) fn quad_area(c: &[Point2<f64>; 4]) -> f64 {
    let ring = [c[0], c[1], c[3], c[2]];
    0.5 * (0..4)
        .map(|k| {
            let (a, b) = (ring[k], ring[(k + 1) % 4]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
}

/// The cell is a strictly convex, positively oriented quad, so the bilinear
/// patch has a positive Jacobian everywhere.
pub(crate) fn cell_is_valid(c: &[Point2<f64>; 4]) -> bool {
    let cross = |a: Point2<f64>, b: Point2<f64>, o: Point2<f64>| {
        let (u, v) = (a - o, b - o);
        u.x * v.y - u.y * v.x
    };
    cross(c[1], c[2], c[0]) > 0.0
        && cross(c[3], c[0], c[1]) > 0.0
        && cross(c[2], c[1], c[3]) > 0.0
        && cross(c[0], c[3], c[2]) > 0.0
}

#[inline]
pub(crate) fn bilinear(c: &[Point2<f64>; 4], s: f64, t: f64) -> Point2<f64> {
    let bottom = c[0].coords * (1.0 - s) + c[1].coords * s;
    let top = c[2].coords * (1.0 - s) + c[3].coords * s;
    Point2::from(bottom * (1.0 - t) + top * t)
}

/// Split a scaled coordinate into a cell index and the local offset in it.
#[inline]
fn split_coordinate(u: f64, n: usize) -> (usize, f64) {
    let i = (u.floor().max(0.0) as usize).min(n - 1);
    (i, u - i as f64)
}

/// Local coordinates `(s, t)` with `bilinear(c, s, t) ≈ p`.
fn invert_bilinear(c: &[Point2<f64>; 4], p: &Point2<f64>) -> (f64, f64) {
    let (mut s, mut t) = (0.5, 0.5);
    for _ in 0..NEWTON_ITERATIONS {
        let r: Vector2<f64> = bilinear(c, s, t) - p;
        if r.norm_squared() < 1e-30 {
            break;
        }
        let ds = (c[1] - c[0]) * (1.0 - t) + (c[3] - c[2]) * t;
        let dt = (c[2] - c[0]) * (1.0 - s) + (c[3] - c[1]) * s;
        let det = ds.x * dt.y - ds.y * dt.x;
        if det.abs() < 1e-300 {
            break;
        }
        s = (s + (-r.x * dt.y + r.y * dt.x) / det).clamp(-1.0, 2.0);
        t = (t + (-ds.x * r.y + ds.y * r.x) / det).clamp(-1.0, 2.0);
    }
    (s, t)
}

/// Uniform bin grid over the deformed domain listing the cells whose
/// bounding boxes overlap each bin.
#[derive(Debug, Clone)]
struct CellLocator {
    bins: usize,
    min: Point2<f64>,
    max: Point2<f64>,
    cells: Vec<Vec<usize>>,
}

impl CellLocator {
    fn build(n: usize, vertices: &[Point2<f64>]) -> Self {
        let bins = n.clamp(1, 512);
        let (min, max) = vertices.iter().fold(
            (vertices[0], vertices[0]),
            |(lo, hi), v| (lo.inf(v), hi.sup(v)),
        );
        let mut locator = Self {
            bins,
            min,
            max,
            cells: vec![Vec::new(); bins * bins],
        };

        for j in 0..n {
            for i in 0..n {
                let corners = cell_corners(vertices, n, i, j);
                let (lo, hi) = corners[1..]
                    .iter()
                    .fold((corners[0], corners[0]), |(lo, hi), v| (lo.inf(v), hi.sup(v)));
                let (bx0, by0) = locator.bin_of(&lo);
                let (bx1, by1) = locator.bin_of(&hi);
                for by in by0..=by1 {
                    for bx in bx0..=bx1 {
                        locator.cells[by * bins + bx].push(j * n + i);
                    }
                }
            }
        }
        locator
    }

    fn bin_of(&self, p: &Point2<f64>) -> (usize, usize) {
        let size = self.max - self.min;
        let scale = |v: f64, lo: f64, ext: f64| {
            if ext > 0.0 {
                (((v - lo) / ext * self.bins as f64).floor().max(0.0) as usize).min(self.bins - 1)
            } else {
                0
            }
        };
        (scale(p.x, self.min.x, size.x), scale(p.y, self.min.y, size.y))
    }

    fn candidates(&self, p: &Point2<f64>) -> &[usize] {
        let (bx, by) = self.bin_of(p);
        &self.cells[by * self.bins + bx]
    }
}
