//! Regular-grid surface mesh.
//!
//! The mesh is a `res_x * res_y` lattice of vertices spanning
//! `[0, width] x [0, height]`. Grid adjacency is implied by the resolution and
//! never changes; vertex `x`/`y` coordinates are fixed at construction and
//! only the heights are written afterwards.
//!
//! Vertices are indexed row-major: `index = row * res_x + col`, with `col`
//! running along x and `row` along y.

use nalgebra::{Point2, Point3, Vector3};
use thiserror::Error;

/// Errors raised by mesh construction and per-vertex operations.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Grid resolution must be at least 2x2, got {res_x}x{res_y}")]
    InvalidResolution { res_x: usize, res_y: usize },

    #[error("Mesh extent must be positive and finite, got {width} x {height}")]
    InvalidExtent { width: f64, height: f64 },

    #[error("Expected {expected} per-vertex values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid lens parameter: {0}")]
    InvalidParameter(String),

    #[error("Degenerate refraction at vertex {vertex}: {reason}")]
    DegenerateRefraction { vertex: usize, reason: String },
}

/// A height field sampled on a regular grid.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    width: f64,
    height: f64,
    res_x: usize,
    res_y: usize,
    positions: Vec<Point3<f64>>,
}

impl SurfaceMesh {
    /// Build a flat grid (all heights zero).
    pub fn grid(width: f64, height: f64, res_x: usize, res_y: usize) -> Result<Self, MeshError> {
        if res_x < 2 || res_y < 2 {
            return Err(MeshError::InvalidResolution { res_x, res_y });
        }
        if !(width > 0.0 && width.is_finite() && height > 0.0 && height.is_finite()) {
            return Err(MeshError::InvalidExtent { width, height });
        }

        let dx = width / (res_x - 1) as f64;
        let dy = height / (res_y - 1) as f64;
        let mut positions = Vec::with_capacity(res_x * res_y);
        for row in 0..res_y {
            for col in 0..res_x {
                positions.push(Point3::new(col as f64 * dx, row as f64 * dy, 0.0));
            }
        }

        Ok(Self {
            width,
            height,
            res_x,
            res_y,
            positions,
        })
    }

    /// Flat unit-square grid with `resolution * resolution` vertices.
    pub fn unit_square(resolution: usize) -> Result<Self, MeshError> {
        Self::grid(1.0, 1.0, resolution, resolution)
    }

    pub fn res_x(&self) -> usize {
        self.res_x
    }

    pub fn res_y(&self) -> usize {
        self.res_y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Grid spacing `(dx, dy)`.
    pub fn spacing(&self) -> (f64, f64) {
        (
            self.width / (self.res_x - 1) as f64,
            self.height / (self.res_y - 1) as f64,
        )
    }

    /// Linear index of the vertex at `(col, row)`.
    #[inline]
    pub fn index(&self, col: usize, row: usize) -> usize {
        row * self.res_x + col
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    /// The fixed planar layout of the vertices (their `x`, `y`).
    pub fn planar_points(&self) -> Vec<Point2<f64>> {
        self.positions.iter().map(|p| Point2::new(p.x, p.y)).collect()
    }

    pub fn heights(&self) -> Vec<f64> {
        self.positions.iter().map(|p| p.z).collect()
    }

    /// Overwrite every vertex height. `x`/`y` are left untouched.
    pub fn set_heights(&mut self, heights: &[f64]) -> Result<(), MeshError> {
        if heights.len() != self.positions.len() {
            return Err(MeshError::LengthMismatch {
                expected: self.positions.len(),
                actual: heights.len(),
            });
        }
        for (p, &z) in self.positions.iter_mut().zip(heights) {
            p.z = z;
        }
        Ok(())
    }

    /// Minimum and maximum height.
    pub fn height_range(&self) -> (f64, f64) {
        self.positions
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.z), hi.max(p.z))
            })
    }

    /// Triangulated grid faces, counter-clockwise seen from +z.
    ///
    /// Each grid cell is split along its `(col, row)`–`(col+1, row+1)` diagonal.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        let mut tris = Vec::with_capacity(2 * (self.res_x - 1) * (self.res_y - 1));
        for row in 0..self.res_y - 1 {
            for col in 0..self.res_x - 1 {
                let v00 = self.index(col, row);
                let v10 = self.index(col + 1, row);
                let v01 = self.index(col, row + 1);
                let v11 = self.index(col + 1, row + 1);
                tris.push([v00, v10, v11]);
                tris.push([v00, v11, v01]);
            }
        }
        tris
    }

    /// Boundary vertex loop, counter-clockwise seen from +z, starting at the
    /// origin corner. Each vertex appears once.
    pub fn boundary_loop(&self) -> Vec<usize> {
        let (nx, ny) = (self.res_x, self.res_y);
        let mut ring = Vec::with_capacity(2 * (nx + ny) - 4);
        for col in 0..nx {
            ring.push(self.index(col, 0));
        }
        for row in 1..ny {
            ring.push(self.index(nx - 1, row));
        }
        for col in (0..nx - 1).rev() {
            ring.push(self.index(col, ny - 1));
        }
        for row in (1..ny - 1).rev() {
            ring.push(self.index(0, row));
        }
        ring
    }

    /// Area-weighted vertex normals of the current surface.
    pub fn vertex_normals(&self) -> Vec<Vector3<f64>> {
        let mut normals = vec![Vector3::zeros(); self.positions.len()];

        for [a, b, c] in self.triangles() {
            let pa = self.positions[a];
            let e1 = self.positions[b] - pa;
            let e2 = self.positions[c] - pa;
            // Magnitude is twice the triangle area
            let n = e1.cross(&e2);
            normals[a] += n;
            normals[b] += n;
            normals[c] += n;
        }

        for n in &mut normals {
            let len = n.norm();
            if len > 1e-15 {
                *n /= len;
            }
        }
        normals
    }
}
