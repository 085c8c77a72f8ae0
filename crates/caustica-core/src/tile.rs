//! Point tiles and bounding-box normalization.
//!
//! A [`Tile`] is the ordered working set of 2D points that is pushed through
//! the transport maps. Index `i` always refers to mesh vertex `i`; tiles are
//! mutated in place and never resized.

use caustica_geometry::SurfaceMesh;
use nalgebra::{Point2, Point3};
use thiserror::Error;

/// Extents at or below this are treated as degenerate.
const MIN_EXTENT: f64 = 1e-12;

/// Errors raised by tile normalization.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("Cannot normalize an empty tile")]
    Empty,

    #[error("Degenerate tile: extent along {axis} is {extent:e} (min {min}, max {max})")]
    DegenerateExtent {
        axis: char,
        extent: f64,
        min: f64,
        max: f64,
    },
}

/// Axis-aligned bounding box of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point2<f64>,
    pub max: Point2<f64>,
}

impl BoundingBox {
    pub fn extent(&self) -> [f64; 2] {
        [self.max.x - self.min.x, self.max.y - self.min.y]
    }
}

/// An ordered sequence of 2D points, one per mesh vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    points: Vec<Point2<f64>>,
}

impl Tile {
    pub fn new(points: Vec<Point2<f64>>) -> Self {
        Self { points }
    }

    /// The planar vertex layout of `mesh`, in vertex order.
    pub fn from_mesh(mesh: &SurfaceMesh) -> Self {
        Self::new(mesh.planar_points())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Point2<f64>] {
        &mut self.points
    }

    /// Bounding box, with every accumulator seeded from the first point.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let (first, rest) = self.points.split_first()?;
        let mut bbox = BoundingBox {
            min: *first,
            max: *first,
        };
        for p in rest {
            bbox.min = bbox.min.inf(p);
            bbox.max = bbox.max.sup(p);
        }
        Some(bbox)
    }

    /// Translate and scale the tile in place so its bounding box becomes the
    /// unit square.
    ///
    /// Returns the bounding box the tile had before normalization. On error
    /// the tile is left unmodified.
    pub fn normalize(&mut self) -> Result<BoundingBox, TileError> {
        let bbox = self.bounding_box().ok_or(TileError::Empty)?;
        let size = bbox.extent();

        for (axis, min, max) in [('x', bbox.min.x, bbox.max.x), ('y', bbox.min.y, bbox.max.y)] {
            let extent = max - min;
            if !(extent.is_finite() && extent > MIN_EXTENT) {
                return Err(TileError::DegenerateExtent {
                    axis,
                    extent,
                    min,
                    max,
                });
            }
        }

        for p in &mut self.points {
            p.x = (p.x - bbox.min.x) / size[0];
            p.y = (p.y - bbox.min.y) / size[1];
        }
        Ok(bbox)
    }

    /// Lift every point onto the `z = 0` plane, preserving order.
    pub fn to_targets(&self) -> Vec<Point3<f64>> {
        self.points.iter().map(|p| Point3::new(p.x, p.y, 0.0)).collect()
    }
}
