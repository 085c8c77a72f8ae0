//! Wavefront OBJ export of a solidified surface.
//!
//! The top of the solid is the mesh height field; the bottom is a flat plane
//! `thickness` below the lowest vertex, and side walls close the boundary.
//! All triangles are wound counter-clockwise seen from outside.

use std::io::{self, Write};
use std::path::Path;

use crate::mesh::SurfaceMesh;

use super::{write_file, ExportError};

/// Write `mesh` as a closed solid to the given writer.
pub fn write_solid_obj<W: Write>(mesh: &SurfaceMesh, thickness: f64, writer: &mut W) -> io::Result<()> {
    let n = mesh.vertex_count();
    let (min_z, max_z) = mesh.height_range();
    let base = min_z - thickness;

    let top = mesh.triangles();
    let ring = mesh.boundary_loop();
    let n_faces = 2 * top.len() + 2 * ring.len();

    writeln!(writer, "# Caustica solid surface")?;
    writeln!(
        writer,
        "# Grid: {}x{}, thickness: {}, height range: [{:.6}, {:.6}]",
        mesh.res_x(),
        mesh.res_y(),
        thickness,
        min_z,
        max_z
    )?;
    writeln!(writer, "# Vertices: {}, Triangles: {}", 2 * n, n_faces)?;

    // Top surface, then bottom plane (same x/y)
    for p in mesh.positions() {
        writeln!(writer, "v {:.8} {:.8} {:.8}", p.x, p.y, p.z)?;
    }
    for p in mesh.positions() {
        writeln!(writer, "v {:.8} {:.8} {:.8}", p.x, p.y, base)?;
    }

    // OBJ indices are 1-based
    let top_idx = |i: usize| i + 1;
    let bot_idx = |i: usize| n + i + 1;

    for &[a, b, c] in &top {
        writeln!(writer, "f {} {} {}", top_idx(a), top_idx(b), top_idx(c))?;
    }
    for &[a, b, c] in &top {
        writeln!(writer, "f {} {} {}", bot_idx(a), bot_idx(c), bot_idx(b))?;
    }

    // Side walls: the ring runs counter-clockwise, so the outside is to the right
    for k in 0..ring.len() {
        let a = ring[k];
        let b = ring[(k + 1) % ring.len()];
        writeln!(writer, "f {} {} {}", top_idx(a), bot_idx(a), bot_idx(b))?;
        writeln!(writer, "f {} {} {}", top_idx(a), bot_idx(b), top_idx(b))?;
    }

    Ok(())
}

/// Write `mesh` as a closed solid OBJ file at `path`.
pub fn save_solid_obj(mesh: &SurfaceMesh, thickness: f64, path: &Path) -> Result<(), ExportError> {
    if !(thickness > 0.0 && thickness.is_finite()) {
        return Err(ExportError::InvalidParameter(format!(
            "solid thickness must be positive, got {thickness}"
        )));
    }
    write_file(path, |w| write_solid_obj(mesh, thickness, w))
}
