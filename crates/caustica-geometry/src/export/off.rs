//! OFF export of a grid-topology mesh over arbitrary vertex positions.
//!
//! Used to dump transport maps: the vertices are the redistributed points laid
//! out in mesh order, the faces are the mesh's grid triangles.

use std::io::{self, Write};

use nalgebra::Point3;

use crate::mesh::SurfaceMesh;

/// Write `points` (one per vertex of `topology`) as an OFF triangle mesh.
pub fn write_grid_off<W: Write>(
    topology: &SurfaceMesh,
    points: &[Point3<f64>],
    writer: &mut W,
) -> io::Result<()> {
    if points.len() != topology.vertex_count() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "expected {} points for a {}x{} grid, got {}",
                topology.vertex_count(),
                topology.res_x(),
                topology.res_y(),
                points.len()
            ),
        ));
    }

    let tris = topology.triangles();
    writeln!(writer, "OFF")?;
    writeln!(writer, "{} {} 0", points.len(), tris.len())?;
    for p in points {
        writeln!(writer, "{:.8} {:.8} {:.8}", p.x, p.y, p.z)?;
    }
    for [a, b, c] in tris {
        writeln!(writer, "3 {a} {b} {c}")?;
    }
    Ok(())
}
