//! Encapsulated PostScript point plots.
//!
//! Points in the unit square are drawn as filled dots on a 512pt page. The
//! default dot radius shrinks with the point count so that a uniform grid
//! never overlaps; `point_scale` multiplies it.

use std::io::{self, Write};

use nalgebra::Point2;

const PAGE_SIZE: f64 = 512.0;

/// Write `points` as an EPS dot plot.
pub fn write_points_eps<W: Write>(points: &[Point2<f64>], point_scale: f64, writer: &mut W) -> io::Result<()> {
    let per_side = (points.len().max(1) as f64).sqrt();
    let radius = 0.5 * PAGE_SIZE / per_side * 0.5 * point_scale;

    writeln!(writer, "%!PS-Adobe-3.0 EPSF-3.0")?;
    writeln!(writer, "%%BoundingBox: 0 0 {} {}", PAGE_SIZE as u32, PAGE_SIZE as u32)?;
    writeln!(writer, "%%Creator: caustica")?;
    writeln!(writer, "%%EndComments")?;
    writeln!(writer, "/p {{ {radius:.4} 0 360 arc fill }} def")?;
    writeln!(writer, "0 setgray")?;
    for pt in points {
        writeln!(writer, "{:.3} {:.3} p", pt.x * PAGE_SIZE, pt.y * PAGE_SIZE)?;
    }
    writeln!(writer, "showpage")?;
    writeln!(writer, "%%EOF")?;
    Ok(())
}
