//! Parser for Wavefront `.obj` mesh files.
//!
//! Reads back the solids written by [`crate::export::obj`] (or any other
//! triangle/polygon OBJ) so they can be checked for watertightness and
//! orientation. Faces are triangulated on parse (quads and n-gons use fan
//! triangulation).

use std::collections::HashMap;
use std::path::Path;

use nalgebra::Point3;

use super::ParseError;

/// A parsed triangle mesh from an OBJ file.
#[derive(Debug, Clone)]
pub struct ObjMesh {
    /// Vertex positions (0-indexed).
    pub vertices: Vec<Point3<f64>>,
    /// Triangulated face indices (0-indexed into `vertices`).
    pub faces: Vec<[usize; 3]>,
}

fn format_error(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::FormatError {
        line,
        message: message.into(),
    }
}

/// Parse OBJ text, extracting vertices and triangulated faces.
///
/// Handles `v x y z` and `f v1 v2 v3 ...` (including the `v/vt`, `v/vt/vn`
/// and `v//vn` index forms, of which only the vertex index is kept). All
/// other statements are ignored.
pub fn parse_obj(content: &str) -> Result<ObjMesh, ParseError> {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();

    for (line_idx, line) in content.lines().enumerate() {
        let line_no = line_idx + 1;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let coords = parts
                    .take(3)
                    .map(|tok| {
                        tok.parse::<f64>()
                            .map_err(|_| format_error(line_no, format!("Invalid coordinate: {tok}")))
                    })
                    .collect::<Result<Vec<f64>, ParseError>>()?;
                if coords.len() < 3 {
                    return Err(format_error(
                        line_no,
                        format!("Vertex needs 3 coordinates, got {}", coords.len()),
                    ));
                }
                vertices.push(Point3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let indices = parts
                    .map(|token| {
                        let idx_str = token.split('/').next().unwrap_or(token);
                        match idx_str.parse::<usize>() {
                            Ok(0) => Err(format_error(line_no, "Face index 0 is invalid (OBJ indices are 1-based)")),
                            Ok(idx) => Ok(idx - 1),
                            Err(_) => Err(format_error(line_no, format!("Invalid face index: {token}"))),
                        }
                    })
                    .collect::<Result<Vec<usize>, ParseError>>()?;

                if indices.len() < 3 {
                    return Err(format_error(
                        line_no,
                        format!("Face needs at least 3 vertices, got {}", indices.len()),
                    ));
                }
                for i in 1..indices.len() - 1 {
                    faces.push([indices[0], indices[i], indices[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if faces.is_empty() {
        return Err(format_error(0, "No faces found in OBJ file"));
    }
    let n = vertices.len();
    if let Some((fi, idx)) = faces
        .iter()
        .enumerate()
        .flat_map(|(fi, f)| f.iter().map(move |&idx| (fi, idx)))
        .find(|&(_, idx)| idx >= n)
    {
        return Err(format_error(
            0,
            format!(
                "Face {} references vertex {} but only {} vertices exist",
                fi + 1,
                idx + 1,
                n
            ),
        ));
    }

    Ok(ObjMesh { vertices, faces })
}

/// Read and parse an OBJ file from disk.
pub fn read_obj(path: &Path) -> Result<ObjMesh, ParseError> {
    let content = std::fs::read_to_string(path)?;
    parse_obj(&content)
}

impl ObjMesh {
    /// Axis-aligned bounding box as `(min_corner, max_corner)`.
    pub fn bounding_box(&self) -> (Point3<f64>, Point3<f64>) {
        let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for v in &self.vertices {
            min = min.inf(v);
            max = max.sup(v);
        }
        (min, max)
    }

    /// True when every directed edge is matched by exactly one opposite edge,
    /// i.e. the surface is a closed, consistently oriented 2-manifold.
    pub fn is_closed(&self) -> bool {
        let mut directed: HashMap<(usize, usize), usize> = HashMap::new();
        for &[a, b, c] in &self.faces {
            for edge in [(a, b), (b, c), (c, a)] {
                *directed.entry(edge).or_insert(0) += 1;
            }
        }
        directed
            .iter()
            .all(|(&(a, b), &count)| count == 1 && directed.get(&(b, a)) == Some(&1))
    }

    /// Signed enclosed volume; positive when faces wind outward.
    pub fn signed_volume(&self) -> f64 {
        self.faces
            .iter()
            .map(|&[a, b, c]| {
                let (pa, pb, pc) = (self.vertices[a].coords, self.vertices[b].coords, self.vertices[c].coords);
                pa.dot(&pb.cross(&pc)) / 6.0
            })
            .sum()
    }
}

#[cfg(test)]
fn cube_obj(half_size: f64) -> String {
    let h = half_size;
    format!(
        "# Unit cube\n\
         v {h} {h} -{h}\n\
         v {h} -{h} -{h}\n\
         v -{h} -{h} -{h}\n\
         v -{h} {h} -{h}\n\
         v {h} {h} {h}\n\
         v {h} -{h} {h}\n\
         v -{h} -{h} {h}\n\
         v -{h} {h} {h}\n\
         f 1 2 3 4\n\
         f 5 8 7 6\n\
         f 1 5 6 2\n\
         f 3 7 8 4\n\
         f 1 4 8 5\n\
         f 2 6 7 3\n"
    )
}
