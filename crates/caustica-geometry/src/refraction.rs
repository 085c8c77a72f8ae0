//! Refractive normal estimation.
//!
//! Collimated light travels along $+\hat{z}$ inside a material of refractive
//! index $n$ and leaves through the top surface into air. For a vertex at
//! $\mathbf{p}$ whose ray must land on the receiver point $\mathbf{q}$, the
//! outgoing direction is $\hat{\mathbf{t}} = (\mathbf{q} - \mathbf{p}) /
//! |\mathbf{q} - \mathbf{p}|$. Snell's law in vector form,
//! $n (\hat{\mathbf{i}} \times \hat{\mathbf{N}}) = \hat{\mathbf{t}} \times
//! \hat{\mathbf{N}}$, gives the required surface normal
//!
//! $$\hat{\mathbf{N}} \propto n\,\hat{\mathbf{i}} - \hat{\mathbf{t}}$$
//!
//! which always has a positive $z$ component when $n > 1$.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::mesh::{MeshError, SurfaceMesh};

/// Per-vertex normal components as three parallel arrays.
#[derive(Debug, Clone, Default)]
pub struct NormalComponents {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl NormalComponents {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Repack into one vector per vertex, preserving vertex order.
    pub fn to_vectors(&self) -> Result<Vec<Vector3<f64>>, MeshError> {
        let n = self.x.len();
        for other in [self.y.len(), self.z.len()] {
            if other != n {
                return Err(MeshError::LengthMismatch {
                    expected: n,
                    actual: other,
                });
            }
        }
        Ok((0..n)
            .map(|i| Vector3::new(self.x[i], self.y[i], self.z[i]))
            .collect())
    }
}

impl FromIterator<Vector3<f64>> for NormalComponents {
    fn from_iter<I: IntoIterator<Item = Vector3<f64>>>(iter: I) -> Self {
        let mut out = NormalComponents::default();
        for n in iter {
            out.x.push(n.x);
            out.y.push(n.y);
            out.z.push(n.z);
        }
        out
    }
}

/// Normal a surface needs at `position` to refract a `+z` ray onto `receiver`.
///
/// Returns `None` when the receiver is not strictly above the vertex.
pub fn refractive_normal(
    position: &Point3<f64>,
    receiver: &Point3<f64>,
    refractive_index: f64,
) -> Option<Vector3<f64>> {
    let outgoing = receiver - position;
    let len = outgoing.norm();
    if !(len > 1e-12) || outgoing.z <= 0.0 {
        return None;
    }
    let t = outgoing / len;
    let incident = Vector3::z();
    let n = refractive_index * incident - t;
    let n_len = n.norm();
    if !(n_len > 1e-12) {
        return None;
    }
    Some(n / n_len)
}

impl SurfaceMesh {
    /// Estimate the normal each vertex must have so that its ray lands on the
    /// matching target point, lifted by `receiver_distance` along `+z`.
    ///
    /// # Arguments
    /// * `targets` - One target point per vertex, in vertex order.
    /// * `receiver_distance` - Offset from the target plane to the receiver.
    /// * `refractive_index` - Index of the lens material (air is 1).
    pub fn refractive_normals(
        &self,
        targets: &[Point3<f64>],
        receiver_distance: f64,
        refractive_index: f64,
    ) -> Result<NormalComponents, MeshError> {
        if targets.len() != self.vertex_count() {
            return Err(MeshError::LengthMismatch {
                expected: self.vertex_count(),
                actual: targets.len(),
            });
        }
        if !(refractive_index > 1.0 && refractive_index.is_finite()) {
            return Err(MeshError::InvalidParameter(format!(
                "refractive index must exceed 1, got {refractive_index}"
            )));
        }
        if !(receiver_distance > 0.0 && receiver_distance.is_finite()) {
            return Err(MeshError::InvalidParameter(format!(
                "receiver distance must be positive, got {receiver_distance}"
            )));
        }

        let normals: Result<Vec<Vector3<f64>>, MeshError> = self
            .positions()
            .par_iter()
            .zip(targets.par_iter())
            .enumerate()
            .map(|(vertex, (p, q))| {
                let receiver = Point3::new(q.x, q.y, q.z + receiver_distance);
                refractive_normal(p, &receiver, refractive_index).ok_or_else(|| {
                    MeshError::DegenerateRefraction {
                        vertex,
                        reason: format!(
                            "receiver ({:.4}, {:.4}, {:.4}) is not above vertex ({:.4}, {:.4}, {:.4})",
                            receiver.x, receiver.y, receiver.z, p.x, p.y, p.z
                        ),
                    }
                })
            })
            .collect();

        Ok(normals?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_through_ray_needs_flat_surface() {
        let n = refractive_normal(&Point3::new(0.3, 0.3, 0.0), &Point3::new(0.3, 0.3, 2.0), 1.49)
            .unwrap();
        assert_relative_eq!(n, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_normal_satisfies_snell() {
        let p = Point3::new(0.2, 0.5, 0.1);
        let q = Point3::new(0.8, 0.1, 2.0);
        let eta = 1.49;
        let n = refractive_normal(&p, &q, eta).unwrap();
        let i = Vector3::z();
        let t = (q - p).normalize();

        // Tangential components: eta * (i x n) == t x n
        assert_relative_eq!(eta * i.cross(&n), t.cross(&n), epsilon = 1e-12);
        // Coplanar and correctly oriented
        assert!(n.z > 0.0);
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_receiver_below_vertex_is_rejected() {
        assert!(refractive_normal(&Point3::new(0.0, 0.0, 1.0), &Point3::new(0.0, 0.0, 0.5), 1.49).is_none());
    }

    #[test]
    fn test_mesh_normals_follow_vertex_order() {
        let mesh = SurfaceMesh::unit_square(3).unwrap();
        let mut targets: Vec<Point3<f64>> = mesh
            .positions()
            .iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect();
        // Bend only the last vertex toward +x
        targets[8].x += 0.5;

        let comps = mesh.refractive_normals(&targets, 2.0, 1.49).unwrap();
        assert_eq!(comps.len(), 9);
        let normals = comps.to_vectors().unwrap();
        for n in &normals[..8] {
            assert_relative_eq!(*n, Vector3::z(), epsilon = 1e-12);
        }
        // To steer the ray toward +x the surface must tilt toward -x
        assert!(normals[8].x < 0.0);
    }

    #[test]
    fn test_target_count_mismatch() {
        let mesh = SurfaceMesh::unit_square(3).unwrap();
        let err = mesh.refractive_normals(&[Point3::origin(); 4], 2.0, 1.49);
        assert!(matches!(err, Err(MeshError::LengthMismatch { expected: 9, actual: 4 })));
    }

    #[test]
    fn test_ragged_components_are_rejected() {
        let comps = NormalComponents {
            x: vec![0.0; 3],
            y: vec![0.0; 3],
            z: vec![1.0; 2],
        };
        assert!(comps.to_vectors().is_err());
    }
}
