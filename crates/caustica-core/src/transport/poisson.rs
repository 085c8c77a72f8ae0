//! Neumann Poisson solver on a cell-centred `n x n` grid.
//!
//! Solves `L φ = f` where `L` is the 5-point Laplacian in index space with
//! reflecting boundaries. The DCT-II basis diagonalises `L`:
//!
//! $$ C_{k,i} = \cos\left(\frac{\pi k (i + 1/2)}{n}\right), \qquad
//!    \lambda_k = 2 \cos\left(\frac{\pi k}{n}\right) - 2 $$
//!
//! so `φ̂ = f̂ / (λ_{k_y} + λ_{k_x})`. The constant mode is dropped, which
//! solves for the mean-free part of `f`.

use ndarray::Array2;
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub(crate) struct NeumannPoisson {
    n: usize,
    basis: Array2<f64>,
    eigen: Vec<f64>,
}

impl NeumannPoisson {
    pub fn new(n: usize) -> Self {
        let nf = n as f64;
        let basis = Array2::from_shape_fn((n, n), |(k, i)| {
            (PI * k as f64 * (i as f64 + 0.5) / nf).cos()
        });
        let eigen = (0..n).map(|k| 2.0 * (PI * k as f64 / nf).cos() - 2.0).collect();
        Self { n, basis, eigen }
    }

    /// Mean-free solution `φ` of `L φ = f - mean(f)`, indexed `[row, col]`.
    pub fn solve(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let nf = self.n as f64;
        let weight = |k: usize| if k == 0 { 1.0 / nf } else { 2.0 / nf };

        let mut spectrum = self.basis.dot(rhs).dot(&self.basis.t());
        for ((ky, kx), value) in spectrum.indexed_iter_mut() {
            *value = if ky == 0 && kx == 0 {
                0.0
            } else {
                *value / (self.eigen[ky] + self.eigen[kx]) * weight(ky) * weight(kx)
            };
        }
        self.basis.t().dot(&spectrum).dot(&self.basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn neumann_laplacian(phi: &Array2<f64>) -> Array2<f64> {
        let n = phi.nrows() as isize;
        let at = |r: isize, c: isize| phi[[r.clamp(0, n - 1) as usize, c.clamp(0, n - 1) as usize]];
        Array2::from_shape_fn(phi.dim(), |(r, c)| {
            let (r, c) = (r as isize, c as isize);
            at(r - 1, c) + at(r + 1, c) + at(r, c - 1) + at(r, c + 1) - 4.0 * at(r, c)
        })
    }

    #[test]
    fn test_solution_satisfies_discrete_laplacian() {
        let n = 9;
        let rhs = Array2::from_shape_fn((n, n), |(r, c)| ((r * 7 + c * 3) % 5) as f64 - 1.3);
        let mean = rhs.mean().unwrap();
        let phi = NeumannPoisson::new(n).solve(&rhs);

        let lap = neumann_laplacian(&phi);
        for (l, f) in lap.iter().zip(rhs.iter()) {
            assert_relative_eq!(*l, f - mean, epsilon = 1e-9);
        }
        assert_relative_eq!(phi.mean().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_rhs_gives_zero() {
        let phi = NeumannPoisson::new(4).solve(&Array2::from_elem((4, 4), 2.5));
        assert!(phi.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_single_cell_grid() {
        let phi = NeumannPoisson::new(1).solve(&Array2::from_elem((1, 1), 1.0));
        assert_eq!(phi[[0, 0]], 0.0);
    }
}
