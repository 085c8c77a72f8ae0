//! Mesh-morphing transport solver on a regular grid.
//!
//! The uniform measure is carried onto a density by moving the vertices of an
//! `n x n` quad grid until every deformed cell holds the same mass. Cell mass
//! is the 3x3 Gauss rule for `∫_cell ρ` over the bilinear patch, with `ρ`
//! interpolated between the resampled cell values.
//!
//! The solve runs in two phases:
//!
//! 1. **Flow start.** The Moser flow `ẋ = ∇ψ / ρ_t`, with `Δψ = 1 - ρ` and
//!    `ρ_t = (1 - t) + t ρ`, carries the uniform measure onto `ρ` at `t = 1`.
//!    Integrating it for every vertex gives a fold-free grid that is already
//!    close to balanced, whatever the contrast.
//! 2. **Polish.** Gauss-Newton on the cell excess `e = m - M / n^2`. The
//!    minimum-norm step `u = Jᵀ y` with `J Jᵀ y = -e` uses the exact Jacobian
//!    of the quadrature masses, so it is always a descent direction for
//!    `|e|`. `J Jᵀ` is solved by conjugate gradients preconditioned with the
//!    diagonally scaled Neumann Poisson inverse. The step is backtracked
//!    until `|e|` drops and every cell stays convex.
//!
//! If the polish stalls from the flow start, the solve restarts from the
//! identity and polishes through a continuation `ρ^α`, `α = 1/s .. 1`, with
//! the contrast doubling at each stage.
//!
//! Iteration stops once `max_c |e_c| / (M / n^2)` falls below the threshold.
//! The iteration budget is shared across phases and stages.

use log::{debug, trace};
use nalgebra::{Point2, Vector2};
use ndarray::Array2;
use rayon::prelude::*;

use super::map::{cell_corners, cell_is_valid, reference_vertices};
use super::poisson::NeumannPoisson;
use super::{SolverError, TransportMap, TransportOptions, TransportSolver};
use crate::density::DensityField;

/// Nodes and weights of the 3-point Gauss-Legendre rule on `[0, 1]`.
const GAUSS: [(f64, f64); 3] = [
    (0.112_701_665_379_258_3, 5.0 / 18.0),
    (0.5, 8.0 / 18.0),
    (0.887_298_334_620_741_7, 5.0 / 18.0),
];

/// Largest flow step, as a fraction of the reference cell size.
const FLOW_STEP_FRACTION: f64 = 0.25;
/// Largest flow step in time, so `ρ_t` is resolved even where `∇ψ` is small.
const MAX_FLOW_DT: f64 = 1.0 / 32.0;
const MAX_FLOW_STEPS: usize = 100_000;

/// Inexact Gauss-Newton: the normal equations are solved to this relative
/// residual.
const CG_TOLERANCE: f64 = 1e-2;
const CG_MAX_ITERATIONS: usize = 200;

/// Intermediate continuation stages only need a rough balance.
const STAGE_THRESHOLD: f64 = 0.05;
const MAX_STAGES: usize = 8;

/// Poisson mesh-morphing solver. Call [`init`](TransportSolver::init) before
/// [`solve`](TransportSolver::solve); the factorised Poisson operator is
/// reused across solves at the same resolution.
#[derive(Debug, Clone, Default)]
pub struct GridTransportSolver {
    resolution: usize,
    poisson: Option<NeumannPoisson>,
}

impl GridTransportSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }
}

impl TransportSolver for GridTransportSolver {
    fn init(&mut self, resolution: usize) {
        let resolution = resolution.max(1);
        if self.poisson.is_none() || self.resolution != resolution {
            debug!("Preparing {resolution}x{resolution} Poisson operator");
            self.poisson = Some(NeumannPoisson::new(resolution));
            self.resolution = resolution;
        }
    }

    fn solve(
        &self,
        density: &DensityField,
        options: &TransportOptions,
    ) -> Result<TransportMap, SolverError> {
        let poisson = self.poisson.as_ref().ok_or(SolverError::NotInitialised)?;
        let n = self.resolution;
        let target = resample(density, n, options.min_density)?;
        let mut budget = Budget::new(options.max_iterations);

        let field = Field::new(target.clone());
        let morph = Morph::new(&field, poisson, options.max_backtracks);
        let start = moser_flow(&field, poisson);
        match morph.relax(start, options.threshold, &mut budget) {
            Ok((vertices, residual)) => {
                debug!("Transport converged after {} iterations (residual {residual:.3e})", budget.used);
                return TransportMap::from_vertices(n, vertices, budget.used, residual);
            }
            Err(SolverError::Stalled { iteration, residual }) => debug!(
                "Flow start stalled at iteration {iteration} (residual {residual:.3e}); continuing from the identity"
            ),
            Err(SolverError::Degenerate(reason)) => {
                debug!("Flow start rejected ({reason}); continuing from the identity")
            }
            Err(err) => return Err(err),
        }

        let schedule = continuation_schedule(&target);
        let mut vertices = reference_vertices(n);
        let mut residual = f64::INFINITY;
        for (stage, &alpha) in schedule.iter().enumerate() {
            let last = stage + 1 == schedule.len();
            let threshold = if last {
                options.threshold
            } else {
                options.threshold.max(STAGE_THRESHOLD)
            };
            let stage_field = Field::new(sharpen(&target, alpha));
            let stage_morph = Morph::new(&stage_field, poisson, options.max_backtracks);
            let (next, stage_residual) = stage_morph.relax(vertices, threshold, &mut budget)?;
            trace!(
                "continuation stage {}/{} (alpha {alpha:.3}): residual {stage_residual:.3e} after {} iterations",
                stage + 1,
                schedule.len(),
                budget.used
            );
            vertices = next;
            residual = stage_residual;
        }
        debug!("Transport converged after {} iterations (residual {residual:.3e})", budget.used);
        TransportMap::from_vertices(n, vertices, budget.used, residual)
    }

    fn method_name(&self) -> &str {
        "Poisson mesh morphing"
    }
}

/// Outer iterations spent so far against the caller's cap.
#[derive(Debug, Clone, Copy)]
struct Budget {
    used: usize,
    limit: usize,
}

impl Budget {
    fn new(limit: usize) -> Self {
        Self { used: 0, limit }
    }
}

/// Target density on the cell grid, sampled bilinearly between cell centres
/// and clamped at the border.
struct Field {
    cells: Array2<f64>,
}

impl Field {
    fn new(cells: Array2<f64>) -> Self {
        Self { cells }
    }

    fn resolution(&self) -> usize {
        self.cells.nrows()
    }

    /// Value and gradient at `p`.
    fn sample(&self, p: &Point2<f64>) -> (f64, Vector2<f64>) {
        let n = self.resolution();
        let nf = n as f64;
        let top = (n - 1) as f64;
        let (ux, uy) = (p.x * nf - 0.5, p.y * nf - 0.5);
        let (u, v) = (ux.clamp(0.0, top), uy.clamp(0.0, top));
        let (i0, j0) = (u.floor() as usize, v.floor() as usize);
        let (i1, j1) = ((i0 + 1).min(n - 1), (j0 + 1).min(n - 1));
        let (fu, fv) = (u - i0 as f64, v - j0 as f64);

        let c = &self.cells;
        let (c00, c10, c01, c11) = (c[[j0, i0]], c[[j0, i1]], c[[j1, i0]], c[[j1, i1]]);
        let value = (c00 * (1.0 - fu) + c10 * fu) * (1.0 - fv) + (c01 * (1.0 - fu) + c11 * fu) * fv;

        let dx = if ux > 0.0 && ux < top {
            ((c10 - c00) * (1.0 - fv) + (c11 - c01) * fv) * nf
        } else {
            0.0
        };
        let dy = if uy > 0.0 && uy < top {
            ((c01 - c00) * (1.0 - fu) + (c11 - c10) * fu) * nf
        } else {
            0.0
        };
        (value, Vector2::new(dx, dy))
    }
}

/// Quadrature mass of one cell and its gradient with respect to the corners
/// `[p00, p10, p01, p11]`.
struct CellMass {
    mass: f64,
    grads: [Vector2<f64>; 4],
}

impl CellMass {
    /// `None` when the cell is not a convex, positively oriented quad.
    fn measure(corners: &[Point2<f64>; 4], field: &Field) -> Option<Self> {
        if !cell_is_valid(corners) {
            return None;
        }
        let mut mass = 0.0;
        let mut grads = [Vector2::zeros(); 4];
        for &(s, ws) in &GAUSS {
            for &(t, wt) in &GAUSS {
                let weight = ws * wt;
                let shape = [(1.0 - s) * (1.0 - t), s * (1.0 - t), (1.0 - s) * t, s * t];
                let d_s = [-(1.0 - t), 1.0 - t, -t, t];
                let d_t = [-(1.0 - s), -s, 1.0 - s, s];

                let mut x = Vector2::zeros();
                let mut xs = Vector2::zeros();
                let mut xt = Vector2::zeros();
                for k in 0..4 {
                    x += corners[k].coords * shape[k];
                    xs += corners[k].coords * d_s[k];
                    xt += corners[k].coords * d_t[k];
                }
                let det = xs.x * xt.y - xs.y * xt.x;
                let (rho, grad) = field.sample(&Point2::from(x));
                mass += weight * rho * det;

                for k in 0..4 {
                    let d_det = Vector2::new(d_s[k] * xt.y - d_t[k] * xs.y, d_t[k] * xs.x - d_s[k] * xt.x);
                    grads[k] += (d_det * rho + grad * (det * shape[k])) * weight;
                }
            }
        }
        Some(Self { mass, grads })
    }
}

/// Per-cell mass bookkeeping for one vertex configuration.
struct MassState {
    cells: Vec<CellMass>,
    /// `e_c = m_c - M / n^2`.
    excess: Vec<f64>,
    max_error: f64,
    l2_error: f64,
}

/// Gauss-Newton balancing of cell masses against one field.
struct Morph<'a> {
    n: usize,
    field: &'a Field,
    poisson: &'a NeumannPoisson,
    max_backtracks: usize,
}

impl<'a> Morph<'a> {
    fn new(field: &'a Field, poisson: &'a NeumannPoisson, max_backtracks: usize) -> Self {
        Self {
            n: field.resolution(),
            field,
            poisson,
            max_backtracks,
        }
    }

    /// `None` when any cell is folded.
    fn measure(&self, vertices: &[Point2<f64>]) -> Option<MassState> {
        let n = self.n;
        let cells = (0..n * n)
            .into_par_iter()
            .map(|c| CellMass::measure(&cell_corners(vertices, n, c % n, c / n), self.field))
            .collect::<Option<Vec<_>>>()?;

        let goal = cells.iter().map(|c| c.mass).sum::<f64>() / (n * n) as f64;
        if !(goal > 0.0 && goal.is_finite()) {
            return None;
        }
        let excess: Vec<f64> = cells.iter().map(|c| c.mass - goal).collect();
        let max_error = excess.iter().fold(0.0_f64, |acc, e| acc.max(e.abs())) / goal;
        let l2_error = norm(&excess);
        Some(MassState {
            cells,
            excess,
            max_error,
            l2_error,
        })
    }

    /// Polish `vertices` until the max relative error drops to `threshold`.
    /// Returns the balanced vertices and their residual.
    fn relax(
        &self,
        mut vertices: Vec<Point2<f64>>,
        threshold: f64,
        budget: &mut Budget,
    ) -> Result<(Vec<Point2<f64>>, f64), SolverError> {
        let mut state = self
            .measure(&vertices)
            .ok_or_else(|| SolverError::Degenerate("starting grid is folded".into()))?;
        let mut step = 1.0_f64;

        loop {
            if state.max_error <= threshold {
                return Ok((vertices, state.max_error));
            }
            if budget.used >= budget.limit {
                return Err(SolverError::ConvergenceFailure {
                    max_iter: budget.used,
                    residual: state.max_error,
                });
            }

            let direction = self.descent_direction(&state);
            match self.line_search(&vertices, &state, &direction, (2.0 * step).min(1.0)) {
                Some((next_vertices, next_state, tau)) => {
                    vertices = next_vertices;
                    state = next_state;
                    step = tau;
                    budget.used += 1;
                    trace!(
                        "iteration {}: step {tau:.3e}, max error {:.3e}, l2 {:.3e}",
                        budget.used,
                        state.max_error,
                        state.l2_error
                    );
                }
                None => {
                    debug!(
                        "Transport stalled at iteration {} (residual {:.3e})",
                        budget.used, state.max_error
                    );
                    return Err(SolverError::Stalled {
                        iteration: budget.used,
                        residual: state.max_error,
                    });
                }
            }
        }
    }

    /// Halve the step from `first_step` until `|e|` drops without folding.
    fn line_search(
        &self,
        vertices: &[Point2<f64>],
        state: &MassState,
        direction: &[Vector2<f64>],
        first_step: f64,
    ) -> Option<(Vec<Point2<f64>>, MassState, f64)> {
        let mut tau = first_step;
        for _ in 0..self.max_backtracks {
            let trial = displace(vertices, direction, tau);
            if let Some(next) = self.measure(&trial) {
                if next.l2_error < state.l2_error {
                    return Some((trial, next, tau));
                }
            }
            tau *= 0.5;
        }
        None
    }

    /// Minimum-norm Gauss-Newton step, or a scaled steepest-descent step when
    /// conjugate gradients makes no headway.
    fn descent_direction(&self, state: &MassState) -> Vec<Vector2<f64>> {
        let rhs: Vec<f64> = state.excess.iter().map(|e| -e).collect();
        let rhs_norm = norm(&rhs);
        let scale: Vec<f64> = self
            .normal_diagonal(state)
            .into_iter()
            .map(|d| if d > 0.0 { d.sqrt().recip() } else { 0.0 })
            .collect();
        let normal = |y: &[f64]| self.jacobian(state, &self.jacobian_transpose(state, y));

        let mut y = vec![0.0; rhs.len()];
        let mut r = rhs.clone();
        let mut z = self.precondition(&scale, &r);
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        for _ in 0..CG_MAX_ITERATIONS {
            if norm(&r) <= CG_TOLERANCE * rhs_norm || !(rz > 0.0) {
                break;
            }
            let ap = normal(&p);
            let pap = dot(&p, &ap);
            if !(pap > 0.0) {
                break;
            }
            let alpha = rz / pap;
            for k in 0..y.len() {
                y[k] += alpha * p[k];
                r[k] -= alpha * ap[k];
            }
            z = self.precondition(&scale, &r);
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            for k in 0..p.len() {
                p[k] = z[k] + beta * p[k];
            }
            rz = rz_next;
        }
        if norm(&r) < rhs_norm {
            return self.jacobian_transpose(state, &y);
        }

        let gradient = self.jacobian_transpose(state, &rhs);
        let image = self.jacobian(state, &gradient);
        let (gg, jj) = (
            gradient.iter().map(|g| g.norm_squared()).sum::<f64>(),
            dot(&image, &image),
        );
        let tau = if jj > 0.0 { gg / jj } else { 0.0 };
        gradient.into_iter().map(|g| g * tau).collect()
    }

    /// `P J u`: mass change per cell for a vertex displacement, mean removed.
    fn jacobian(&self, state: &MassState, u: &[Vector2<f64>]) -> Vec<f64> {
        let n = self.n;
        let mut out: Vec<f64> = state
            .cells
            .par_iter()
            .enumerate()
            .map(|(c, cell)| {
                corner_indices(n, c)
                    .iter()
                    .zip(&cell.grads)
                    .map(|(&v, g)| g.dot(&u[v]))
                    .sum::<f64>()
            })
            .collect();
        remove_mean(&mut out);
        out
    }

    /// `Jᵀ P y` restricted to the free vertex components.
    fn jacobian_transpose(&self, state: &MassState, y: &[f64]) -> Vec<Vector2<f64>> {
        let n = self.n;
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let mut u = vec![Vector2::zeros(); (n + 1) * (n + 1)];
        for (c, cell) in state.cells.iter().enumerate() {
            let w = y[c] - mean;
            for (&v, g) in corner_indices(n, c).iter().zip(&cell.grads) {
                u[v] += g * w;
            }
        }
        for (v, d) in u.iter_mut().enumerate() {
            *d = d.component_mul(&free_components(n, v));
        }
        u
    }

    /// Diagonal of `J Jᵀ`, ignoring the mean projection.
    fn normal_diagonal(&self, state: &MassState) -> Vec<f64> {
        let n = self.n;
        state
            .cells
            .iter()
            .enumerate()
            .map(|(c, cell)| {
                corner_indices(n, c)
                    .iter()
                    .zip(&cell.grads)
                    .map(|(&v, g)| g.component_mul(&free_components(n, v)).norm_squared())
                    .sum::<f64>()
            })
            .collect()
    }

    /// `-S L⁺ S r` with `S = diag(scale)`.
    fn precondition(&self, scale: &[f64], r: &[f64]) -> Vec<f64> {
        let n = self.n;
        let scaled = Array2::from_shape_fn((n, n), |(j, i)| r[j * n + i] * scale[j * n + i]);
        let phi = self.poisson.solve(&scaled);
        (0..n * n).map(|c| -phi[[c / n, c % n]] * scale[c]).collect()
    }
}

/// Vertex indices of cell `c` in corner order `[p00, p10, p01, p11]`.
#[inline]
fn corner_indices(n: usize, c: usize) -> [usize; 4] {
    let stride = n + 1;
    let base = (c / n) * stride + c % n;
    [base, base + 1, base + stride, base + stride + 1]
}

/// Components of vertex `v` free to move: border vertices slide along their
/// edge, corners stay.
#[inline]
fn free_components(n: usize, v: usize) -> Vector2<f64> {
    let (vi, vj) = (v % (n + 1), v / (n + 1));
    let free = |k: usize| if k == 0 || k == n { 0.0 } else { 1.0 };
    Vector2::new(free(vi), free(vj))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn remove_mean(values: &mut [f64]) {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter_mut().for_each(|v| *v -= mean);
}

/// Integrate the Moser flow from `t = 0` to `1` for every reference vertex.
fn moser_flow(field: &Field, poisson: &NeumannPoisson) -> Vec<Point2<f64>> {
    let n = field.resolution();
    let h = 1.0 / n as f64;
    let rhs = field.cells.mapv(|rho| (1.0 - rho) * h * h);
    let gradient = vertex_gradient(&poisson.solve(&rhs), n);
    let max_move = FLOW_STEP_FRACTION * h;

    let velocity = |p: &Point2<f64>, t: f64| -> Vector2<f64> {
        let (rho, _) = field.sample(p);
        interpolate_vertices(&gradient, n, p) / ((1.0 - t) + t * rho).max(f64::MIN_POSITIVE)
    };

    reference_vertices(n)
        .into_par_iter()
        .map(|start| {
            let mut p = start;
            let mut t = 0.0_f64;
            for _ in 0..MAX_FLOW_STEPS {
                if t >= 1.0 {
                    break;
                }
                let k1 = velocity(&p, t);
                let speed = k1.norm();
                if !speed.is_finite() {
                    break;
                }
                let dt = if speed > 0.0 { max_move / speed } else { MAX_FLOW_DT }
                    .min(MAX_FLOW_DT)
                    .min(1.0 - t);
                let k2 = velocity(&clamp_unit(p + k1 * (0.5 * dt)), t + 0.5 * dt);
                let k3 = velocity(&clamp_unit(p + k2 * (0.5 * dt)), t + 0.5 * dt);
                let k4 = velocity(&clamp_unit(p + k3 * dt), t + dt);
                p = clamp_unit(p + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0));
                t += dt;
            }
            p
        })
        .collect()
}

/// `∇ψ` at each grid vertex, averaged from the four surrounding cells.
/// Normal components vanish on the border so the square maps onto itself.
fn vertex_gradient(psi: &Array2<f64>, n: usize) -> Vec<Vector2<f64>> {
    let last = n as isize - 1;
    let at = |i: isize, j: isize| psi[[j.clamp(0, last) as usize, i.clamp(0, last) as usize]];
    let h2 = 2.0 / n as f64;

    let mut gradient = Vec::with_capacity((n + 1) * (n + 1));
    for vj in 0..=n {
        for vi in 0..=n {
            let (i, j) = (vi as isize, vj as isize);
            let gx = (at(i, j - 1) + at(i, j) - at(i - 1, j - 1) - at(i - 1, j)) / h2;
            let gy = (at(i - 1, j) + at(i, j) - at(i - 1, j - 1) - at(i, j - 1)) / h2;
            gradient.push(Vector2::new(gx, gy).component_mul(&free_components(n, vj * (n + 1) + vi)));
        }
    }
    gradient
}

/// Bilinear interpolation of a per-vertex field on the reference grid.
fn interpolate_vertices(values: &[Vector2<f64>], n: usize, p: &Point2<f64>) -> Vector2<f64> {
    let split = |u: f64| {
        let i = (u.floor().max(0.0) as usize).min(n - 1);
        (i, (u - i as f64).clamp(0.0, 1.0))
    };
    let (i, s) = split(p.x * n as f64);
    let (j, t) = split(p.y * n as f64);
    let at = |i: usize, j: usize| values[j * (n + 1) + i];
    (at(i, j) * (1.0 - s) + at(i + 1, j) * s) * (1.0 - t) + (at(i, j + 1) * (1.0 - s) + at(i + 1, j + 1) * s) * t
}

fn clamp_unit(p: Point2<f64>) -> Point2<f64> {
    Point2::new(p.x.clamp(0.0, 1.0), p.y.clamp(0.0, 1.0))
}

fn displace(vertices: &[Point2<f64>], direction: &[Vector2<f64>], tau: f64) -> Vec<Point2<f64>> {
    vertices
        .iter()
        .zip(direction)
        .map(|(p, d)| clamp_unit(p + d * tau))
        .collect()
}

/// Stage exponents `α_k = k / s` with `s = ⌈log2(max / min)⌉`, so the
/// contrast of `ρ^α` doubles from one stage to the next.
fn continuation_schedule(target: &Array2<f64>) -> Vec<f64> {
    let (lo, hi) = target
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let ratio = hi / lo;
    let stages = if ratio.is_finite() {
        (ratio.log2().ceil().max(1.0) as usize).min(MAX_STAGES)
    } else {
        MAX_STAGES
    };
    (1..=stages).map(|k| k as f64 / stages as f64).collect()
}

/// `ρ^α` rescaled to unit mean.
fn sharpen(target: &Array2<f64>, alpha: f64) -> Array2<f64> {
    let mut cells = target.mapv(|v| v.powf(alpha));
    let mean = cells.mean().unwrap_or(1.0);
    if mean > 0.0 {
        cells.mapv_inplace(|v| v / mean);
    }
    cells
}

/// Box-filter the density onto `n x n` cells, clamp to `min_density * max`
/// and scale to unit mean.
fn resample(density: &DensityField, n: usize, min_density: f64) -> Result<Array2<f64>, SolverError> {
    let total = density.total_mass();
    if !(total > 0.0 && total.is_finite()) {
        return Err(SolverError::InvalidDensity(format!(
            "density has no positive mass (total {total})"
        )));
    }
    let wy = box_weights(density.rows(), n);
    let wx = box_weights(density.cols(), n);
    let mut cells = wy.dot(density.values()).dot(&wx.t());
    let max = cells.iter().cloned().fold(0.0_f64, f64::max);
    let floor = min_density.max(0.0) * max;
    cells.mapv_inplace(|v| v.max(floor));
    let mean = cells.sum() / (n * n) as f64;
    if !(mean > 0.0) {
        return Err(SolverError::InvalidDensity(
            "density vanishes after flooring; raise min_density".into(),
        ));
    }
    cells.mapv_inplace(|v| v / mean);
    Ok(cells)
}

/// Row-stochastic overlap weights from `src` samples to `dst` bins on `[0, 1]`.
fn box_weights(src: usize, dst: usize) -> Array2<f64> {
    let (sf, df) = (src as f64, dst as f64);
    let mut weights = Array2::<f64>::zeros((dst, src));
    for d in 0..dst {
        let (lo, hi) = (d as f64 / df, (d + 1) as f64 / df);
        let first = ((lo * sf).floor() as usize).min(src - 1);
        let last = ((hi * sf).ceil() as usize).clamp(first + 1, src);
        for s in first..last {
            let overlap = (hi.min((s + 1) as f64 / sf) - lo.max(s as f64 / sf)).max(0.0);
            weights[[d, s]] = overlap * df;
        }
    }
    weights
}
