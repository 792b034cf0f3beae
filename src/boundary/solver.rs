//! Sequential minimal optimization for the one-class SVM dual.
//!
//! Minimizes `0.5 * a'Qa` subject to `0 <= a_i <= 1` and `sum(a) = nu * l`,
//! with `Q_ij = K(x_i, x_j)`. Working pairs are chosen with second-order
//! information (maximal violating pair on the gradient, partner picked by
//! the largest guaranteed objective decrease).

use std::{collections::VecDeque, rc::Rc};

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

use super::kernel::Kernel;

const UPPER: f64 = 1.0;
const TAU: f64 = 1e-12;

/// Kernel rows of the training matrix, either all precomputed or computed on
/// demand with least-recently-used eviction. Rows of `data` must be
/// contiguous (standard layout).
pub(crate) struct KernelRows<'a> {
    data: &'a Array2<f64>,
    kernel: Kernel,
    diagonal: Vec<f64>,
    rows: Vec<Option<Rc<[f64]>>>,
    recent: VecDeque<usize>,
    capacity: usize,
}

impl<'a> KernelRows<'a> {
    pub(crate) fn dense(data: &'a Array2<f64>, kernel: Kernel) -> Self {
        let n = data.nrows();
        let computed = (0..n)
            .into_par_iter()
            .map(|i| compute_row(data, kernel, i))
            .collect::<Vec<_>>();

        let diagonal = computed.iter().enumerate().map(|(i, row)| row[i]).collect();
        let rows = computed.into_iter().map(|row| Some(Rc::from(row))).collect();

        Self {
            data,
            kernel,
            diagonal,
            rows,
            recent: VecDeque::new(),
            capacity: n,
        }
    }

    pub(crate) fn cached(data: &'a Array2<f64>, kernel: Kernel, capacity: usize) -> Self {
        let n = data.nrows();
        let diagonal = (0..n)
            .map(|i| {
                let row = data.row(i);
                let x = row.as_slice().unwrap_or_default();
                kernel.eval(x, x)
            })
            .collect();

        Self {
            data,
            kernel,
            diagonal,
            rows: vec![None; n],
            recent: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.diagonal.len()
    }

    pub(crate) fn diagonal(&self) -> &[f64] {
        &self.diagonal
    }

    pub(crate) fn row(&mut self, i: usize) -> Rc<[f64]> {
        if let Some(row) = &self.rows[i] {
            let row = Rc::clone(row);
            self.touch(i);
            return row;
        }

        if self.recent.len() >= self.capacity {
            if let Some(evicted) = self.recent.pop_front() {
                self.rows[evicted] = None;
            }
        }

        let row: Rc<[f64]> = Rc::from(compute_row(self.data, self.kernel, i));
        self.rows[i] = Some(Rc::clone(&row));
        self.recent.push_back(i);
        row
    }

    fn touch(&mut self, i: usize) {
        // Dense mode never evicts, so there is nothing to reorder.
        if self.capacity >= self.rows.len() && self.recent.is_empty() {
            return;
        }
        if let Some(pos) = self.recent.iter().position(|&r| r == i) {
            self.recent.remove(pos);
            self.recent.push_back(i);
        }
    }
}

fn compute_row(data: &Array2<f64>, kernel: Kernel, i: usize) -> Vec<f64> {
    let xi = data.row(i);
    let xi = xi.as_slice().unwrap_or_default();

    (0..data.nrows())
        .into_par_iter()
        .map(|j| {
            let xj = data.row(j);
            kernel.eval(xi, xj.as_slice().unwrap_or_default())
        })
        .collect()
}

#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub alpha: Vec<f64>,
    pub rho: f64,
    /// `sum_j a_j K(x_i, x_j)` for every training row.
    pub gradient: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

pub(crate) fn solve_one_class(
    q: &mut KernelRows<'_>,
    nu: f64,
    tolerance: f64,
    max_iterations: usize,
) -> Solution {
    let l = q.len();
    let total = nu * l as f64;
    let full = (total.floor() as usize).min(l);

    let mut alpha = vec![0.0; l];
    for a in alpha.iter_mut().take(full) {
        *a = UPPER;
    }
    if full < l {
        alpha[full] = total - full as f64;
    }

    let mut gradient = exact_gradient(q, &alpha);

    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        let Some((i, j)) = select_working_set(q, &alpha, &gradient, tolerance) else {
            converged = true;
            break;
        };
        iterations += 1;

        let qi = q.row(i);
        let qj = q.row(j);
        let qd = q.diagonal();

        let old_ai = alpha[i];
        let old_aj = alpha[j];

        let mut quad = qd[i] + qd[j] - 2.0 * qi[j];
        if quad <= 0.0 {
            quad = TAU;
        }
        let delta = (gradient[i] - gradient[j]) / quad;
        let sum = old_ai + old_aj;
        let mut ai = old_ai - delta;
        let mut aj = old_aj + delta;

        if sum > UPPER {
            if ai > UPPER {
                ai = UPPER;
                aj = sum - UPPER;
            }
        } else if aj < 0.0 {
            aj = 0.0;
            ai = sum;
        }
        if sum > UPPER {
            if aj > UPPER {
                aj = UPPER;
                ai = sum - UPPER;
            }
        } else if ai < 0.0 {
            ai = 0.0;
            aj = sum;
        }

        alpha[i] = ai;
        alpha[j] = aj;

        let dai = ai - old_ai;
        let daj = aj - old_aj;
        for (k, g) in gradient.iter_mut().enumerate() {
            *g += qi[k] * dai + qj[k] * daj;
        }
    }

    debug!(
        "SMO finished after {} iteration(s), converged: {}",
        iterations, converged
    );

    // Rebuilt in support-vector order so training scores match what the stored
    // model reproduces.
    let gradient = exact_gradient(q, &alpha);
    let rho = compute_rho(&alpha, &gradient);

    Solution {
        alpha,
        rho,
        gradient,
        iterations,
        converged,
    }
}

fn exact_gradient(q: &mut KernelRows<'_>, alpha: &[f64]) -> Vec<f64> {
    let mut gradient = vec![0.0; alpha.len()];
    for (j, &a) in alpha.iter().enumerate() {
        if a > 0.0 {
            let qj = q.row(j);
            for (g, &k) in gradient.iter_mut().zip(qj.iter()) {
                *g += a * k;
            }
        }
    }
    gradient
}

fn select_working_set(
    q: &mut KernelRows<'_>,
    alpha: &[f64],
    gradient: &[f64],
    tolerance: f64,
) -> Option<(usize, usize)> {
    let mut gmax = f64::NEG_INFINITY;
    let mut gmax_idx = None;

    for (t, (&a, &g)) in alpha.iter().zip(gradient).enumerate() {
        if a < UPPER && -g >= gmax {
            gmax = -g;
            gmax_idx = Some(t);
        }
    }

    let i = gmax_idx?;
    let qi = q.row(i);
    let qd = q.diagonal();

    let mut gmax2 = f64::NEG_INFINITY;
    let mut gmin_idx = None;
    let mut obj_diff_min = f64::INFINITY;

    for (j, (&a, &g)) in alpha.iter().zip(gradient).enumerate() {
        if a <= 0.0 {
            continue;
        }

        if g >= gmax2 {
            gmax2 = g;
        }

        let grad_diff = gmax + g;
        if grad_diff > 0.0 {
            let quad = qd[i] + qd[j] - 2.0 * qi[j];
            let obj_diff = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
            if obj_diff <= obj_diff_min {
                gmin_idx = Some(j);
                obj_diff_min = obj_diff;
            }
        }
    }

    if gmax + gmax2 < tolerance {
        return None;
    }

    gmin_idx.map(|j| (i, j))
}

fn compute_rho(alpha: &[f64], gradient: &[f64]) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_min = f64::INFINITY;

    for (&a, &g) in alpha.iter().zip(gradient) {
        if a >= UPPER {
            lower = lower.max(g);
        } else if a <= 0.0 {
            upper = upper.min(g);
        } else {
            free_min = free_min.min(g);
        }
    }

    // Free vectors agree up to the stopping tolerance; the smallest one keeps
    // every margin vector on the inlier side.
    if free_min.is_finite() {
        free_min
    } else if upper.is_finite() && lower.is_finite() {
        (upper + lower) / 2.0
    } else if lower.is_finite() {
        lower
    } else {
        upper
    }
}
