//! Maximum-likelihood estimation of one Dirichlet concentration vector.
//!
//! Given count rows and a per-row weight in [0, 1] (the responsibility of
//! each sample to one mixture component), `DirichletEstimator` maximizes the
//! weighted Dirichlet-multinomial log-likelihood over the concentration
//! vector alpha by damped Newton-Raphson. The Hessian of this likelihood is
//! diagonal plus rank one, so each Newton step is solved in O(taxa) via
//! Sherman-Morrison instead of a dense linear solve.

use crate::special::{digamma, trigamma};
use crate::stats::{dm_log_density, ALPHA_FLOOR, MIN_COMPONENT_MASS};
use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Step halvings attempted before falling back to a gradient step.
const MAX_HALVINGS: usize = 20;

/// Scale of the fallback step taken along the gradient direction.
const GRADIENT_STEP: f64 = 1e-3;

/// Result of one concentration-vector fit.
///
/// Convergence failure is a quality signal, not an error: the last alpha is
/// always returned and `converged` tells the caller how far the solver got.
#[derive(Debug, Clone)]
pub struct DirichletFit {
    /// Fitted concentration vector, all entries > 0.
    pub alpha: Array1<f64>,
    /// Weighted log-likelihood at `alpha`.
    pub log_likelihood: f64,
    /// Newton iterations actually performed.
    pub iterations: usize,
    /// Relative log-likelihood change fell below tolerance.
    pub converged: bool,
    /// Total responsibility mass was too small to fit; `alpha` is the
    /// initial guess.
    pub degenerate: bool,
}

/// Newton-Raphson solver configuration.
#[derive(Debug, Clone)]
pub struct DirichletEstimator {
    /// Relative log-likelihood change below which the fit stops.
    pub tolerance: f64,
    /// Iteration cap; reaching it clears the `converged` flag.
    pub max_iterations: usize,
}

impl Default for DirichletEstimator {
    fn default() -> Self {
        DirichletEstimator {
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

impl DirichletEstimator {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        DirichletEstimator {
            tolerance,
            max_iterations,
        }
    }

    /// Fits alpha to `counts` (samples x taxa) under per-row `weights`.
    ///
    /// An initial guess may be supplied (the EM loop passes the previous
    /// M-step's alpha); otherwise a weighted method-of-moments guess is used.
    pub fn fit(
        &self,
        counts: ArrayView2<f64>,
        weights: ArrayView1<f64>,
        initial: Option<&Array1<f64>>,
    ) -> DirichletFit {
        let n_taxa = counts.ncols();
        let row_totals: Array1<f64> = counts.rows().into_iter().map(|r| r.sum()).collect();
        let total_mass: f64 = weights.sum();

        let mut alpha = match initial {
            Some(a) => a.mapv(|v| v.max(ALPHA_FLOOR)),
            None => moment_initial(counts, weights, &row_totals),
        };

        if total_mass < MIN_COMPONENT_MASS {
            let ll = weighted_log_likelihood(counts, weights, alpha.view());
            return DirichletFit {
                alpha,
                log_likelihood: ll,
                iterations: 0,
                converged: false,
                degenerate: true,
            };
        }

        // Taxa with no weighted counts are pinned at the floor; a free alpha
        // there would drift without likelihood support.
        let mut supported = vec![false; n_taxa];
        for (i, row) in counts.rows().into_iter().enumerate() {
            if weights[i] <= 0.0 {
                continue;
            }
            for (j, &x) in row.iter().enumerate() {
                if x > 0.0 {
                    supported[j] = true;
                }
            }
        }
        for (j, &sup) in supported.iter().enumerate() {
            if !sup {
                alpha[j] = ALPHA_FLOOR;
            }
        }

        let mut ll = weighted_log_likelihood(counts, weights, alpha.view());
        let mut converged = false;
        let mut iterations = 0;

        for iter in 1..=self.max_iterations {
            let (grad, diag, rank_one) =
                gradient_and_hessian(counts, weights, &row_totals, alpha.view());

            let step = newton_step(&grad, &diag, rank_one);
            let (next_alpha, next_ll, improved) =
                damped_update(counts, weights, &alpha, ll, &step, &grad, &supported);
            if !improved {
                // No step improved the objective; we are as close to the
                // optimum as the damping schedule can get.
                converged = true;
                break;
            }

            let rel_change = (next_ll - ll).abs() / ll.abs().max(1.0);
            alpha = next_alpha;
            ll = next_ll;
            iterations = iter;

            if rel_change < self.tolerance {
                converged = true;
                break;
            }
        }

        debug!(
            "dirichlet fit: {} iterations, logLik {:.4}, converged {}",
            iterations, ll, converged
        );

        DirichletFit {
            alpha,
            log_likelihood: ll,
            iterations,
            converged,
            degenerate: false,
        }
    }
}

/// Weighted DM log-likelihood, skipping zero-weight rows.
pub fn weighted_log_likelihood(
    counts: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    alpha: ArrayView1<f64>,
) -> f64 {
    counts
        .rows()
        .into_iter()
        .zip(weights.iter())
        .filter(|(_, &z)| z > 0.0)
        .map(|(row, &z)| z * dm_log_density(row, alpha))
        .sum()
}

/// Analytic gradient and Hessian structure of the weighted log-likelihood.
///
/// Returns (gradient, hessian diagonal d, rank-one coefficient c) where
/// H = diag(d) + c * 1 1^T:
///   g_j = sum_i z_i [ psi(A) - psi(N_i + A) + psi(x_ij + a_j) - psi(a_j) ]
///   d_j = sum_i z_i [ psi'(x_ij + a_j) - psi'(a_j) ]
///   c   = sum_i z_i [ psi'(A) - psi'(N_i + A) ]
pub(crate) fn gradient_and_hessian(
    counts: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    row_totals: &Array1<f64>,
    alpha: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>, f64) {
    let n_taxa = alpha.len();
    let a_total: f64 = alpha.sum();
    let dig_a = digamma(a_total);
    let tri_a = trigamma(a_total);

    let mut shared = 0.0; // per-row terms common to every gradient entry
    let mut rank_one = 0.0;
    let mut grad = Array1::<f64>::zeros(n_taxa);
    let mut diag = Array1::<f64>::zeros(n_taxa);

    for (i, row) in counts.rows().into_iter().enumerate() {
        let z = weights[i];
        if z <= 0.0 {
            continue;
        }
        let n_i = row_totals[i];
        shared += z * (dig_a - digamma(n_i + a_total));
        rank_one += z * (tri_a - trigamma(n_i + a_total));

        for (j, &x) in row.iter().enumerate() {
            if x > 0.0 {
                let a_j = alpha[j];
                grad[j] += z * (digamma(x + a_j) - digamma(a_j));
                diag[j] += z * (trigamma(x + a_j) - trigamma(a_j));
            }
        }
    }

    grad += shared;
    (grad, diag, rank_one)
}

/// Newton direction H^{-1} g for H = diag(d) + c * 1 1^T, via
/// Sherman-Morrison:
///   H^{-1} g = D^{-1} g - c (1^T D^{-1} g) / (1 + c 1^T D^{-1} 1) * D^{-1} 1
///
/// Returns the gradient itself (a plain ascent direction scaled later) when
/// the diagonal is singular or the correction denominator vanishes.
fn newton_step(grad: &Array1<f64>, diag: &Array1<f64>, rank_one: f64) -> Array1<f64> {
    if diag.iter().any(|&d| d.abs() < 1e-300) {
        return grad * -GRADIENT_STEP;
    }

    let inv_diag_grad: Array1<f64> = grad / diag;
    let inv_diag_sum: f64 = diag.iter().map(|&d| 1.0 / d).sum();
    let denom = 1.0 + rank_one * inv_diag_sum;
    if denom.abs() < 1e-300 {
        return grad * -GRADIENT_STEP;
    }

    let correction = rank_one * inv_diag_grad.sum() / denom;
    let step = inv_diag_grad - diag.mapv(|d| correction / d);
    if step.iter().all(|v| v.is_finite()) {
        step
    } else {
        grad * -GRADIENT_STEP
    }
}

/// Applies `alpha - s * step`, halving s while the proposal leaves the
/// positive orthant or worsens the objective, then falls back to a small
/// gradient step. Returns (alpha, log-likelihood, improved).
#[allow(clippy::too_many_arguments)]
fn damped_update(
    counts: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    alpha: &Array1<f64>,
    current_ll: f64,
    step: &Array1<f64>,
    grad: &Array1<f64>,
    supported: &[bool],
) -> (Array1<f64>, f64, bool) {
    // Non-decreasing up to rounding counts as acceptable.
    let accept_floor = current_ll - 1e-12 * (1.0 + current_ll.abs());
    let mut scale = 1.0;

    for _ in 0..=MAX_HALVINGS {
        let proposal = propose(alpha, step, scale, supported);
        if let Some(candidate) = proposal {
            let ll = weighted_log_likelihood(counts, weights, candidate.view());
            if ll.is_finite() && ll >= accept_floor {
                let improved = ll > current_ll;
                return (candidate, ll, improved);
            }
        }
        scale *= 0.5;
    }

    // Last resort: short move along the gradient (ascent) direction.
    let grad_scale = GRADIENT_STEP / (1.0 + grad.iter().fold(0.0f64, |m, g| m.max(g.abs())));
    let fallback = grad * grad_scale;
    if let Some(candidate) = propose(alpha, &(-fallback), 1.0, supported) {
        let ll = weighted_log_likelihood(counts, weights, candidate.view());
        if ll.is_finite() && ll > current_ll {
            return (candidate, ll, true);
        }
    }

    (alpha.clone(), current_ll, false)
}

/// Candidate `alpha - scale * step`, rejecting proposals that leave the
/// positive orthant and keeping unsupported taxa pinned at the floor.
fn propose(
    alpha: &Array1<f64>,
    step: &Array1<f64>,
    scale: f64,
    supported: &[bool],
) -> Option<Array1<f64>> {
    let mut candidate = alpha - &(step * scale);
    for (j, v) in candidate.iter_mut().enumerate() {
        if !supported[j] {
            *v = ALPHA_FLOOR;
        } else if *v <= 0.0 {
            return None;
        } else if *v < ALPHA_FLOOR {
            *v = ALPHA_FLOOR;
        }
    }
    Some(candidate)
}

/// Weighted method-of-moments starting point.
///
/// Matches the Dirichlet mean to the weighted mean taxon proportions and the
/// precision A to the average of m_j (1 - m_j) / v_j - 1 over taxa with
/// usable variance.
fn moment_initial(
    counts: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    row_totals: &Array1<f64>,
) -> Array1<f64> {
    let n_taxa = counts.ncols();
    let mass: f64 = weights.sum();
    if mass <= 0.0 {
        return Array1::from_elem(n_taxa, 1.0);
    }

    let mut mean = Array1::<f64>::zeros(n_taxa);
    for (i, row) in counts.rows().into_iter().enumerate() {
        if weights[i] > 0.0 && row_totals[i] > 0.0 {
            mean += &(&row / row_totals[i] * (weights[i] / mass));
        }
    }

    let mut var = Array1::<f64>::zeros(n_taxa);
    for (i, row) in counts.rows().into_iter().enumerate() {
        if weights[i] > 0.0 && row_totals[i] > 0.0 {
            let p = &row / row_totals[i];
            let dev = &p - &mean;
            var += &(&dev * &dev * (weights[i] / mass));
        }
    }

    let mut precision_sum = 0.0;
    let mut precision_n = 0usize;
    for j in 0..n_taxa {
        let m = mean[j];
        if var[j] > 1e-12 && m > 0.0 && m < 1.0 {
            let est = m * (1.0 - m) / var[j] - 1.0;
            if est.is_finite() && est > 0.0 {
                precision_sum += est;
                precision_n += 1;
            }
        }
    }
    let precision = if precision_n > 0 {
        (precision_sum / precision_n as f64).clamp(1e-2, 1e6)
    } else {
        1.0
    };

    mean.mapv(|m| (m * precision).max(ALPHA_FLOOR))
}
