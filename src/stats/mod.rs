//! Statistical core: Dirichlet-multinomial mixture fitting and scoring.
//!
//! `estimator` holds the per-component Newton-Raphson maximum-likelihood fit,
//! `mixture` the EM loop around it, and `scoring` the model-comparison
//! criteria (log-likelihood, Laplace, AIC, BIC). This module provides the
//! shared pieces: the fail-fast error taxonomy and the Dirichlet-multinomial
//! log density itself.

pub mod estimator;
pub mod mixture;
pub mod scoring;

pub use estimator::{DirichletEstimator, DirichletFit};
pub use mixture::{MixtureEm, MixtureModel};
pub use scoring::{score_model, ModelScore};

use ndarray::ArrayView1;
use statrs::function::gamma::ln_gamma;
use thiserror::Error;

/// Floor applied to every concentration entry. Keeps digamma/trigamma
/// arguments safely positive and likelihoods non-degenerate.
pub const ALPHA_FLOOR: f64 = 1e-6;

/// A component whose total responsibility mass falls below this is treated
/// as empty: the estimator returns its initial guess unchanged.
pub const MIN_COMPONENT_MASS: f64 = 1e-8;

/// Errors raised by input validation, before any iteration begins.
///
/// Numerical trouble during a fit is never an error: non-convergence and
/// Hessian fallbacks are surfaced as flags on the returned model/score so
/// callers can decide how much to trust the result.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("count table has no samples or no taxa")]
    EmptyTable,

    #[error("count at sample {row}, taxon {col} is negative ({value})")]
    NegativeCount { row: usize, col: usize, value: f64 },

    #[error("count at sample {row}, taxon {col} is not finite")]
    NonFiniteCount { row: usize, col: usize },

    #[error("sample {row} has zero total count; remove it before fitting")]
    ZeroRow { row: usize },

    #[error("taxon {col} has zero total count; remove it before fitting")]
    ZeroColumn { col: usize },

    #[error("invalid component count k = {k} for {n_samples} samples")]
    InvalidComponentCount { k: usize, n_samples: usize },

    #[error("label vector length {got} does not match sample count {expected}")]
    LabelMismatch { expected: usize, got: usize },

    #[error("no candidate k range supplied for group '{0}'")]
    UnknownGroup(String),

    #[error("fold references sample index {index} outside 0..{n_samples}")]
    InvalidFold { index: usize, n_samples: usize },

    #[error("fold leaves no training samples for any group")]
    EmptyTrainingSet,

    #[error("ROC analysis needs at least one positive and one negative label")]
    SingleClassRoc,

    #[error("ROC score at index {index} is not finite")]
    NonFiniteScore { index: usize },

    #[error("parallel dispatch failed: {0}")]
    Parallel(String),
}

/// Fail-fast validation of a sample x taxon count matrix.
///
/// Rejects empty matrices, negative or non-finite entries, all-zero rows
/// (a sample with no counts has no likelihood contribution and would poison
/// the responsibility normalization) and all-zero columns (a taxon never
/// observed has no identifiable concentration).
pub fn validate_counts(counts: ndarray::ArrayView2<f64>) -> Result<(), FitError> {
    if counts.nrows() == 0 || counts.ncols() == 0 {
        return Err(FitError::EmptyTable);
    }
    let mut column_totals = vec![0.0f64; counts.ncols()];
    for (row, r) in counts.rows().into_iter().enumerate() {
        let mut total = 0.0;
        for (col, &value) in r.iter().enumerate() {
            if !value.is_finite() {
                return Err(FitError::NonFiniteCount { row, col });
            }
            if value < 0.0 {
                return Err(FitError::NegativeCount { row, col, value });
            }
            total += value;
            column_totals[col] += value;
        }
        if total <= 0.0 {
            return Err(FitError::ZeroRow { row });
        }
    }
    for (col, &total) in column_totals.iter().enumerate() {
        if total <= 0.0 {
            return Err(FitError::ZeroColumn { col });
        }
    }
    Ok(())
}

/// Log density of the Dirichlet-multinomial distribution for one count row.
///
/// ln DM(x | alpha) = ln G(A) - ln G(N + A)
///                  + sum_j [ ln G(x_j + alpha_j) - ln G(alpha_j) ]
/// with A = sum alpha_j and N = sum x_j.
///
/// The multinomial coefficient ln(N! / prod x_j!) is omitted throughout the
/// crate: it is constant per sample, so it cancels in responsibilities and in
/// group posteriors, and shifts every model's score by the same amount.
pub fn dm_log_density(counts: ArrayView1<f64>, alpha: ArrayView1<f64>) -> f64 {
    debug_assert_eq!(counts.len(), alpha.len());

    let a_total: f64 = alpha.sum();
    let n_total: f64 = counts.sum();

    let mut ll = ln_gamma(a_total) - ln_gamma(n_total + a_total);
    for (&x, &a) in counts.iter().zip(alpha.iter()) {
        if x > 0.0 {
            ll += ln_gamma(x + a) - ln_gamma(a);
        }
    }
    ll
}

/// Numerically stable ln(sum exp(v_j)) over a slice of log values.
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn dm_log_density_uniform_alpha() {
        // With alpha = (1, 1), A = 2, the DM density (without the
        // multinomial coefficient) for x = (2, 1) is
        // G(2)/G(5) * G(3) G(2) / (G(1) G(1)) = (1/24) * 2 = 1/12.
        let x = array![2.0, 1.0];
        let alpha = array![1.0, 1.0];
        let ll = dm_log_density(x.view(), alpha.view());
        assert_relative_eq!(ll, (1.0f64 / 12.0).ln(), max_relative = 1e-12);
    }

    #[test]
    fn dm_log_density_skips_zero_counts() {
        // Zero-count taxa contribute ln G(0 + a) - ln G(a) = 0; skipping
        // them must not change the value.
        let x = array![3.0, 0.0, 2.0];
        let alpha = array![0.5, 0.7, 1.3];
        let explicit: f64 = {
            use statrs::function::gamma::ln_gamma;
            let a_total = 2.5f64;
            let n_total = 5.0f64;
            ln_gamma(a_total) - ln_gamma(n_total + a_total)
                + (ln_gamma(3.0 + 0.5) - ln_gamma(0.5))
                + (ln_gamma(0.0 + 0.7) - ln_gamma(0.7))
                + (ln_gamma(2.0 + 1.3) - ln_gamma(1.3))
        };
        assert_relative_eq!(
            dm_log_density(x.view(), alpha.view()),
            explicit,
            max_relative = 1e-12
        );
    }

    #[test]
    fn validate_counts_rejects_dead_taxon_column() {
        let counts = array![[5.0, 0.0], [3.0, 0.0]];
        assert!(matches!(
            validate_counts(counts.view()),
            Err(FitError::ZeroColumn { col: 1 })
        ));

        let ok = array![[5.0, 1.0], [3.0, 0.0]];
        assert!(validate_counts(ok.view()).is_ok());
    }

    #[test]
    fn log_sum_exp_handles_large_negatives() {
        let vals = [-1000.0, -1001.0];
        let expected = -1000.0 + (1.0 + (-1.0f64).exp()).ln();
        assert_relative_eq!(log_sum_exp(&vals), expected, max_relative = 1e-12);
    }

    #[test]
    fn log_sum_exp_empty_is_neg_infinity() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }
}
