//! Expectation-maximization fitting of a k-component Dirichlet-multinomial
//! mixture.
//!
//! `MixtureEm` alternates responsibility computation (E-step) with
//! per-component concentration re-estimation through
//! [`DirichletEstimator`](super::DirichletEstimator) (M-step) until the total
//! log-likelihood stabilizes. The fitted [`MixtureModel`] is immutable once
//! returned; re-running the engine produces a new model rather than mutating
//! an old one.

use crate::stats::{
    dm_log_density, log_sum_exp, validate_counts, DirichletEstimator, FitError,
};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Soft weight given to the winning cluster when the k-means style hard
/// partition is converted to initial responsibilities.
const INIT_SOFTNESS: f64 = 0.9;

/// Iterations of the initialization partition refinement.
const INIT_KMEANS_ROUNDS: usize = 10;

/// A fitted k-component Dirichlet-multinomial mixture.
///
/// Serializable as (weights, k x taxa concentration matrix, samples x k
/// responsibility matrix, scalar log-likelihood); reconstructing from that
/// representation reproduces identical scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureModel {
    /// Mixture weights, length k, non-negative, summing to 1.
    pub weights: Array1<f64>,
    /// Concentration vectors, one row per component (k x taxa), all > 0.
    pub alphas: Array2<f64>,
    /// Responsibilities from the final E-step (samples x k, rows sum to 1).
    pub responsibilities: Array2<f64>,
    /// Total log-likelihood at the final E-step.
    pub log_likelihood: f64,
    /// EM iterations performed.
    pub iterations: usize,
    /// Whether the relative log-likelihood change met tolerance.
    pub converged: bool,
}

impl MixtureModel {
    /// Number of mixture components.
    pub fn k(&self) -> usize {
        self.weights.len()
    }

    /// Number of taxa the model was fitted over.
    pub fn n_taxa(&self) -> usize {
        self.alphas.ncols()
    }

    /// Log marginal likelihood of one count row under this mixture:
    /// ln sum_j w_j DM(x | alpha_j), computed in log space.
    pub fn sample_log_marginal(&self, counts: ArrayView1<f64>) -> f64 {
        let terms: Vec<f64> = self
            .weights
            .iter()
            .zip(self.alphas.rows())
            .map(|(&w, alpha)| w.ln() + dm_log_density(counts, alpha))
            .collect();
        log_sum_exp(&terms)
    }

    /// Expected taxon proportions per component (each alpha row normalized
    /// by its total), for reporting community-type profiles.
    pub fn component_proportions(&self) -> Array2<f64> {
        let mut props = self.alphas.clone();
        for mut row in props.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        props
    }

    /// Hard component assignment per sample (argmax responsibility).
    pub fn hard_assignments(&self) -> Vec<usize> {
        self.responsibilities
            .rows()
            .into_iter()
            .map(|row| argmax(row))
            .collect()
    }
}

fn argmax(row: ArrayView1<f64>) -> usize {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// EM engine for a fixed number of components.
#[derive(Debug, Clone)]
pub struct MixtureEm {
    /// Number of mixture components, k >= 1.
    pub k: usize,
    /// Relative log-likelihood change below which EM stops.
    pub tolerance: f64,
    /// EM iteration cap.
    pub max_iterations: usize,
    /// Seed for the initialization partition; drawn from the OS when absent.
    pub seed: Option<u64>,
    estimator: DirichletEstimator,
}

impl MixtureEm {
    pub fn new(k: usize) -> Self {
        MixtureEm {
            k,
            tolerance: 1e-6,
            max_iterations: 100,
            seed: None,
            estimator: DirichletEstimator::default(),
        }
    }

    /// Set the EM convergence tolerance (also used by the inner solver).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self.estimator.tolerance = tolerance.min(self.estimator.tolerance);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Fix the initialization seed for reproducible fits.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fits the mixture to `counts` (samples x taxa).
    ///
    /// Fails fast on invalid input; numerical trouble during the fit is
    /// reported through the `converged` flag instead.
    pub fn fit(&self, counts: ArrayView2<f64>) -> Result<MixtureModel, FitError> {
        validate_counts(counts)?;
        let n_samples = counts.nrows();
        let n_taxa = counts.ncols();
        if self.k == 0 || self.k > n_samples {
            return Err(FitError::InvalidComponentCount {
                k: self.k,
                n_samples,
            });
        }

        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut responsibilities = self.initial_responsibilities(counts, seed);
        let mut alphas = Array2::<f64>::zeros((self.k, n_taxa));
        let mut weights = Array1::<f64>::zeros(self.k);

        let mut prev_ll = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 1..=self.max_iterations {
            // M-step: refit each component over all samples, weighted by the
            // current responsibilities; the previous alpha warm-starts the
            // Newton solver after the first round.
            for j in 0..self.k {
                let column = responsibilities.column(j).to_owned();
                let warm = if iter == 1 {
                    None
                } else {
                    Some(alphas.row(j).to_owned())
                };
                let fit = self
                    .estimator
                    .fit(counts, column.view(), warm.as_ref());
                alphas.row_mut(j).assign(&fit.alpha);
                weights[j] = column.sum() / n_samples as f64;
            }
            let weight_total = weights.sum();
            weights /= weight_total; // guard against responsibility rounding

            // E-step: posterior over components per sample, log-space.
            log_likelihood = 0.0;
            for (i, row) in counts.rows().into_iter().enumerate() {
                let logp: Vec<f64> = weights
                    .iter()
                    .zip(alphas.rows())
                    .map(|(&w, alpha)| w.ln() + dm_log_density(row, alpha))
                    .collect();
                let norm = log_sum_exp(&logp);
                log_likelihood += norm;
                for (j, &lp) in logp.iter().enumerate() {
                    responsibilities[[i, j]] = (lp - norm).exp();
                }
            }

            // EM guarantees monotone likelihood; a real decrease is a bug.
            debug_assert!(
                log_likelihood >= prev_ll - 1e-6 * (1.0 + prev_ll.abs()),
                "EM log-likelihood decreased: {} -> {}",
                prev_ll,
                log_likelihood
            );

            iterations = iter;
            let rel_change = (log_likelihood - prev_ll).abs() / prev_ll.abs().max(1.0);
            debug!(
                "EM k={} iter {}: logLik {:.6} (rel change {:.3e})",
                self.k, iter, log_likelihood, rel_change
            );
            if prev_ll.is_finite() && rel_change < self.tolerance {
                converged = true;
                break;
            }
            prev_ll = log_likelihood;
        }

        info!(
            "mixture fit k={}: logLik {:.4} after {} iterations (converged: {})",
            self.k, log_likelihood, iterations, converged
        );

        Ok(MixtureModel {
            weights,
            alphas,
            responsibilities,
            log_likelihood,
            iterations,
            converged,
        })
    }

    /// Seeded k-means style partition over log count profiles, softened into
    /// initial responsibilities.
    fn initial_responsibilities(&self, counts: ArrayView2<f64>, seed: u64) -> Array2<f64> {
        let n_samples = counts.nrows();
        let k = self.k;
        if k == 1 {
            return Array2::from_elem((n_samples, 1), 1.0);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let profiles = counts.mapv(|x| (1.0 + x).ln());

        // Forgy initialization: k distinct random rows as centroids.
        let mut centroid_rows: Vec<usize> = Vec::with_capacity(k);
        while centroid_rows.len() < k {
            let candidate = rng.random_range(0..n_samples);
            if !centroid_rows.contains(&candidate) {
                centroid_rows.push(candidate);
            }
        }
        let mut centroids = Array2::<f64>::zeros((k, counts.ncols()));
        for (c, &row) in centroid_rows.iter().enumerate() {
            centroids.row_mut(c).assign(&profiles.row(row));
        }

        let mut labels = vec![0usize; n_samples];
        for _ in 0..INIT_KMEANS_ROUNDS {
            for (i, profile) in profiles.rows().into_iter().enumerate() {
                let mut best = 0;
                let mut best_dist = f64::INFINITY;
                for (c, centroid) in centroids.rows().into_iter().enumerate() {
                    let dist: f64 = profile
                        .iter()
                        .zip(centroid.iter())
                        .map(|(p, q)| (p - q) * (p - q))
                        .sum();
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                labels[i] = best;
            }
            for c in 0..k {
                let members: Vec<usize> = (0..n_samples).filter(|&i| labels[i] == c).collect();
                if members.is_empty() {
                    // Re-seed an empty cluster from a random sample.
                    let row = rng.random_range(0..n_samples);
                    centroids.row_mut(c).assign(&profiles.row(row));
                    continue;
                }
                let mut mean = Array1::<f64>::zeros(counts.ncols());
                for &i in &members {
                    mean += &profiles.row(i);
                }
                mean /= members.len() as f64;
                centroids.row_mut(c).assign(&mean);
            }
        }

        let off = (1.0 - INIT_SOFTNESS) / (k as f64 - 1.0);
        let mut responsibilities = Array2::from_elem((n_samples, k), off);
        for (i, &label) in labels.iter().enumerate() {
            responsibilities[[i, label]] = INIT_SOFTNESS;
        }
        responsibilities
    }
}
