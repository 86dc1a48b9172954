//! Generative classification of samples against per-group mixture models.
//!
//! Given one fitted mixture per phenotype group, a sample's marginal
//! likelihood under each group's model is normalized across groups into a
//! posterior probability vector. Groups carry equal prior weight; the
//! posterior is purely likelihood-driven. Pure functions of (counts,
//! GroupFitMap), no shared state.

use crate::group_selection::GroupFitMap;
use crate::stats::{log_sum_exp, validate_counts, FitError};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Posterior group membership for a set of samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Group labels, column order of `posteriors`.
    pub groups: Vec<String>,
    /// Samples x groups posterior probabilities; rows sum to 1.
    pub posteriors: Array2<f64>,
    /// Argmax group per sample.
    pub hard_labels: Vec<String>,
}

impl Classification {
    /// Column index of `group`, if present.
    pub fn group_index(&self, group: &str) -> Option<usize> {
        self.groups.iter().position(|g| g == group)
    }

    /// The posterior column for `group`.
    pub fn group_column(&self, group: &str) -> Option<Vec<f64>> {
        self.group_index(group)
            .map(|j| self.posteriors.column(j).to_vec())
    }
}

/// Posterior probability of each group for a single count row.
///
/// Returns probabilities in the map's group order.
pub fn classify_sample(counts: ArrayView1<f64>, models: &GroupFitMap) -> Vec<f64> {
    let log_marginals: Vec<f64> = models
        .values()
        .map(|model| model.sample_log_marginal(counts))
        .collect();
    let norm = log_sum_exp(&log_marginals);
    log_marginals.iter().map(|lm| (lm - norm).exp()).collect()
}

/// Classifies every row of `counts` against the fitted group models.
pub fn classify_samples(
    counts: ArrayView2<f64>,
    models: &GroupFitMap,
) -> Result<Classification, FitError> {
    validate_counts(counts)?;
    if models.is_empty() {
        return Err(FitError::EmptyTable);
    }

    let groups: Vec<String> = models.keys().cloned().collect();
    let mut posteriors = Array2::<f64>::zeros((counts.nrows(), groups.len()));
    let mut hard_labels = Vec::with_capacity(counts.nrows());

    for (i, row) in counts.rows().into_iter().enumerate() {
        let posterior = classify_sample(row, models);
        let mut best = 0;
        for (j, &p) in posterior.iter().enumerate() {
            posteriors[[i, j]] = p;
            if p > posterior[best] {
                best = j;
            }
        }
        hard_labels.push(groups[best].clone());
    }

    Ok(Classification {
        groups,
        posteriors,
        hard_labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::simulate_dm_counts;
    use crate::stats::MixtureEm;
    use approx::assert_relative_eq;
    use indexmap::IndexMap;

    fn fit_group_map() -> GroupFitMap {
        let (lean, _, _) =
            simulate_dm_counts(&[1.0], &[vec![15.0, 1.0, 1.0, 1.0]], 20, 200, 41);
        let (obese, _, _) =
            simulate_dm_counts(&[1.0], &[vec![1.0, 1.0, 1.0, 15.0]], 20, 200, 42);

        let mut models = IndexMap::new();
        models.insert(
            "Lean".to_string(),
            MixtureEm::new(1).with_seed(1).fit(lean.view()).unwrap(),
        );
        models.insert(
            "Obese".to_string(),
            MixtureEm::new(1).with_seed(1).fit(obese.view()).unwrap(),
        );
        models
    }

    #[test]
    fn posterior_rows_are_distributions() {
        let models = fit_group_map();
        let (queries, _, _) =
            simulate_dm_counts(&[1.0], &[vec![15.0, 1.0, 1.0, 1.0]], 10, 200, 43);
        let result = classify_samples(queries.view(), &models).unwrap();

        assert_eq!(result.groups, vec!["Lean", "Obese"]);
        for row in result.posteriors.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-10);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn assigns_samples_to_generating_group() {
        let models = fit_group_map();
        let (lean_queries, _, _) =
            simulate_dm_counts(&[1.0], &[vec![15.0, 1.0, 1.0, 1.0]], 15, 200, 44);
        let result = classify_samples(lean_queries.view(), &models).unwrap();

        let lean_hits = result
            .hard_labels
            .iter()
            .filter(|l| l.as_str() == "Lean")
            .count();
        assert!(lean_hits >= 14, "only {}/15 labeled Lean", lean_hits);
    }

    #[test]
    fn classification_is_deterministic() {
        let models = fit_group_map();
        let (queries, _, _) =
            simulate_dm_counts(&[1.0], &[vec![1.0, 1.0, 1.0, 15.0]], 6, 100, 45);
        let a = classify_samples(queries.view(), &models).unwrap();
        let b = classify_samples(queries.view(), &models).unwrap();
        assert_eq!(a.posteriors, b.posteriors);
        assert_eq!(a.hard_labels, b.hard_labels);
    }

    #[test]
    fn single_group_posterior_is_one() {
        let mut models = fit_group_map();
        models.shift_remove("Obese");
        let (queries, _, _) =
            simulate_dm_counts(&[1.0], &[vec![1.0, 2.0, 3.0, 4.0]], 4, 80, 46);
        let result = classify_samples(queries.view(), &models).unwrap();
        for row in result.posteriors.rows() {
            assert_relative_eq!(row[0], 1.0, epsilon = 1e-12);
        }
    }
}
