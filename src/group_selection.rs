//! Per-phenotype-group model-order search.
//!
//! For each group and each candidate component count k, fits a mixture to
//! the group's samples and scores it; the fit with the minimum Laplace score
//! wins the group. Minimum is the fixed convention: the Laplace score
//! approximates -2 ln(marginal likelihood), so smaller means better
//! evidence. Every (group, k) pair is an independent task dispatched through
//! the parallel runner; one failing task is recorded and its siblings keep
//! going.

use crate::stats::{score_model, validate_counts, FitError, MixtureEm, MixtureModel, ModelScore};
use crate::utils::parallel::{run_tasks, ParallelConfig};
use indexmap::IndexMap;
use log::{info, warn};
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Best fitted mixture per group, in first-appearance label order.
pub type GroupFitMap = IndexMap<String, MixtureModel>;

/// Score for one tried component count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub k: usize,
    pub score: ModelScore,
    pub converged: bool,
}

/// A (group, k) task that failed input validation; siblings are unaffected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub group: String,
    pub k: usize,
    pub message: String,
}

/// Outcome of a group-wise model search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSelection {
    /// Winning model per group (minimum Laplace).
    pub models: GroupFitMap,
    /// Score of each winning model.
    pub best_scores: IndexMap<String, ModelScore>,
    /// Full score trace over every k tried, per group, for diagnostics.
    pub traces: IndexMap<String, Vec<CandidateScore>>,
    /// Tasks that failed; empty on a fully successful run.
    pub failures: Vec<TaskFailure>,
}

impl GroupSelection {
    /// The k of the winning model for `group`, if it has one.
    pub fn best_k(&self, group: &str) -> Option<usize> {
        self.models.get(group).map(|m| m.k())
    }
}

/// Configuration of the per-group best-model search.
#[derive(Debug, Clone)]
pub struct GroupModelSelector {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Base seed; each (group, k) task derives its own deterministic seed
    /// from it, so results are reproducible without being identical across
    /// tasks.
    pub seed: Option<u64>,
    pub parallel: Option<ParallelConfig>,
}

impl Default for GroupModelSelector {
    fn default() -> Self {
        GroupModelSelector {
            tolerance: 1e-6,
            max_iterations: 100,
            seed: None,
            parallel: None,
        }
    }
}

impl GroupModelSelector {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Runs the search.
    ///
    /// # Arguments
    ///
    /// * `counts` - Full sample x taxon matrix.
    /// * `labels` - Group label per sample, aligned to rows.
    /// * `candidate_k` - Group -> candidate component counts. Ranges may
    ///   differ per group; every group appearing in `labels` needs an entry.
    pub fn select(
        &self,
        counts: ArrayView2<f64>,
        labels: &[String],
        candidate_k: &IndexMap<String, Vec<usize>>,
    ) -> Result<GroupSelection, FitError> {
        validate_counts(counts)?;
        if labels.len() != counts.nrows() {
            return Err(FitError::LabelMismatch {
                expected: counts.nrows(),
                got: labels.len(),
            });
        }

        // Groups in first-appearance order, with their row indices.
        let mut group_rows: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (i, label) in labels.iter().enumerate() {
            group_rows.entry(label.clone()).or_default().push(i);
        }
        for group in group_rows.keys() {
            if !candidate_k.contains_key(group) {
                return Err(FitError::UnknownGroup(group.clone()));
            }
        }

        // One task per (group, k), each fitting an owned row slice.
        struct Task {
            group: String,
            group_index: usize,
            k: usize,
            rows: Vec<usize>,
        }
        let mut tasks = Vec::new();
        for (group_index, (group, rows)) in group_rows.iter().enumerate() {
            for &k in &candidate_k[group] {
                tasks.push(Task {
                    group: group.clone(),
                    group_index,
                    k,
                    rows: rows.clone(),
                });
            }
        }

        // Flat (group, k) list mirroring task order, for failure reports.
        let task_keys: Vec<(String, usize)> = tasks
            .iter()
            .map(|t| (t.group.clone(), t.k))
            .collect();

        let base_seed = self.seed;
        let tolerance = self.tolerance;
        let max_iterations = self.max_iterations;
        let outcomes = run_tasks(
            tasks,
            |task| {
                let sub = counts.select(Axis(0), &task.rows);
                let mut em = MixtureEm::new(task.k)
                    .with_tolerance(tolerance)
                    .with_max_iterations(max_iterations);
                if let Some(seed) = base_seed {
                    em = em.with_seed(derive_seed(seed, task.group_index, task.k));
                }
                let model = em.fit(sub.view())?;
                let score = score_model(&model, sub.view());
                Ok::<(String, usize, MixtureModel, ModelScore), FitError>((
                    task.group.clone(),
                    task.k,
                    model,
                    score,
                ))
            },
            self.parallel.clone(),
        )
        .map_err(|e| FitError::Parallel(e.to_string()))?;

        let mut selection = GroupSelection {
            models: IndexMap::new(),
            best_scores: IndexMap::new(),
            traces: group_rows
                .keys()
                .map(|g| (g.clone(), Vec::new()))
                .collect(),
            failures: Vec::new(),
        };

        for (task_index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok((group, k, model, score)) => {
                    let converged = model.converged;
                    if !converged {
                        warn!("group '{}' k={} hit the EM iteration cap", group, k);
                    }
                    let is_better = selection
                        .best_scores
                        .get(&group)
                        .map(|best| score.laplace < best.laplace)
                        .unwrap_or(true);
                    if is_better {
                        selection.models.insert(group.clone(), model);
                        selection.best_scores.insert(group.clone(), score.clone());
                    }
                    selection.traces[&group].push(CandidateScore {
                        k,
                        score,
                        converged,
                    });
                }
                Err(e) => {
                    let (group, k) = task_keys[task_index].clone();
                    selection.failures.push(TaskFailure {
                        group,
                        k,
                        message: e.to_string(),
                    });
                }
            }
        }

        for (group, score) in &selection.best_scores {
            info!(
                "group '{}': best k = {} (Laplace {:.2})",
                group,
                selection.models[group].k(),
                score.laplace
            );
        }

        Ok(selection)
    }
}

/// Deterministic per-task seed from the base seed.
fn derive_seed(base: u64, group_index: usize, k: usize) -> u64 {
    base.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add((group_index as u64) << 32)
        .wrapping_add(k as u64)
}
