//! End-to-end CLI driver: CSV in, grouped fit, JSON report out.

use crate::classifier::classify_samples;
use crate::count_table::{load_count_table, CountTable};
use crate::cross_validation::{cross_validate, leave_one_out};
use crate::group_selection::{GroupModelSelector, GroupSelection};
use crate::metadata::load_metadata;
use crate::roc::RocCurve;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use itertools::Itertools;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::Write;

/// Options for one analysis run, filled from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub counts_path: String,
    pub metadata_path: Option<String>,
    pub k_min: usize,
    pub k_max: usize,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub seed: Option<u64>,
    pub cross_validate: bool,
    pub output_path: Option<String>,
}

/// JSON report written at the end of a run.
#[derive(Debug, Serialize)]
struct Report {
    groups: Vec<String>,
    best_k: IndexMap<String, usize>,
    selection: GroupSelection,
    sample_names: Vec<String>,
    assigned_group: Vec<String>,
    posterior_columns: Vec<String>,
    posteriors: Vec<Vec<f64>>,
    cross_validation: Option<CvReport>,
}

#[derive(Debug, Serialize)]
struct CvReport {
    hard_labels: Vec<String>,
    posteriors: Vec<Vec<f64>>,
    auc_per_group: IndexMap<String, f64>,
    fold_failures: usize,
}

/// Runs the full pipeline described by `options`.
pub fn run(options: &RunOptions) -> Result<()> {
    let table = load_count_table(&options.counts_path)?;
    info!(
        "loaded count table: {} samples x {} taxa",
        table.n_samples(),
        table.n_taxa()
    );

    let labels: Vec<String> = match &options.metadata_path {
        Some(path) => load_metadata(path)?.labels_for(&table)?,
        None => vec!["All".to_string(); table.n_samples()],
    };

    let groups: Vec<String> = labels.iter().unique().cloned().collect();
    let candidate_k: IndexMap<String, Vec<usize>> = groups
        .iter()
        .map(|g| (g.clone(), (options.k_min..=options.k_max).collect()))
        .collect();

    let mut selector = GroupModelSelector {
        tolerance: options.tolerance,
        max_iterations: options.max_iterations,
        ..GroupModelSelector::default()
    };
    if let Some(seed) = options.seed {
        selector = selector.with_seed(seed);
    }

    let selection = selector.select(table.counts_matrix().view(), &labels, &candidate_k)?;
    let classification = classify_samples(table.counts_matrix().view(), &selection.models)?;

    let cross_validation = if options.cross_validate {
        Some(run_cross_validation(
            &table, &labels, &candidate_k, &selector,
        )?)
    } else {
        None
    };

    let best_k = selection
        .models
        .iter()
        .map(|(g, m)| (g.clone(), m.k()))
        .collect();
    let report = Report {
        groups,
        best_k,
        sample_names: table.sample_names().clone(),
        assigned_group: classification.hard_labels.clone(),
        posterior_columns: classification.groups.clone(),
        posteriors: classification
            .posteriors
            .rows()
            .into_iter()
            .map(|r| r.to_vec())
            .collect(),
        selection,
        cross_validation,
    };

    let json = serde_json::to_string_pretty(&report)?;
    match &options.output_path {
        Some(path) => {
            let mut file =
                File::create(path).with_context(|| format!("creating report '{}'", path))?;
            file.write_all(json.as_bytes())?;
            info!("report written to {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Leave-one-out evaluation with a one-vs-rest AUC per group.
fn run_cross_validation(
    table: &CountTable,
    labels: &[String],
    candidate_k: &IndexMap<String, Vec<usize>>,
    selector: &GroupModelSelector,
) -> Result<CvReport> {
    let folds = leave_one_out(table.n_samples());
    let cv = cross_validate(
        table.counts_matrix().view(),
        labels,
        candidate_k,
        &folds,
        selector,
    )?;

    let mut auc_per_group = IndexMap::new();
    if cv.groups.len() >= 2 {
        for group in &cv.groups {
            let truth: Vec<bool> = labels.iter().map(|l| l == group).collect();
            let scores = cv.group_column(group).expect("group column present");
            match RocCurve::from_scores(&truth, &scores) {
                Ok(curve) => {
                    auc_per_group.insert(group.clone(), curve.auc());
                }
                Err(e) => info!("skipping ROC for group '{}': {}", group, e),
            }
        }
    }

    Ok(CvReport {
        hard_labels: cv.hard_labels.clone(),
        posteriors: cv
            .posteriors
            .rows()
            .into_iter()
            .map(|r| r.to_vec())
            .collect(),
        auc_per_group,
        fold_failures: cv.failures.len(),
    })
}
