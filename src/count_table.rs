//! Defines structures and functions for handling count data.
//!
//! The count table is the immutable input to every fitting operation: rows
//! are samples, columns are taxa, entries are non-negative counts (f64 so
//! fractional expected counts can pass through unchanged). Name vectors and
//! lookup maps ride along for reporting; the numerical core only ever sees
//! the matrix.

use crate::stats::{validate_counts, FitError};
use anyhow::{anyhow, Context, Result};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A sample x taxon count matrix with name maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTable {
    /// The core count matrix (samples x taxa).
    pub counts: Array2<f64>,

    /// Sample name per row, and the reverse lookup.
    pub sample_names: Vec<String>,
    pub sample_map: HashMap<String, usize>,

    /// Taxon name per column, and the reverse lookup.
    pub taxon_names: Vec<String>,
    pub taxon_map: HashMap<String, usize>,
}

impl CountTable {
    /// Builds a table from a matrix and name vectors, validating shapes and
    /// entries up front.
    pub fn from_parts(
        counts: Array2<f64>,
        sample_names: Vec<String>,
        taxon_names: Vec<String>,
    ) -> Result<Self, FitError> {
        if sample_names.len() != counts.nrows() {
            return Err(FitError::LabelMismatch {
                expected: counts.nrows(),
                got: sample_names.len(),
            });
        }
        if taxon_names.len() != counts.ncols() {
            return Err(FitError::LabelMismatch {
                expected: counts.ncols(),
                got: taxon_names.len(),
            });
        }
        validate_counts(counts.view())?;

        let sample_map = sample_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        let taxon_map = taxon_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        Ok(CountTable {
            counts,
            sample_names,
            sample_map,
            taxon_names,
            taxon_map,
        })
    }

    /// Returns the dimensions of the table (samples, taxa).
    pub fn dimensions(&self) -> (usize, usize) {
        self.counts.dim()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_taxa(&self) -> usize {
        self.counts.ncols()
    }

    /// Returns a reference to the underlying count matrix.
    pub fn counts_matrix(&self) -> &Array2<f64> {
        &self.counts
    }

    /// Retrieves the count row for a specific sample.
    pub fn sample_counts(&self, sample_name: &str) -> Option<ArrayView1<f64>> {
        self.sample_map
            .get(sample_name)
            .map(|&idx| self.counts.row(idx))
    }

    /// Copies out the rows at `indices`, in order. Used to slice a table
    /// down to one phenotype group or one cross-validation training set.
    pub fn select_rows(&self, indices: &[usize]) -> Array2<f64> {
        self.counts.select(Axis(0), indices)
    }

    /// Returns the list of sample names.
    pub fn sample_names(&self) -> &Vec<String> {
        &self.sample_names
    }

    /// Returns the list of taxon names.
    pub fn taxon_names(&self) -> &Vec<String> {
        &self.taxon_names
    }
}

/// Loads a count table from CSV: header row of taxon names, first column
/// sample IDs, remaining cells non-negative counts.
///
/// # Arguments
///
/// * `path` - Path to the count CSV file.
///
/// # Returns
///
/// * `Result<CountTable>` - The table, or an error naming the offending cell.
pub fn load_count_table<P: AsRef<Path>>(path: P) -> Result<CountTable> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening count table '{}'", path.display()))?;

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(anyhow!(
            "count table '{}' needs a sample column plus at least one taxon column",
            path.display()
        ));
    }
    let taxon_names: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut sample_names = Vec::new();
    let mut rows: Vec<f64> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let sample_id = record
            .get(0)
            .ok_or_else(|| anyhow!("missing sample ID on data row {}", line + 1))?
            .trim()
            .to_string();
        if record.len() != headers.len() {
            return Err(anyhow!(
                "sample '{}' has {} fields, expected {}",
                sample_id,
                record.len(),
                headers.len()
            ));
        }
        for (col, field) in record.iter().skip(1).enumerate() {
            let value: f64 = field.trim().parse().with_context(|| {
                format!(
                    "non-numeric count '{}' for sample '{}', taxon '{}'",
                    field, sample_id, taxon_names[col]
                )
            })?;
            rows.push(value);
        }
        sample_names.push(sample_id);
    }

    let n_samples = sample_names.len();
    let counts = Array2::from_shape_vec((n_samples, taxon_names.len()), rows)
        .context("count table shape mismatch")?;

    CountTable::from_parts(counts, sample_names, taxon_names)
        .map_err(|e| anyhow!("invalid count table '{}': {}", path.display(), e))
}
