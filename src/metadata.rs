//! Sample metadata handling.
//!
//! Maps sample IDs to phenotype groups for grouped fitting and
//! classification. The grouped pipeline needs one categorical label per
//! count-table row; this module loads that mapping from CSV and aligns it
//! to the table's row order.

use crate::count_table::CountTable;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Phenotype labels for a collection of samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Maps sample IDs to their phenotype group.
    pub phenotype_map: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata::default()
    }

    /// Adds a sample with its phenotype group.
    pub fn add_sample(&mut self, sample_id: &str, phenotype: &str) {
        self.phenotype_map
            .insert(sample_id.to_string(), phenotype.to_string());
    }

    /// Returns all distinct phenotype groups, sorted.
    pub fn phenotypes(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.phenotype_map.values().cloned().collect();
        groups.sort();
        groups.dedup();
        groups
    }

    pub fn sample_count(&self) -> usize {
        self.phenotype_map.len()
    }

    /// Produces one label per count-table row, in row order.
    ///
    /// Errors if any table sample is missing from the metadata or carries an
    /// empty phenotype.
    pub fn labels_for(&self, table: &CountTable) -> Result<Vec<String>> {
        let mut labels = Vec::with_capacity(table.n_samples());
        for name in table.sample_names() {
            match self.phenotype_map.get(name) {
                Some(group) if !group.is_empty() => labels.push(group.clone()),
                Some(_) => {
                    return Err(anyhow::anyhow!(
                        "sample '{}' has an empty phenotype in the metadata",
                        name
                    ))
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "sample '{}' is in the count table but not in the metadata",
                        name
                    ))
                }
            }
        }
        Ok(labels)
    }
}

/// Loads sample metadata from a CSV file with a sample-ID column and a
/// phenotype/group column (header names matched case-insensitively).
///
/// # Arguments
///
/// * `path` - Path to the metadata CSV file
///
/// # Returns
///
/// * `Result<Metadata>` - Metadata structure or error
pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;
    let mut metadata = Metadata::new();

    let headers = rdr.headers()?.clone();
    let sample_col = headers.iter().position(|h| {
        h.trim().eq_ignore_ascii_case("sampleid") || h.trim().eq_ignore_ascii_case("sample")
    });
    let phenotype_col = headers.iter().position(|h| {
        h.trim().eq_ignore_ascii_case("phenotype") || h.trim().eq_ignore_ascii_case("group")
    });

    let sample_col = sample_col
        .ok_or_else(|| anyhow::anyhow!("Metadata CSV missing 'SampleID'/'Sample' column"))?;
    let phenotype_col = phenotype_col
        .ok_or_else(|| anyhow::anyhow!("Metadata CSV missing 'Phenotype'/'Group' column"))?;

    for result in rdr.records() {
        let record = result?;
        let sample_id = record
            .get(sample_col)
            .ok_or_else(|| anyhow::anyhow!("Missing sample ID in metadata row"))?
            .trim()
            .to_string();
        let phenotype = record
            .get(phenotype_col)
            .ok_or_else(|| anyhow::anyhow!("Missing phenotype in metadata row"))?
            .trim()
            .to_string();

        if sample_id.is_empty() {
            log::warn!("Skipping metadata row with empty sample ID.");
            continue;
        }
        if phenotype.is_empty() {
            log::warn!("Sample '{}' has an empty phenotype in metadata.", sample_id);
            // Keep it; labels_for() reports the problem with context.
        }

        metadata.add_sample(&sample_id, &phenotype);
    }

    if metadata.sample_count() == 0 {
        return Err(anyhow::anyhow!(
            "No valid sample entries found in metadata file '{}'",
            path.display()
        ));
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(path: &std::path::Path, content: &str) {
        let mut file = File::create(path).unwrap();
        writeln!(file, "{}", content).unwrap();
    }

    #[test]
    fn load_metadata_basic() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("metadata.csv");
        write_file(
            &file_path,
            "SampleID,Phenotype\nS1,Lean\nS2,Obese\nS3,Lean",
        );

        let metadata = load_metadata(&file_path).unwrap();
        assert_eq!(metadata.sample_count(), 3);
        assert_eq!(metadata.phenotype_map.get("S2"), Some(&"Obese".to_string()));
        assert_eq!(metadata.phenotypes(), vec!["Lean", "Obese"]);
    }

    #[test]
    fn load_metadata_alternate_headers() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("alt.csv");
        write_file(&file_path, "sample,group\nS1,Control\n");
        assert!(load_metadata(&file_path).is_ok());

        let bad_path = dir.path().join("bad.csv");
        write_file(&bad_path, "Sample,OtherField\nS1,Value1\n");
        assert!(load_metadata(&bad_path).is_err());
    }

    #[test]
    fn labels_align_to_table_rows() {
        let table = CountTable::from_parts(
            arr2(&[[1.0, 2.0], [3.0, 4.0]]),
            vec!["S2".into(), "S1".into()],
            vec!["T1".into(), "T2".into()],
        )
        .unwrap();

        let mut metadata = Metadata::new();
        metadata.add_sample("S1", "Lean");
        metadata.add_sample("S2", "Obese");

        let labels = metadata.labels_for(&table).unwrap();
        assert_eq!(labels, vec!["Obese".to_string(), "Lean".to_string()]);

        metadata.phenotype_map.remove("S1");
        assert!(metadata.labels_for(&table).is_err());
    }
}
