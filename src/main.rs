//! Main entry point for the metagenomics_dmm application.
//!
//! Fits Dirichlet-multinomial mixture models to a sample x taxon count
//! table:
//! 1. Reading the count CSV and (optionally) sample phenotype metadata.
//! 2. Searching component counts per phenotype group, keeping the
//!    minimum-Laplace fit.
//! 3. Classifying every sample against the fitted group models.
//! 4. Optionally cross-validating the classifier (leave-one-out) with
//!    per-group ROC/AUC.
//! 5. Writing a JSON report.

use anyhow::Result;
use clap::Parser;
use log::error;
use metagenomics_dmm::cli::{run, RunOptions};

/// Define command-line arguments using clap.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Count table CSV: header of taxon names, first column sample IDs.
    #[arg(short, long, required = true)]
    counts: String,

    /// Metadata CSV mapping samples to phenotype groups. Without it, all
    /// samples are fitted as a single group.
    #[arg(short, long)]
    metadata: Option<String>,

    /// Smallest number of mixture components to try per group.
    #[arg(long, default_value_t = 1)]
    k_min: usize,

    /// Largest number of mixture components to try per group.
    #[arg(long, default_value_t = 5)]
    k_max: usize,

    /// Relative log-likelihood tolerance for EM convergence.
    #[arg(long, default_value_t = 1e-6)]
    tolerance: f64,

    /// Maximum EM iterations per fit.
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    /// Seed for reproducible initialization.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Run leave-one-out cross-validation with per-group ROC/AUC.
    #[arg(long, default_value_t = false)]
    cross_validate: bool,

    /// Output file path for the JSON report; stdout when omitted.
    #[arg(short, long)]
    output: Option<String>,
}

/// Main function: parses arguments and orchestrates the analysis workflow.
fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.k_min == 0 || args.k_min > args.k_max {
        error!("invalid k range {}..={}", args.k_min, args.k_max);
        anyhow::bail!("--k-min must be >= 1 and <= --k-max");
    }

    let options = RunOptions {
        counts_path: args.counts,
        metadata_path: args.metadata,
        k_min: args.k_min,
        k_max: args.k_max,
        tolerance: args.tolerance,
        max_iterations: args.max_iterations,
        seed: args.seed,
        cross_validate: args.cross_validate,
        output_path: args.output,
    };

    run(&options)
}
