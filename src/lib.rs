//! Dirichlet-multinomial mixture modeling for microbial count data.
//!
//! The crate fits mixtures of Dirichlet-multinomial components to a
//! sample x taxon count matrix in order to:
//! 1. Discover latent community types via EM clustering for a fixed number
//!    of components.
//! 2. Compare candidate component counts with a Laplace approximation to the
//!    marginal likelihood (plus AIC/BIC).
//! 3. Classify samples into phenotype groups with a generative classifier
//!    built from one fitted mixture per group.
//! 4. Evaluate that classifier with cross-validation and ROC analysis.
//!
//! The numerical core lives under [`stats`]; [`group_selection`],
//! [`classifier`] and [`cross_validation`] compose it into the grouped
//! pipeline. Input parsing ([`count_table`], [`metadata`]) and the CLI are
//! thin boundaries around the library.

pub mod classifier;
pub mod cli;
pub mod count_table;
pub mod cross_validation;
pub mod group_selection;
pub mod metadata;
pub mod roc;
pub mod simulation;
pub mod special;
pub mod stats;
pub mod utils;

pub use classifier::{classify_sample, classify_samples, Classification};
pub use count_table::{load_count_table, CountTable};
pub use cross_validation::{
    cross_validate, k_fold, leave_one_out, CrossValidationResult,
};
pub use group_selection::{GroupFitMap, GroupModelSelector, GroupSelection};
pub use metadata::{load_metadata, Metadata};
pub use roc::{RocCurve, RocPoint};
pub use stats::{
    score_model, DirichletEstimator, FitError, MixtureEm, MixtureModel, ModelScore,
};
