//! Shared utilities.

pub mod parallel;
