//! Parallel dispatch of independent fitting tasks.
//!
//! Every (group, k) fit and every cross-validation fold is a pure function
//! of its inputs, so they are dispatched as a rayon map with no shared
//! mutable state. The collector keeps one outcome per task: a failing task
//! never aborts its siblings, callers decide what to do with partial
//! results.

use log::error;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Configuration for parallel processing.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads; 0 lets rayon pick.
    pub threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig { threads: 0 }
    }
}

/// Runs `task` over `items` in parallel, collecting one `Result` per item in
/// input order. Errors are logged and kept in place; successful siblings are
/// unaffected.
pub fn run_tasks<T, U, E, F>(
    items: Vec<T>,
    task: F,
    config: Option<ParallelConfig>,
) -> Result<Vec<Result<U, E>>, ParallelError>
where
    T: Send + Sync,
    U: Send,
    E: std::fmt::Display + Send,
    F: Fn(&T) -> Result<U, E> + Send + Sync,
{
    let config = config.unwrap_or_default();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| ParallelError::ThreadError(format!("Failed to build thread pool: {}", e)))?;

    let outcomes = pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                let result = task(item);
                if let Err(e) = &result {
                    error!("task failed: {}", e);
                }
                result
            })
            .collect()
    });

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_input_order() {
        let items: Vec<usize> = (0..100).collect();
        let results =
            run_tasks(items, |&i| Ok::<usize, ParallelError>(i * 2), None).unwrap();
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r.as_ref().unwrap(), i * 2);
        }
    }

    #[test]
    fn dispatches_owned_non_copy_items() {
        // The selectors hand over structs holding Strings and index vectors;
        // the runner must accept any Send + Sync item type.
        let items: Vec<(String, Vec<usize>)> = vec![
            ("Lean".to_string(), vec![0, 1]),
            ("Obese".to_string(), vec![2]),
        ];
        let results = run_tasks(
            items,
            |(name, rows)| Ok::<usize, ParallelError>(name.len() + rows.len()),
            None,
        )
        .unwrap();
        assert_eq!(*results[0].as_ref().unwrap(), 6);
        assert_eq!(*results[1].as_ref().unwrap(), 6);
    }

    #[test]
    fn failures_do_not_abort_siblings() {
        let items: Vec<usize> = (0..10).collect();
        let results = run_tasks(
            items,
            |&i| {
                if i == 3 {
                    Err(ParallelError::ThreadError("boom".into()))
                } else {
                    Ok(i)
                }
            },
            None,
        )
        .unwrap();

        assert_eq!(results.len(), 10);
        assert!(results[3].is_err());
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 9);
    }
}
