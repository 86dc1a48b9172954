//! Seeded generation of synthetic Dirichlet-multinomial count data.
//!
//! Used by the end-to-end tests and handy for benchmarking: draw a latent
//! component per sample from the mixture weights, a taxon-proportion vector
//! from that component's Dirichlet, then counts from a multinomial at fixed
//! sequencing depth.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma};

/// Draws `n_samples` count rows from a Dirichlet-multinomial mixture.
///
/// # Arguments
///
/// * `weights` - Mixture weights, one per component (need not be normalized).
/// * `alphas` - One concentration vector per component, equal lengths.
/// * `n_samples` - Number of count rows to generate.
/// * `depth` - Total count per row (sequencing depth).
/// * `seed` - RNG seed; equal seeds give identical output.
///
/// # Returns
///
/// (counts matrix `n_samples` x taxa, generating component per sample,
/// generating proportion vectors `n_samples` x taxa).
pub fn simulate_dm_counts(
    weights: &[f64],
    alphas: &[Vec<f64>],
    n_samples: usize,
    depth: usize,
    seed: u64,
) -> (Array2<f64>, Vec<usize>, Array2<f64>) {
    assert!(!alphas.is_empty() && alphas.len() == weights.len());
    let n_taxa = alphas[0].len();
    assert!(alphas.iter().all(|a| a.len() == n_taxa));

    let mut rng = StdRng::seed_from_u64(seed);
    let weight_total: f64 = weights.iter().sum();

    let mut counts = Array2::<f64>::zeros((n_samples, n_taxa));
    let mut proportions = Array2::<f64>::zeros((n_samples, n_taxa));
    let mut assignments = Vec::with_capacity(n_samples);

    for i in 0..n_samples {
        // Latent component.
        let mut u = rng.random::<f64>() * weight_total;
        let mut component = weights.len() - 1;
        for (c, &w) in weights.iter().enumerate() {
            if u < w {
                component = c;
                break;
            }
            u -= w;
        }
        assignments.push(component);

        // Dirichlet draw via normalized Gamma variates.
        let mut p: Vec<f64> = alphas[component]
            .iter()
            .map(|&a| {
                let gamma = Gamma::new(a, 1.0).expect("positive Dirichlet concentration");
                gamma.sample(&mut rng).max(f64::MIN_POSITIVE)
            })
            .collect();
        let p_total: f64 = p.iter().sum();
        for v in p.iter_mut() {
            *v /= p_total;
        }
        for (j, &v) in p.iter().enumerate() {
            proportions[[i, j]] = v;
        }

        // Multinomial draw at fixed depth.
        for _ in 0..depth {
            let mut r = rng.random::<f64>();
            let mut taxon = n_taxa - 1;
            for (j, &v) in p.iter().enumerate() {
                if r < v {
                    taxon = j;
                    break;
                }
                r -= v;
            }
            counts[[i, taxon]] += 1.0;
        }
    }

    (counts, assignments, proportions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shapes_and_depth() {
        let (counts, assignments, proportions) =
            simulate_dm_counts(&[0.3, 0.7], &[vec![1.0, 2.0], vec![2.0, 1.0]], 10, 50, 1);
        assert_eq!(counts.dim(), (10, 2));
        assert_eq!(proportions.dim(), (10, 2));
        assert_eq!(assignments.len(), 10);
        for row in counts.rows() {
            assert_eq!(row.sum(), 50.0);
        }
        for row in proportions.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn equal_seeds_reproduce() {
        let a = simulate_dm_counts(&[0.5, 0.5], &[vec![1.0, 1.0], vec![5.0, 1.0]], 8, 30, 99);
        let b = simulate_dm_counts(&[0.5, 0.5], &[vec![1.0, 1.0], vec![5.0, 1.0]], 8, 30, 99);
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn respects_extreme_weights() {
        let (_, assignments, _) =
            simulate_dm_counts(&[1.0, 0.0], &[vec![1.0, 1.0], vec![1.0, 1.0]], 20, 10, 3);
        assert!(assignments.iter().all(|&c| c == 0));
    }
}
