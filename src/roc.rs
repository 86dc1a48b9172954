//! ROC curve construction from scored binary labels.
//!
//! Samples are sorted by descending score and the decision threshold swept
//! across the distinct score values; tied scores collapse into a single
//! threshold step, so no synthetic intermediate points appear. The curve
//! always starts at (0, 0) (threshold above every score) and ends at (1, 1)
//! (threshold at the minimum score, everything called positive).

use crate::stats::FitError;
use serde::{Deserialize, Serialize};

/// One point of an ROC curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
    /// Score threshold this point corresponds to; `INFINITY` for the
    /// leading (0, 0) point.
    pub threshold: f64,
}

/// An ROC curve, ordered by decreasing threshold. Both rates are monotone
/// non-decreasing along the curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
}

impl RocCurve {
    /// Builds the curve from parallel label/score slices. `labels[i]` is
    /// true for positives; `scores[i]` is the classifier's posterior for
    /// the positive group.
    pub fn from_scores(labels: &[bool], scores: &[f64]) -> Result<Self, FitError> {
        if labels.len() != scores.len() {
            return Err(FitError::LabelMismatch {
                expected: labels.len(),
                got: scores.len(),
            });
        }
        if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
            return Err(FitError::NonFiniteScore { index });
        }
        let n_positive = labels.iter().filter(|&&l| l).count();
        let n_negative = labels.len() - n_positive;
        if n_positive == 0 || n_negative == 0 {
            return Err(FitError::SingleClassRoc);
        }

        // Index sort by descending score, then sweep.
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut points = vec![RocPoint {
            false_positive_rate: 0.0,
            true_positive_rate: 0.0,
            threshold: f64::INFINITY,
        }];

        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut idx = 0usize;
        while idx < order.len() {
            let threshold = scores[order[idx]];
            // Consume the whole tie group at this threshold.
            while idx < order.len() && scores[order[idx]] == threshold {
                if labels[order[idx]] {
                    tp += 1;
                } else {
                    fp += 1;
                }
                idx += 1;
            }
            points.push(RocPoint {
                false_positive_rate: fp as f64 / n_negative as f64,
                true_positive_rate: tp as f64 / n_positive as f64,
                threshold,
            });
        }

        Ok(RocCurve { points })
    }

    /// Trapezoid area under the curve.
    pub fn auc(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| {
                let width = w[1].false_positive_rate - w[0].false_positive_rate;
                let height = 0.5 * (w[0].true_positive_rate + w[1].true_positive_rate);
                width * height
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn endpoints_are_exact() {
        let labels = [true, false, true, false, true];
        let scores = [0.9, 0.4, 0.8, 0.6, 0.3];
        let curve = RocCurve::from_scores(&labels, &scores).unwrap();

        let first = curve.points.first().unwrap();
        let last = curve.points.last().unwrap();
        assert_eq!((first.false_positive_rate, first.true_positive_rate), (0.0, 0.0));
        assert_eq!((last.false_positive_rate, last.true_positive_rate), (1.0, 1.0));
        assert_eq!(first.threshold, f64::INFINITY);
    }

    #[test]
    fn rates_are_monotone() {
        let labels = [true, false, false, true, true, false];
        let scores = [0.7, 0.7, 0.2, 0.9, 0.1, 0.5];
        let curve = RocCurve::from_scores(&labels, &scores).unwrap();
        for w in curve.points.windows(2) {
            assert!(w[1].false_positive_rate >= w[0].false_positive_rate);
            assert!(w[1].true_positive_rate >= w[0].true_positive_rate);
            assert!(w[1].threshold <= w[0].threshold);
        }
    }

    #[test]
    fn hand_computed_curve_and_auc() {
        // thr 0.9 -> (0, 1/2); 0.8 -> (1/2, 1/2); 0.7 -> (1/2, 1); 0.1 -> (1, 1)
        let labels = [true, false, true, false];
        let scores = [0.9, 0.8, 0.7, 0.1];
        let curve = RocCurve::from_scores(&labels, &scores).unwrap();

        let expected = [
            (0.0, 0.0),
            (0.0, 0.5),
            (0.5, 0.5),
            (0.5, 1.0),
            (1.0, 1.0),
        ];
        assert_eq!(curve.points.len(), expected.len());
        for (p, &(fpr, tpr)) in curve.points.iter().zip(expected.iter()) {
            assert_relative_eq!(p.false_positive_rate, fpr);
            assert_relative_eq!(p.true_positive_rate, tpr);
        }
        assert_relative_eq!(curve.auc(), 0.75, max_relative = 1e-12);
    }

    #[test]
    fn ties_collapse_into_one_step() {
        let labels = [true, false, true, false];
        let scores = [0.5, 0.5, 0.5, 0.5];
        let curve = RocCurve::from_scores(&labels, &scores).unwrap();
        // (0,0) plus a single step straight to (1,1).
        assert_eq!(curve.points.len(), 2);
        assert_relative_eq!(curve.auc(), 0.5, max_relative = 1e-12);
    }

    #[test]
    fn perfect_separation_has_unit_auc() {
        let labels = [true, true, false, false];
        let scores = [0.9, 0.8, 0.2, 0.1];
        let curve = RocCurve::from_scores(&labels, &scores).unwrap();
        assert_relative_eq!(curve.auc(), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        // The tie-group sweep relies on score equality; NaN never compares
        // equal, so it must be rejected before the sweep starts.
        let labels = [true, false, true];
        assert!(matches!(
            RocCurve::from_scores(&labels, &[0.9, f64::NAN, 0.2]),
            Err(FitError::NonFiniteScore { index: 1 })
        ));
        assert!(matches!(
            RocCurve::from_scores(&labels, &[0.9, f64::INFINITY, 0.2]),
            Err(FitError::NonFiniteScore { index: 1 })
        ));
    }

    #[test]
    fn single_class_is_rejected() {
        assert!(matches!(
            RocCurve::from_scores(&[true, true], &[0.5, 0.6]),
            Err(FitError::SingleClassRoc)
        ));
        assert!(matches!(
            RocCurve::from_scores(&[true], &[0.5, 0.6]),
            Err(FitError::LabelMismatch { .. })
        ));
    }
}
