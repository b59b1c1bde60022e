//! Loss and evaluation metrics for the binary classifier.
//!
//! - [`binary_cross_entropy`] - mean BCE with clamped probabilities
//! - [`output_delta`] - `∂L/∂z` at the sigmoid output (fused sigmoid + BCE)
//! - [`l2_penalty`] - `0.5·λ·ΣW²` over weight matrices
//! - [`accuracy`] - fraction of correct thresholded predictions
//! - [`ConfusionMatrix`] - 2×2 counts of true × predicted class
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::loss::{accuracy, binary_cross_entropy};
//!
//! let probs = vec![0.9, 0.2, 0.6];
//! let labels = vec![1, 0, 0];
//! assert!(binary_cross_entropy(&probs, &labels) > 0.0);
//! assert!((accuracy(&probs, &labels) - 2.0 / 3.0).abs() < 1e-12);
//! ```

use crate::layer::Dense;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Probabilities are clamped to `[PROB_EPS, 1 - PROB_EPS]` before `ln`.
pub const PROB_EPS: f64 = 1e-6;

/// Decision threshold on the output probability.
pub const THRESHOLD: f64 = 0.5;

/// Predicted class for a probability.
#[inline]
pub fn predict_class(prob: f64) -> u8 {
    u8::from(prob >= THRESHOLD)
}

/// Mean binary cross-entropy.
///
/// Probabilities are clamped so the loss stays finite even for saturated
/// outputs. An empty batch has zero loss.
pub fn binary_cross_entropy(probs: &[f64], labels: &[u8]) -> f64 {
    debug_assert_eq!(probs.len(), labels.len());
    if probs.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for (&p, &y) in probs.iter().zip(labels) {
        let t = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
        let y = f64::from(y);
        sum += -(y * t.ln() + (1.0 - y) * (1.0 - t).ln());
    }
    sum / probs.len() as f64
}

/// Per-sample `∂L/∂z_out = p - y` for a sigmoid output under BCE.
///
/// Not averaged; the layer gradients divide by the batch size.
pub fn output_delta(probs: &[f64], labels: &[u8]) -> Vec<f64> {
    debug_assert_eq!(probs.len(), labels.len());
    probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| p - f64::from(y))
        .collect()
}

/// `0.5 · lambda · Σ W²` over the weight matrices of `layers` (biases excluded).
pub fn l2_penalty<'a>(layers: impl IntoIterator<Item = &'a Dense>, lambda: f64) -> f64 {
    let sq: f64 = layers.into_iter().map(|l| l.weights.sum_squares()).sum();
    0.5 * lambda * sq
}

/// Fraction of samples whose thresholded prediction equals the label.
pub fn accuracy(probs: &[f64], labels: &[u8]) -> f64 {
    debug_assert_eq!(probs.len(), labels.len());
    if probs.is_empty() {
        return 0.0;
    }
    let correct = probs
        .iter()
        .zip(labels)
        .filter(|(&p, &y)| predict_class(p) == y)
        .count();
    correct as f64 / probs.len() as f64
}

/// 2×2 confusion matrix, indexed `counts[true_class][predicted_class]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    /// Tallies thresholded predictions against labels.
    pub fn from_predictions(probs: &[f64], labels: &[u8]) -> Self {
        debug_assert_eq!(probs.len(), labels.len());
        let mut counts = [[0usize; 2]; 2];
        for (&p, &y) in probs.iter().zip(labels) {
            counts[usize::from(y.min(1))][usize::from(predict_class(p))] += 1;
        }
        Self { counts }
    }

    /// Sum of all four cells; equals the number of samples tallied.
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn true_negatives(&self) -> usize {
        self.counts[0][0]
    }

    pub fn false_positives(&self) -> usize {
        self.counts[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.counts[1][0]
    }

    pub fn true_positives(&self) -> usize {
        self.counts[1][1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Matrix;

    #[test]
    fn test_bce_known_value() {
        let loss = binary_cross_entropy(&[0.5, 0.5], &[1, 0]);
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn test_bce_clamped_stays_finite() {
        let loss = binary_cross_entropy(&[0.0, 1.0], &[1, 0]);
        assert!(loss.is_finite());
        assert!((loss - -(PROB_EPS.ln())).abs() < 1e-6);
        assert_eq!(binary_cross_entropy(&[], &[]), 0.0);
    }

    #[test]
    fn test_output_delta() {
        assert_eq!(output_delta(&[0.75, 0.25], &[1, 0]), vec![-0.25, 0.25]);
    }

    #[test]
    fn test_l2_penalty_excludes_bias() {
        let layer = Dense {
            weights: Matrix::from_rows(&[vec![1.0, 2.0]]),
            bias: vec![100.0, 100.0],
        };
        let pen = l2_penalty([&layer, &layer], 0.01);
        assert!((pen - 0.5 * 0.01 * 10.0).abs() < 1e-15);
    }

    #[test]
    fn test_accuracy_threshold_inclusive() {
        assert_eq!(accuracy(&[0.5, 0.49], &[1, 0]), 1.0);
        assert_eq!(accuracy(&[0.5], &[0]), 0.0);
    }

    #[test]
    fn test_confusion_matrix_conserves_count() {
        let probs = [0.9, 0.1, 0.6, 0.3, 0.5];
        let labels = [1, 0, 0, 1, 1];
        let cm = ConfusionMatrix::from_predictions(&probs, &labels);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.true_positives(), 2);
        assert_eq!(cm.true_negatives(), 1);
        assert_eq!(cm.false_positives(), 1);
        assert_eq!(cm.false_negatives(), 1);
    }
}
