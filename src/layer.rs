//! Fully connected layer.
//!
//! # Layout
//!
//! A [`Dense`] layer maps `in_dim` inputs to `out_dim` units:
//!
//! ```text
//! z = x · W + b        W: [in_dim × out_dim] (Row-Major), b: [out_dim]
//! ```
//!
//! Row `i` of `W` holds the weights leaving input `i`; column `j` holds every
//! weight feeding unit `j`. Column-wise optimizers (SGD-S gating in Fusion)
//! treat one column as a unit.
//!
//! Batches are Row-Major matrices with one sample per row.

use crate::linalg::{add_bias, column_sums, matmul, transpose, Matrix};
use crate::rng::Mulberry32;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A dense layer: weights and bias.
///
/// The same struct also carries gradients and optimizer buffers of a layer,
/// since they share its shape.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dense {
    /// Weights `[in_dim × out_dim]`.
    pub weights: Matrix,
    /// Bias `[out_dim]`.
    pub bias: Vec<f64>,
}

impl Dense {
    /// Creates a layer with `N(0, std²)` weights and a constant bias.
    ///
    /// Weights are drawn Row-Major from `rng`, so the draw order is fixed.
    pub fn new_normal(
        in_dim: usize,
        out_dim: usize,
        std: f64,
        bias: f64,
        rng: &mut Mulberry32,
    ) -> Self {
        assert!(in_dim > 0, "Input dimension must be positive");
        assert!(out_dim > 0, "Output dimension must be positive");
        let weights = Matrix::from_fn(in_dim, out_dim, |_, _| rng.normal() * std);
        Self {
            weights,
            bias: vec![bias; out_dim],
        }
    }

    /// All-zero layer of the given shape.
    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self {
            weights: Matrix::zeros(in_dim, out_dim),
            bias: vec![0.0; out_dim],
        }
    }

    /// All-zero layer with this layer's shape.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.in_dim(), self.out_dim())
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.weights.rows()
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.weights.cols()
    }

    /// Number of trainable scalars (weights + bias).
    #[inline]
    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    /// Pre-activation `x · W + b` for a batch.
    pub fn linear(&self, x: &Matrix) -> Matrix {
        debug_assert_eq!(x.cols(), self.in_dim());
        add_bias(&matmul(x, &self.weights), &self.bias)
    }

    /// Parameter gradients from the layer input and `∂L/∂z`, averaged over
    /// `n` samples. No regularization term is added here.
    pub fn param_grads(&self, input: &Matrix, d_z: &Matrix, n: usize) -> Dense {
        debug_assert_eq!(input.rows(), d_z.rows());
        let count = n as f64;
        let weights = matmul(&transpose(input), d_z).map(|v| v / count);
        let bias = column_sums(d_z).into_iter().map(|v| v / count).collect();
        Dense { weights, bias }
    }

    /// `∂L/∂x = ∂L/∂z · Wᵀ`.
    pub fn input_grad(&self, d_z: &Matrix) -> Matrix {
        matmul(d_z, &transpose(&self.weights))
    }

    /// Adds `lambda · W` to `grads.weights` (L2 term; biases untouched).
    pub fn add_l2_grad(&self, grads: &mut Dense, lambda: f64) {
        for (g, w) in grads
            .weights
            .as_mut_slice()
            .iter_mut()
            .zip(self.weights.as_slice())
        {
            *g += lambda * w;
        }
    }
}

/// Inverted dropout.
///
/// When `train` is set and `p > 0`, each unit survives with probability
/// `1 - p` and survivors are scaled by `1 / (1 - p)`. Returns the dropped
/// activations and the scaled keep-mask (`1/(1-p)` or `0`), which backward
/// multiplies into the local gradient. Otherwise the input is returned
/// unchanged, no mask is recorded and `rng` is not advanced.
pub fn apply_dropout(
    activations: Matrix,
    p: f64,
    train: bool,
    rng: &mut Mulberry32,
) -> (Matrix, Option<Matrix>) {
    if !train || p <= 0.0 {
        return (activations, None);
    }
    let keep = 1.0 - p;
    let mask = Matrix::from_fn(activations.rows(), activations.cols(), |_, _| {
        if rng.next_f64() < keep {
            1.0 / keep
        } else {
            0.0
        }
    });
    let mut dropped = activations;
    for (a, m) in dropped.as_mut_slice().iter_mut().zip(mask.as_slice()) {
        *a *= m;
    }
    (dropped, Some(mask))
}
