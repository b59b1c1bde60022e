//! Fixed-topology classifier: input → hidden1 → optional hidden2 → 1 sigmoid unit.
//!
//! # Flat layout
//!
//! The spectral optimizers work on a single flat vector. [`Params::flatten`]
//! and [`Params::unflatten`] use one traversal order for both parameters and
//! gradients:
//!
//! ```text
//! W1 (Row-Major), b1, [W2 (Row-Major), b2], Wout (Row-Major), b_out
//! ```
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::network::{self, DropoutConfig};
//! use fusion_lab::{Activation, Matrix, Mulberry32};
//!
//! let params = network::init(2, 4, 0, 42, Activation::Tanh);
//! let x = Matrix::from_rows(&[vec![1.0, -1.0], vec![0.5, 0.5]]);
//! let bp = network::backprop(
//!     &x,
//!     &[1, 0],
//!     &params,
//!     Activation::Tanh,
//!     DropoutConfig::NONE,
//!     0.0,
//!     &mut Mulberry32::new(1),
//!     true,
//! );
//! assert_eq!(bp.grads.param_count(), params.param_count());
//! ```

use crate::activation::{sigmoid, Activation};
use crate::layer::{apply_dropout, Dense};
use crate::linalg::Matrix;
use crate::loss::{accuracy, binary_cross_entropy, l2_penalty, output_delta};
use crate::rng::Mulberry32;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Network parameters.
///
/// `hidden2 == None` is the single-hidden-layer variant, not an empty layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Params {
    pub hidden1: Dense,
    pub hidden2: Option<Dense>,
    pub output: Dense,
}

/// Gradients share the parameter layout.
pub type Gradients = Params;

/// Layer widths, enough to rebuild a [`Params`] from a flat vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamShape {
    pub input_dim: usize,
    pub h1: usize,
    /// 0 when the second hidden layer is absent.
    pub h2: usize,
}

impl ParamShape {
    /// Width of the layer feeding the output unit.
    #[inline]
    pub fn last_hidden(&self) -> usize {
        if self.h2 > 0 {
            self.h2
        } else {
            self.h1
        }
    }

    /// Total number of scalars in the flat vector.
    pub fn param_count(&self) -> usize {
        let mut n = self.input_dim * self.h1 + self.h1;
        if self.h2 > 0 {
            n += self.h1 * self.h2 + self.h2;
        }
        n + self.last_hidden() + 1
    }
}

impl Params {
    pub fn shape(&self) -> ParamShape {
        ParamShape {
            input_dim: self.hidden1.in_dim(),
            h1: self.hidden1.out_dim(),
            h2: self.hidden2.as_ref().map_or(0, Dense::out_dim),
        }
    }

    /// All-zero parameters of the given shape.
    pub fn zeros(shape: &ParamShape) -> Self {
        Self {
            hidden1: Dense::zeros(shape.input_dim, shape.h1),
            hidden2: (shape.h2 > 0).then(|| Dense::zeros(shape.h1, shape.h2)),
            output: Dense::zeros(shape.last_hidden(), 1),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.shape())
    }

    /// Layers in traversal order.
    pub fn layers(&self) -> impl Iterator<Item = &Dense> {
        std::iter::once(&self.hidden1)
            .chain(self.hidden2.as_ref())
            .chain(std::iter::once(&self.output))
    }

    /// Mutable layers in traversal order.
    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut Dense> {
        std::iter::once(&mut self.hidden1)
            .chain(self.hidden2.as_mut())
            .chain(std::iter::once(&mut self.output))
    }

    pub fn param_count(&self) -> usize {
        self.layers().map(Dense::param_count).sum()
    }

    /// Concatenates every scalar in traversal order.
    pub fn flatten(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.param_count());
        for layer in self.layers() {
            flat.extend_from_slice(layer.weights.as_slice());
            flat.extend_from_slice(&layer.bias);
        }
        flat
    }

    /// Inverse of [`Params::flatten`].
    ///
    /// # Panics
    ///
    /// Panics if `flat.len()` differs from `shape.param_count()`.
    pub fn unflatten(flat: &[f64], shape: &ParamShape) -> Self {
        assert_eq!(
            flat.len(),
            shape.param_count(),
            "flat vector does not match parameter shape"
        );
        let mut out = Self::zeros(shape);
        let mut offset = 0;
        for layer in out.layers_mut() {
            let nw = layer.weights.len();
            layer
                .weights
                .as_mut_slice()
                .copy_from_slice(&flat[offset..offset + nw]);
            offset += nw;
            let nb = layer.bias.len();
            layer.bias.copy_from_slice(&flat[offset..offset + nb]);
            offset += nb;
        }
        out
    }
}

/// Initializes parameters from a single generator seeded with `seed`.
///
/// Hidden layers use He std `sqrt(2/fan_in)` for ReLU-family activations and
/// Xavier `sqrt(2/(fan_in+fan_out))` otherwise; the output layer is always
/// Xavier. Weights are drawn W1, W2, Wout, each Row-Major.
pub fn init(input_dim: usize, h1: usize, h2: usize, seed: u32, activation: Activation) -> Params {
    let mut rng = Mulberry32::new(seed);
    let he = activation.uses_he_init();
    let bias = activation.initial_bias();
    let hidden_std = |fan_in: usize, fan_out: usize| {
        if he {
            (2.0 / fan_in.max(1) as f64).sqrt()
        } else {
            xavier_std(fan_in, fan_out)
        }
    };

    let hidden1 = Dense::new_normal(input_dim, h1, hidden_std(input_dim, h1), bias, &mut rng);
    let hidden2 = (h2 > 0).then(|| Dense::new_normal(h1, h2, hidden_std(h1, h2), bias, &mut rng));
    let last = if h2 > 0 { h2 } else { h1 };
    let output = Dense::new_normal(last, 1, xavier_std(last, 1), 0.0, &mut rng);

    Params {
        hidden1,
        hidden2,
        output,
    }
}

#[inline]
fn xavier_std(fan_in: usize, fan_out: usize) -> f64 {
    (2.0 / (fan_in + fan_out) as f64).sqrt()
}

/// Per-layer dropout probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DropoutConfig {
    pub p1: f64,
    pub p2: f64,
}

impl DropoutConfig {
    pub const NONE: DropoutConfig = DropoutConfig { p1: 0.0, p2: 0.0 };
}

/// Everything backward needs from a forward pass.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    pub z1: Matrix,
    /// Post-activation, post-dropout.
    pub a1: Matrix,
    pub m1: Option<Matrix>,
    pub z2: Option<Matrix>,
    pub a2: Option<Matrix>,
    pub m2: Option<Matrix>,
    pub zo: Matrix,
    /// Output probabilities, one per sample.
    pub probs: Vec<f64>,
}

impl ForwardCache {
    /// Activations feeding the output layer.
    fn last_hidden(&self) -> &Matrix {
        self.a2.as_ref().unwrap_or(&self.a1)
    }
}

/// Forward pass over a batch (one sample per row of `x`).
///
/// Dropout masks for hidden1 are drawn before those of hidden2. With
/// `train == false` dropout is inert and `rng` is left untouched.
pub fn forward(
    x: &Matrix,
    params: &Params,
    activation: Activation,
    dropout: DropoutConfig,
    train: bool,
    rng: &mut Mulberry32,
) -> ForwardCache {
    let z1 = params.hidden1.linear(x);
    let (a1, m1) = apply_dropout(z1.map(|z| activation.apply(z)), dropout.p1, train, rng);

    let (z2, a2, m2) = match &params.hidden2 {
        Some(layer) => {
            let z2 = layer.linear(&a1);
            let (a2, m2) = apply_dropout(z2.map(|z| activation.apply(z)), dropout.p2, train, rng);
            (Some(z2), Some(a2), m2)
        }
        None => (None, None, None),
    };

    let zo = params.output.linear(a2.as_ref().unwrap_or(&a1));
    let probs = zo.as_slice().iter().map(|&z| sigmoid(z)).collect();

    ForwardCache {
        z1,
        a1,
        m1,
        z2,
        a2,
        m2,
        zo,
        probs,
    }
}

/// Result of [`backprop`].
#[derive(Debug, Clone)]
pub struct Backprop {
    pub grads: Gradients,
    /// Mean clamped BCE plus `0.5·λ·ΣW²`.
    pub loss: f64,
    pub accuracy: f64,
}

/// `∂L/∂z = ∂L/∂a ⊙ f'(z) ⊙ mask`.
fn hidden_delta(d_a: &Matrix, z: &Matrix, mask: Option<&Matrix>, activation: Activation) -> Matrix {
    let mut d_z = d_a.clone();
    for (i, (d, &zv)) in d_z
        .as_mut_slice()
        .iter_mut()
        .zip(z.as_slice())
        .enumerate()
    {
        *d *= activation.derivative(zv);
        if let Some(m) = mask {
            *d *= m.as_slice()[i];
        }
    }
    d_z
}

/// Reverse-mode gradients of BCE (+ L2 on weight matrices) for a batch.
///
/// Runs its own forward pass with `train` and `rng`, so dropout masks are
/// drawn here when training.
#[allow(clippy::too_many_arguments)]
pub fn backprop(
    x: &Matrix,
    y: &[u8],
    params: &Params,
    activation: Activation,
    dropout: DropoutConfig,
    lambda: f64,
    rng: &mut Mulberry32,
    train: bool,
) -> Backprop {
    debug_assert_eq!(x.rows(), y.len());
    let n = x.rows();
    let cache = forward(x, params, activation, dropout, train, rng);

    let d_zo = Matrix::from_vec(n, 1, output_delta(&cache.probs, y));
    let output = params.output.param_grads(cache.last_hidden(), &d_zo, n);
    let mut d_h = params.output.input_grad(&d_zo);

    let hidden2 = match (&params.hidden2, &cache.z2) {
        (Some(layer), Some(z2)) => {
            let d_z2 = hidden_delta(&d_h, z2, cache.m2.as_ref(), activation);
            let g = layer.param_grads(&cache.a1, &d_z2, n);
            d_h = layer.input_grad(&d_z2);
            Some(g)
        }
        _ => None,
    };

    let d_z1 = hidden_delta(&d_h, &cache.z1, cache.m1.as_ref(), activation);
    let hidden1 = params.hidden1.param_grads(x, &d_z1, n);

    let mut grads = Params {
        hidden1,
        hidden2,
        output,
    };
    if lambda != 0.0 {
        for (layer, g) in params.layers().zip(grads.layers_mut()) {
            layer.add_l2_grad(g, lambda);
        }
    }

    let loss = binary_cross_entropy(&cache.probs, y) + l2_penalty(params.layers(), lambda);
    let accuracy = accuracy(&cache.probs, y);

    Backprop {
        grads,
        loss,
        accuracy,
    }
}

/// Output probabilities with dropout off.
pub fn predict(x: &Matrix, params: &Params, activation: Activation) -> Vec<f64> {
    // Inference draws nothing, any generator will do.
    let mut rng = Mulberry32::new(0);
    forward(x, params, activation, DropoutConfig::NONE, false, &mut rng).probs
}

/// Samples `P(class 1)` on a `resolution × resolution` grid over [-1, 1]².
///
/// Row 0 is the top edge (x2 = +1), column 0 the left edge (x1 = -1).
/// Needs a 2-input network.
pub fn decision_surface(params: &Params, activation: Activation, resolution: usize) -> Matrix {
    debug_assert_eq!(params.hidden1.in_dim(), 2);
    if resolution == 0 {
        return Matrix::zeros(0, 0);
    }
    let coord = |i: usize| {
        if resolution == 1 {
            0.0
        } else {
            -1.0 + 2.0 * i as f64 / (resolution - 1) as f64
        }
    };
    let grid = Matrix::from_fn(resolution * resolution, 2, |idx, c| {
        let (row, col) = (idx / resolution, idx % resolution);
        if c == 0 {
            coord(col)
        } else {
            -coord(row)
        }
    });
    Matrix::from_vec(resolution, resolution, predict(&grid, params, activation))
}
