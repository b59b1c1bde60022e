//! ApoLLO: Adam scaled by directional confidence.
//!
//! Each step compares the current gradient with an EMA of past unit gradient
//! directions (both in full parameter space):
//!
//! ```text
//! conf  = (1 + clamp(⟨g/‖g‖, d/‖d‖⟩, -1, 1)) / 2
//! scale = conf^γ
//! d     ← β3·d + (1-β3)·g/‖g‖
//! ```
//!
//! and runs Adam with learning rate `lr·scale`. A zero history gives
//! `conf = 0.5` on the first step.

use super::baseline::AdamState;
use crate::config::{AdamConfig, ApolloConfig};
use crate::linalg::{dot, norm};
use crate::network::{Gradients, Params};

/// Confidence `(1 + clamp(cos, -1, 1)) / 2` raised to `gamma`.
///
/// `a` and `b` are normalized by their floored norms, so zero vectors give
/// cosine 0.
pub(crate) fn confidence_scale(a: &[f64], b: &[f64], gamma: f64) -> f64 {
    let cos = dot(a, b) / (norm(a) * norm(b));
    let conf = (1.0 + cos.clamp(-1.0, 1.0)) / 2.0;
    conf.powf(gamma)
}

/// Adam moments plus the flat direction EMA.
#[derive(Debug, Clone, PartialEq)]
pub struct ApolloState {
    pub adam: AdamState,
    /// EMA of unit gradient directions, in flat layout.
    pub direction: Vec<f64>,
    /// Scale applied on the most recent step.
    pub last_scale: f64,
}

impl ApolloState {
    pub fn new(params: &Params) -> Self {
        Self {
            adam: AdamState::new(params),
            direction: vec![0.0; params.param_count()],
            last_scale: 1.0,
        }
    }

    pub fn step(
        &mut self,
        params: &mut Params,
        grads: &Gradients,
        lr: f64,
        adam: &AdamConfig,
        cfg: &ApolloConfig,
    ) {
        let g = grads.flatten();
        debug_assert_eq!(g.len(), self.direction.len());
        let scale = confidence_scale(&g, &self.direction, cfg.gamma);

        let g_norm = norm(&g);
        for (d, gi) in self.direction.iter_mut().zip(&g) {
            *d = cfg.beta3 * *d + (1.0 - cfg.beta3) * (gi / g_norm);
        }

        self.adam.step(params, grads, lr * scale, adam);
        self.last_scale = scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::network;

    #[test]
    fn test_confidence_scale_bounds() {
        let a = [1.0, 0.0];
        assert!((confidence_scale(&a, &[1.0, 0.0], 1.0) - 1.0).abs() < 1e-9);
        assert!(confidence_scale(&a, &[-1.0, 0.0], 1.0) < 1e-9);
        assert!((confidence_scale(&a, &[0.0, 1.0], 1.0) - 0.5).abs() < 1e-12);
        // No history yet.
        assert!((confidence_scale(&a, &[0.0, 0.0], 2.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_first_step_is_half_rate_adam() {
        let p0 = network::init(2, 3, 2, 5, Activation::Tanh);
        let shape = p0.shape();
        let g: Vec<f64> = (0..shape.param_count()).map(|i| (i as f64 * 0.37).sin()).collect();
        let grads = Params::unflatten(&g, &shape);
        let cfg = AdamConfig::default();

        let mut pa = p0.clone();
        let mut apollo = ApolloState::new(&pa);
        apollo.step(&mut pa, &grads, 0.02, &cfg, &ApolloConfig::default());
        assert!((apollo.last_scale - 0.5).abs() < 1e-12);

        let mut pb = p0.clone();
        let mut adam = AdamState::new(&pb);
        adam.step(&mut pb, &grads, 0.02 * apollo.last_scale, &cfg);
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_repeated_gradient_gains_confidence() {
        let mut p = network::init(2, 4, 0, 8, Activation::Relu);
        let shape = p.shape();
        let grads = Params::unflatten(&vec![0.1; shape.param_count()], &shape);
        let mut state = ApolloState::new(&p);
        let mut scales = Vec::new();
        for _ in 0..5 {
            state.step(&mut p, &grads, 0.01, &AdamConfig::default(), &ApolloConfig::default());
            scales.push(state.last_scale);
        }
        // Same direction every step: the cosine is 1 from step 2 on.
        for s in &scales[1..] {
            assert!((s - 1.0).abs() < 1e-9);
        }
        let d_norm = norm(&state.direction);
        assert!(d_norm > 0.0 && d_norm < 1.0);
    }
}
