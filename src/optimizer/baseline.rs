//! Baseline update rules: SGD, Momentum and Adam.
//!
//! State buffers reuse the [`Params`] layout, so every buffer lines up with
//! the parameter it tracks.

use crate::config::AdamConfig;
use crate::network::{Gradients, Params};

/// Plain gradient descent: `W -= lr·g`.
pub fn sgd_step(params: &mut Params, grads: &Gradients, lr: f64) {
    for (p, g) in params.layers_mut().zip(grads.layers()) {
        for (w, gw) in p.weights.as_mut_slice().iter_mut().zip(g.weights.as_slice()) {
            *w -= lr * gw;
        }
        for (b, gb) in p.bias.iter_mut().zip(&g.bias) {
            *b -= lr * gb;
        }
    }
}

/// Velocity buffer of the Momentum rule.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumState {
    pub velocity: Params,
}

impl MomentumState {
    pub fn new(params: &Params) -> Self {
        Self {
            velocity: params.zeros_like(),
        }
    }

    /// `v ← μ·v + (1-μ)·g; W -= lr·v` (classical, not Nesterov).
    pub fn step(&mut self, params: &mut Params, grads: &Gradients, lr: f64, momentum: f64) {
        let layers = params
            .layers_mut()
            .zip(grads.layers())
            .zip(self.velocity.layers_mut());
        for ((p, g), vel) in layers {
            momentum_slice(
                p.weights.as_mut_slice(),
                g.weights.as_slice(),
                vel.weights.as_mut_slice(),
                lr,
                momentum,
            );
            momentum_slice(&mut p.bias, &g.bias, &mut vel.bias, lr, momentum);
        }
    }
}

fn momentum_slice(params: &mut [f64], grads: &[f64], vel: &mut [f64], lr: f64, momentum: f64) {
    debug_assert_eq!(params.len(), grads.len());
    debug_assert_eq!(params.len(), vel.len());
    for ((w, &g), v) in params.iter_mut().zip(grads).zip(vel.iter_mut()) {
        *v = momentum * *v + (1.0 - momentum) * g;
        *w -= lr * *v;
    }
}

/// Bias-correction denominators `(1 - β1^t, 1 - β2^t)`.
#[inline]
pub(crate) fn bias_corrections(cfg: &AdamConfig, t: u64) -> (f64, f64) {
    let t = t.min(i32::MAX as u64) as i32;
    (1.0 - cfg.beta1.powi(t), 1.0 - cfg.beta2.powi(t))
}

/// Folds `g` into the moments and returns the unscaled step
/// `m̂ / (sqrt(v̂) + ε)`.
#[inline]
pub(crate) fn adam_direction(
    g: f64,
    m: &mut f64,
    v: &mut f64,
    bc: (f64, f64),
    cfg: &AdamConfig,
) -> f64 {
    *m = cfg.beta1 * *m + (1.0 - cfg.beta1) * g;
    *v = cfg.beta2 * *v + (1.0 - cfg.beta2) * g * g;
    let m_hat = *m / bc.0;
    let v_hat = *v / bc.1;
    m_hat / (v_hat.sqrt() + cfg.epsilon)
}

/// Adam over one tensor at step `t`.
pub(crate) fn adam_slice(
    params: &mut [f64],
    grads: &[f64],
    m: &mut [f64],
    v: &mut [f64],
    lr: f64,
    t: u64,
    cfg: &AdamConfig,
) {
    debug_assert_eq!(params.len(), grads.len());
    debug_assert_eq!(params.len(), m.len());
    debug_assert_eq!(params.len(), v.len());
    let bc = bias_corrections(cfg, t);
    for (((w, &g), mi), vi) in params.iter_mut().zip(grads).zip(m.iter_mut()).zip(v.iter_mut()) {
        *w -= lr * adam_direction(g, mi, vi, bc, cfg);
    }
}

/// First/second moments and step counter of Adam.
#[derive(Debug, Clone, PartialEq)]
pub struct AdamState {
    /// First moment.
    pub m: Params,
    /// Second moment.
    pub v: Params,
    /// Steps taken so far.
    pub t: u64,
}

impl AdamState {
    pub fn new(params: &Params) -> Self {
        Self {
            m: params.zeros_like(),
            v: params.zeros_like(),
            t: 0,
        }
    }

    /// Advances `t` and applies one bias-corrected Adam update.
    pub fn step(&mut self, params: &mut Params, grads: &Gradients, lr: f64, cfg: &AdamConfig) {
        self.t += 1;
        let t = self.t;
        let layers = params
            .layers_mut()
            .zip(grads.layers())
            .zip(self.m.layers_mut())
            .zip(self.v.layers_mut());
        for (((p, g), m), v) in layers {
            adam_slice(
                p.weights.as_mut_slice(),
                g.weights.as_slice(),
                m.weights.as_mut_slice(),
                v.weights.as_mut_slice(),
                lr,
                t,
                cfg,
            );
            adam_slice(&mut p.bias, &g.bias, &mut m.bias, &mut v.bias, lr, t, cfg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::network;

    fn tiny() -> Params {
        network::init(2, 3, 0, 11, Activation::Tanh)
    }

    fn ones_like(p: &Params) -> Params {
        let shape = p.shape();
        Params::unflatten(&vec![1.0; shape.param_count()], &shape)
    }

    #[test]
    fn test_sgd_step() {
        let mut p = tiny();
        let before = p.flatten();
        let g = ones_like(&p);
        sgd_step(&mut p, &g, 0.25);
        for (a, b) in p.flatten().iter().zip(&before) {
            assert_eq!(*a, b - 0.25);
        }
    }

    #[test]
    fn test_momentum_first_steps() {
        let mut p = tiny();
        let before = p.flatten();
        let g = ones_like(&p);
        let mut state = MomentumState::new(&p);
        state.step(&mut p, &g, 1.0, 0.9);
        // v1 = 0.1
        assert!((p.flatten()[0] - (before[0] - 0.1)).abs() < 1e-12);
        state.step(&mut p, &g, 1.0, 0.9);
        // v2 = 0.09 + 0.1 = 0.19
        assert!((p.flatten()[0] - (before[0] - 0.29)).abs() < 1e-12);
    }

    #[test]
    fn test_adam_first_step_is_sign_times_lr() {
        // With bias correction the first step is lr·g/(|g| + ε).
        let mut p = tiny();
        let before = p.flatten();
        let shape = p.shape();
        let g: Vec<f64> = (0..shape.param_count())
            .map(|i| if i % 2 == 0 { 0.5 } else { -2.0 })
            .collect();
        let grads = Params::unflatten(&g, &shape);
        let mut state = AdamState::new(&p);
        state.step(&mut p, &grads, 0.01, &AdamConfig::default());
        assert_eq!(state.t, 1);
        for ((after, before), g) in p.flatten().iter().zip(&before).zip(&g) {
            let delta = before - after;
            assert!((delta - 0.01 * g.signum()).abs() < 1e-7, "delta {}", delta);
        }
    }
}
