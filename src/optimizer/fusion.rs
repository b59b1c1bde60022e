//! Fusion: a staged gradient-shaping pipeline feeding per-column Adam.
//!
//! # Pipeline
//!
//! ```text
//! g ─ clip ─ P· ─┬─ covariance / eigen refresh
//!                └─ SAGE ─ OPAL ─ DEO ─ ApoLLO-k ─ Pᵀ·(·)·scale
//!                     ─ column Adam + SGD-S ─ weight decay
//! ```
//!
//! | Stage | Space | State | When disabled |
//! |-------|-------|-------|---------------|
//! | SAGE | k | eigenpairs (shared tracker) | pass-through |
//! | OPAL | k | FIFO of the last `r` *raw* projected gradients | history cleared |
//! | DEO | k | integral, previous signal | integral zeroed |
//! | ApoLLO-k | k | unit-direction EMA | EMA zeroed, scale 1 |
//! | SGD-S | per column | direction EMA per weight column | gate 1, EMA frozen |
//!
//! The covariance and eigen refresh run every step regardless of the flags,
//! and DEO's previous signal always follows the stage input.
//!
//! OPAL records the projected gradient *before* spectral correction while
//! decomposing the corrected one.
//!
//! With SAGE, OPAL, DEO and ApoLLO-k all disabled the `Pᵀ·P` round trip is
//! skipped and the clipped raw gradient reaches the column update, so the
//! rule reduces to Adam when SGD-S, clipping and weight decay are off too.

use std::collections::VecDeque;

use super::apollo::confidence_scale;
use super::baseline::{adam_direction, adam_slice, bias_corrections, AdamState};
use crate::config::{AdamConfig, FusionConfig};
use crate::layer::Dense;
use crate::linalg::{dot, gram_schmidt, norm, scale, Matrix, NORM_EPS};
use crate::network::{Gradients, Params};
use crate::spectral::{spectral_correct, SpectralTracker};

/// Eigenvalue assigned to the seed eigenpairs before the first refresh.
pub const INITIAL_EIGENVALUE: f64 = 0.01;

/// Decay of the per-column SGD-S direction EMA.
pub const COLUMN_DIRECTION_DECAY: f64 = 0.9;

/// Complete Fusion state.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionState {
    /// Moments of the column update; `adam.t` is the Fusion step counter.
    pub adam: AdamState,
    pub tracker: SpectralTracker,
    /// OPAL: raw projected gradients, oldest first.
    pub history: VecDeque<Vec<f64>>,
    /// DEO integral term.
    pub integral: Vec<f64>,
    /// DEO input of the previous step.
    pub prev_signal: Vec<f64>,
    /// ApoLLO-k unit-direction EMA.
    pub direction_k: Vec<f64>,
    /// SGD-S: one `[out_dim × in_dim]` matrix per weight matrix, row `j`
    /// holding the direction EMA of column `j`.
    pub column_directions: Vec<Matrix>,
    /// ApoLLO-k scale of the most recent step.
    pub last_scale: f64,
}

impl FusionState {
    pub fn new(params: &Params, cfg: &FusionConfig) -> Self {
        let k = cfg.k;
        Self {
            adam: AdamState::new(params),
            tracker: SpectralTracker::new(
                params.param_count(),
                k,
                cfg.projection_seed,
                INITIAL_EIGENVALUE,
            ),
            history: VecDeque::with_capacity(cfg.r + 1),
            integral: vec![0.0; k],
            prev_signal: vec![0.0; k],
            direction_k: vec![0.0; k],
            column_directions: params
                .layers()
                .map(|l| Matrix::zeros(l.out_dim(), l.in_dim()))
                .collect(),
            last_scale: 1.0,
        }
    }

    /// Steps taken so far.
    #[inline]
    pub fn t(&self) -> u64 {
        self.adam.t
    }

    pub fn step(
        &mut self,
        params: &mut Params,
        grads: &Gradients,
        lr: f64,
        adam: &AdamConfig,
        cfg: &FusionConfig,
    ) {
        self.adam.t += 1;
        let t = self.adam.t;

        let mut g = grads.flatten();
        if cfg.clip > 0.0 {
            clip_in_place(&mut g, cfg.clip);
        }

        let gk = self.tracker.project(&g);
        self.tracker.observe(&gk, cfg.sage_decay, t, cfg.update_interval);

        let signal = if cfg.enable_sage {
            spectral_correct(&gk, self.tracker.eigenpairs())
        } else {
            gk.clone()
        };
        let signal = self.opal(signal, gk, cfg);
        let signal = self.deo(signal, cfg);
        let scale_factor = self.apollo_k(&signal, cfg);
        self.last_scale = scale_factor;

        let g_final = if cfg.any_projected_stage() {
            scale(&self.tracker.back_project(&signal), scale_factor)
        } else {
            g
        };
        let corrected = Params::unflatten(&g_final, &params.shape());

        let layers = params
            .layers_mut()
            .zip(corrected.layers())
            .zip(self.adam.m.layers_mut())
            .zip(self.adam.v.layers_mut())
            .zip(self.column_directions.iter_mut());
        for ((((p, g), m), v), dirs) in layers {
            update_columns(p, g, m, v, dirs, cfg.enable_sgds, lr, t, adam);
            adam_slice(&mut p.bias, &g.bias, &mut m.bias, &mut v.bias, lr, t, adam);
        }

        if cfg.weight_decay > 0.0 {
            let shrink = lr * cfg.weight_decay;
            for layer in params.layers_mut() {
                for w in layer.weights.as_mut_slice() {
                    *w -= shrink * *w;
                }
            }
        }
    }

    /// Splits `signal` against the span of the history and reweights the
    /// parts, then records `raw`.
    fn opal(&mut self, signal: Vec<f64>, raw: Vec<f64>, cfg: &FusionConfig) -> Vec<f64> {
        if !cfg.enable_opal {
            self.history.clear();
            return signal;
        }
        let out = if self.history.is_empty() {
            signal
        } else {
            let basis = gram_schmidt(self.history.make_contiguous());
            let mut parallel = vec![0.0; signal.len()];
            for q in &basis {
                let c = dot(q, &signal);
                for (p, qi) in parallel.iter_mut().zip(q) {
                    *p += qi * c;
                }
            }
            signal
                .iter()
                .zip(&parallel)
                .map(|(s, p)| cfg.alpha_para * p + cfg.alpha_orth * (s - p))
                .collect()
        };
        self.history.push_back(raw);
        while self.history.len() > cfg.r {
            self.history.pop_front();
        }
        out
    }

    /// Leaky PID on the signal.
    fn deo(&mut self, signal: Vec<f64>, cfg: &FusionConfig) -> Vec<f64> {
        let out = if cfg.enable_deo {
            for (i, s) in self.integral.iter_mut().zip(&signal) {
                *i = cfg.i_decay * *i + s;
            }
            signal
                .iter()
                .zip(&self.integral)
                .zip(&self.prev_signal)
                .map(|((s, i), prev)| cfg.kp * s + cfg.ki * i + cfg.kd * (s - prev))
                .collect()
        } else {
            self.integral.fill(0.0);
            signal.clone()
        };
        self.prev_signal = signal;
        out
    }

    /// Confidence scale against the k-space direction EMA.
    fn apollo_k(&mut self, signal: &[f64], cfg: &FusionConfig) -> f64 {
        if !cfg.enable_apollo {
            self.direction_k.fill(0.0);
            return 1.0;
        }
        let factor = confidence_scale(&self.direction_k, signal, cfg.gamma);
        let n = norm(signal);
        for (d, s) in self.direction_k.iter_mut().zip(signal) {
            *d = cfg.beta3 * *d + (1.0 - cfg.beta3) * (s / n);
        }
        factor
    }
}

/// Rescales `g` to norm `max_norm` when its floored norm exceeds it.
fn clip_in_place(g: &mut [f64], max_norm: f64) {
    let n = norm(g);
    if n > max_norm {
        let s = max_norm / (n + NORM_EPS);
        g.iter_mut().for_each(|x| *x *= s);
    }
}

/// Adam over the weight matrix one output column at a time, with the
/// column's step gated by agreement with its own direction history.
#[allow(clippy::too_many_arguments)]
fn update_columns(
    layer: &mut Dense,
    grads: &Dense,
    m: &mut Dense,
    v: &mut Dense,
    dirs: &mut Matrix,
    gate: bool,
    lr: f64,
    t: u64,
    cfg: &AdamConfig,
) {
    let (rows, cols) = layer.weights.shape();
    debug_assert_eq!(dirs.shape(), (cols, rows));
    let bc = bias_corrections(cfg, t);
    let mut col_m = vec![0.0; rows];
    let mut steps = vec![0.0; rows];

    for j in 0..cols {
        for i in 0..rows {
            steps[i] = adam_direction(
                grads.weights.get(i, j),
                m.weights.get_mut(i, j),
                v.weights.get_mut(i, j),
                bc,
                cfg,
            );
            col_m[i] = m.weights.get(i, j);
        }

        let sg = if gate {
            let dir = dirs.row_mut(j);
            let mc_norm = norm(&col_m);
            let cos = dot(&col_m, dir) / (mc_norm * norm(dir));
            for (d, mi) in dir.iter_mut().zip(&col_m) {
                *d = COLUMN_DIRECTION_DECAY * *d + (1.0 - COLUMN_DIRECTION_DECAY) * (mi / mc_norm);
            }
            (1.0 + cos.clamp(-1.0, 1.0)) / 2.0
        } else {
            1.0
        };

        let rate = lr * sg;
        for (i, s) in steps.iter().enumerate() {
            *layer.weights.get_mut(i, j) -= rate * s;
        }
    }
}
