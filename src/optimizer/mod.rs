//! Optimizer suite.
//!
//! Six update rules share the [`Params`] layout (and its flat form):
//!
//! | Kind | State | Update |
//! |------|-------|--------|
//! | `sgd` | none | `W -= lr·g` |
//! | `momentum` | velocity | `v ← μv + (1-μ)g; W -= lr·v` |
//! | `adam` | moments | bias-corrected Adam |
//! | `apollo` | moments, direction EMA | Adam at `lr·conf^γ` |
//! | `sage` | moments, projection, covariance, eigenpairs | Adam on spectrally corrected gradient |
//! | `fusion` | all of the above + OPAL/DEO/SGD-S buffers | see [`fusion`] |
//!
//! [`OptimizerState`] is created fully initialized for a parameter shape and
//! must be rebuilt whenever the shape changes.
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::network::{self, DropoutConfig};
//! use fusion_lab::optimizer::{OptimizerConfig, OptimizerKind, OptimizerState};
//! use fusion_lab::{Activation, Matrix, Mulberry32};
//!
//! let mut params = network::init(2, 4, 0, 42, Activation::Tanh);
//! let cfg = OptimizerConfig::with_lr(OptimizerKind::Adam, 0.01);
//! let mut state = OptimizerState::new(&params, &cfg);
//!
//! let x = Matrix::from_rows(&[vec![1.0, 1.0], vec![-1.0, 1.0]]);
//! let bp = network::backprop(
//!     &x,
//!     &[1, 0],
//!     &params,
//!     Activation::Tanh,
//!     DropoutConfig::NONE,
//!     0.0,
//!     &mut Mulberry32::new(0),
//!     true,
//! );
//! state.step(&mut params, &bp.grads, cfg.lr, &cfg);
//! ```

pub mod apollo;
pub mod baseline;
pub mod fusion;
pub mod sage;

use std::fmt;
use std::str::FromStr;

pub use crate::config::{AdamConfig, ApolloConfig, FusionConfig, OptimizerConfig, SageConfig};
pub use apollo::ApolloState;
pub use baseline::{sgd_step, AdamState, MomentumState};
pub use fusion::FusionState;
pub use sage::SageState;

use crate::error::LabError;
use crate::network::{Gradients, Params};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which update rule to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    Adam,
    Apollo,
    Sage,
    #[default]
    Fusion,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 6] = [
        OptimizerKind::Sgd,
        OptimizerKind::Momentum,
        OptimizerKind::Adam,
        OptimizerKind::Apollo,
        OptimizerKind::Sage,
        OptimizerKind::Fusion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Momentum => "momentum",
            OptimizerKind::Adam => "adam",
            OptimizerKind::Apollo => "apollo",
            OptimizerKind::Sage => "sage",
            OptimizerKind::Fusion => "fusion",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerKind {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "momentum" => Ok(OptimizerKind::Momentum),
            "adam" => Ok(OptimizerKind::Adam),
            "apollo" => Ok(OptimizerKind::Apollo),
            "sage" => Ok(OptimizerKind::Sage),
            "fusion" => Ok(OptimizerKind::Fusion),
            _ => Err(LabError::UnknownOptimizer(s.to_string())),
        }
    }
}

/// Per-kind optimizer state.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerState {
    Sgd,
    Momentum(MomentumState),
    Adam(AdamState),
    Apollo(ApolloState),
    Sage(SageState),
    Fusion(FusionState),
}

impl OptimizerState {
    /// Fresh state for `cfg.kind`, sized for `params`.
    pub fn new(params: &Params, cfg: &OptimizerConfig) -> Self {
        match cfg.kind {
            OptimizerKind::Sgd => OptimizerState::Sgd,
            OptimizerKind::Momentum => OptimizerState::Momentum(MomentumState::new(params)),
            OptimizerKind::Adam => OptimizerState::Adam(AdamState::new(params)),
            OptimizerKind::Apollo => OptimizerState::Apollo(ApolloState::new(params)),
            OptimizerKind::Sage => OptimizerState::Sage(SageState::new(params, &cfg.sage)),
            OptimizerKind::Fusion => OptimizerState::Fusion(FusionState::new(params, &cfg.fusion)),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerState::Sgd => OptimizerKind::Sgd,
            OptimizerState::Momentum(_) => OptimizerKind::Momentum,
            OptimizerState::Adam(_) => OptimizerKind::Adam,
            OptimizerState::Apollo(_) => OptimizerKind::Apollo,
            OptimizerState::Sage(_) => OptimizerKind::Sage,
            OptimizerState::Fusion(_) => OptimizerKind::Fusion,
        }
    }

    /// Applies one update with learning rate `lr`.
    ///
    /// Hyperparameters other than the structural ones (`kind`, `k`, seeds)
    /// are read from `cfg` on every call and may change between steps.
    pub fn step(&mut self, params: &mut Params, grads: &Gradients, lr: f64, cfg: &OptimizerConfig) {
        debug_assert_eq!(params.shape(), grads.shape());
        match self {
            OptimizerState::Sgd => sgd_step(params, grads, lr),
            OptimizerState::Momentum(s) => s.step(params, grads, lr, cfg.momentum),
            OptimizerState::Adam(s) => s.step(params, grads, lr, &cfg.adam),
            OptimizerState::Apollo(s) => s.step(params, grads, lr, &cfg.adam, &cfg.apollo),
            OptimizerState::Sage(s) => s.step(params, grads, lr, &cfg.adam, &cfg.sage),
            OptimizerState::Fusion(s) => s.step(params, grads, lr, &cfg.adam, &cfg.fusion),
        }
    }
}

/// Learning rate scheduler trait.
pub trait LrScheduler {
    /// Learning rate for the given epoch.
    fn get_lr(&self, epoch: usize) -> f64;
}

/// Step decay: `lr · gamma^floor(epoch / interval)`.
///
/// Disabled (constant `lr`) when `interval == 0` or `gamma == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecay {
    pub initial_lr: f64,
    pub interval: usize,
    pub gamma: f64,
}

impl StepDecay {
    pub fn new(initial_lr: f64, interval: usize, gamma: f64) -> Self {
        Self {
            initial_lr,
            interval,
            gamma,
        }
    }
}

impl LrScheduler for StepDecay {
    fn get_lr(&self, epoch: usize) -> f64 {
        if self.interval == 0 || self.gamma == 1.0 {
            return self.initial_lr;
        }
        let n_steps = epoch / self.interval;
        if n_steps == 0 {
            return self.initial_lr;
        }
        self.initial_lr * self.gamma.powi(n_steps.min(i32::MAX as usize) as i32)
    }
}
