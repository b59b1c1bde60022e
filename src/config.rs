//! Configuration surface and hyperparameters.
//!
//! This module provides the validated configuration consumed by the
//! [`Trainer`](crate::trainer::Trainer):
//!
//! - [`NetworkConfig`]: architecture, regularization and init seed
//! - [`OptimizerConfig`]: optimizer choice and every per-optimizer knob
//! - [`TrainConfig`]: minibatching, early stopping, split and shuffle seeds
//!
//! bundled as [`LabConfig`].
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::{LabConfig, NetworkConfig, OptimizerKind};
//!
//! let mut config = LabConfig::default();
//! config.network = NetworkConfig { h1: 4, h2: 0, ..Default::default() };
//! config.optimizer.kind = OptimizerKind::Adam;
//! config.validate().expect("valid configuration");
//!
//! config.network.h1 = 0;
//! assert!(config.validate().is_err());
//! ```
//!
//! # Ranges
//!
//! | Parameter | Range |
//! |-----------|-------|
//! | `h1` | 1-24 |
//! | `h2` | 0-24 (0 = no second hidden layer) |
//! | `dropout1`, `dropout2` | 0-0.6 |
//! | `l2_lambda` | 0-0.01 |

use crate::activation::Activation;
use crate::network::{DropoutConfig, ParamShape};
use crate::optimizer::OptimizerKind;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Feature dimension of every toy dataset.
pub const INPUT_DIM: usize = 2;

/// Widest allowed hidden layer.
pub const MAX_HIDDEN: usize = 24;

/// Largest allowed dropout probability.
pub const MAX_DROPOUT: f64 = 0.6;

/// Largest allowed L2 coefficient.
pub const MAX_L2_LAMBDA: f64 = 0.01;

/// Architecture and regularization.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    /// Input dimension (2 for the bundled datasets).
    pub input_dim: usize,

    /// First hidden layer width.
    pub h1: usize,

    /// Second hidden layer width, 0 = absent.
    pub h2: usize,

    /// Hidden activation.
    pub activation: Activation,

    /// Dropout probability after hidden1.
    pub dropout1: f64,

    /// Dropout probability after hidden2.
    pub dropout2: f64,

    /// L2 coefficient on weight matrices.
    pub l2_lambda: f64,

    /// Seed of the parameter initializer.
    pub init_seed: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_dim: INPUT_DIM,
            h1: 10,
            h2: 8,
            activation: Activation::Tanh,
            dropout1: 0.1,
            dropout2: 0.1,
            l2_lambda: 0.001,
            init_seed: 7,
        }
    }
}

impl NetworkConfig {
    pub fn shape(&self) -> ParamShape {
        ParamShape {
            input_dim: self.input_dim,
            h1: self.h1,
            h2: self.h2,
        }
    }

    pub fn dropout(&self) -> DropoutConfig {
        DropoutConfig {
            p1: self.dropout1,
            p2: self.dropout2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_dim == 0 {
            return Err(ConfigError::InvalidDimension("input_dim must be > 0"));
        }
        if self.h1 == 0 || self.h1 > MAX_HIDDEN {
            return Err(ConfigError::InvalidHidden1(self.h1));
        }
        if self.h2 > MAX_HIDDEN {
            return Err(ConfigError::InvalidHidden2(self.h2));
        }
        for (layer, p) in [(1, self.dropout1), (2, self.dropout2)] {
            if !(0.0..=MAX_DROPOUT).contains(&p) {
                return Err(ConfigError::InvalidDropout { layer, p });
            }
        }
        if !(0.0..=MAX_L2_LAMBDA).contains(&self.l2_lambda) {
            return Err(ConfigError::InvalidL2(self.l2_lambda));
        }
        Ok(())
    }
}

/// Adam moment decays, shared by every Adam-based rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdamConfig {
    /// First moment decay.
    pub beta1: f64,
    /// Second moment decay.
    pub beta2: f64,
    /// Denominator floor.
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Confidence scaling for the standalone ApoLLO rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ApolloConfig {
    /// Decay of the unit-direction EMA.
    pub beta3: f64,
    /// Exponent applied to the confidence.
    pub gamma: f64,
}

impl Default for ApolloConfig {
    fn default() -> Self {
        Self {
            beta3: 0.9,
            gamma: 1.0,
        }
    }
}

/// Spectral preconditioning for the standalone SAGE rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SageConfig {
    /// Projection rank.
    pub k: usize,
    /// Covariance EMA decay.
    pub decay: f64,
    /// Steps between eigen refreshes.
    pub update_interval: u64,
    /// Seed of the projection matrix.
    pub projection_seed: u32,
}

impl Default for SageConfig {
    fn default() -> Self {
        Self {
            k: 20,
            decay: 0.99,
            update_interval: 5,
            projection_seed: 12345,
        }
    }
}

/// Knobs of the composite Fusion rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FusionConfig {
    /// Projection rank.
    pub k: usize,
    /// OPAL history length.
    pub r: usize,
    /// OPAL weight of the in-history component.
    pub alpha_para: f64,
    /// OPAL weight of the novel component.
    pub alpha_orth: f64,
    /// DEO proportional gain.
    pub kp: f64,
    /// DEO integral gain.
    pub ki: f64,
    /// DEO derivative gain.
    pub kd: f64,
    /// DEO integral leak.
    pub i_decay: f64,
    /// ApoLLO-at-k direction EMA decay.
    pub beta3: f64,
    /// ApoLLO-at-k confidence exponent.
    pub gamma: f64,
    /// Covariance EMA decay.
    pub sage_decay: f64,
    /// Steps between eigen refreshes.
    pub update_interval: u64,
    /// Max L2 norm of the raw gradient, 0 = off.
    pub clip: f64,
    /// Decoupled weight decay, 0 = off.
    pub weight_decay: f64,
    /// Seed of the projection matrix.
    pub projection_seed: u32,
    pub enable_sage: bool,
    pub enable_opal: bool,
    pub enable_deo: bool,
    pub enable_apollo: bool,
    pub enable_sgds: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: 20,
            r: 4,
            alpha_para: 1.0,
            alpha_orth: 1.0,
            kp: 1.0,
            ki: 0.3,
            kd: 0.1,
            i_decay: 0.95,
            beta3: 0.9,
            gamma: 1.0,
            sage_decay: 0.99,
            update_interval: 5,
            clip: 3.0,
            weight_decay: 0.0,
            projection_seed: 1337,
            enable_sage: true,
            enable_opal: true,
            enable_deo: true,
            enable_apollo: true,
            enable_sgds: true,
        }
    }
}

impl FusionConfig {
    /// Every stage flag cleared, clip and weight decay off.
    ///
    /// The resulting rule is per-column Adam on the raw gradient.
    pub fn all_disabled() -> Self {
        Self {
            clip: 0.0,
            weight_decay: 0.0,
            enable_sage: false,
            enable_opal: false,
            enable_deo: false,
            enable_apollo: false,
            enable_sgds: false,
            ..Self::default()
        }
    }

    /// True when any stage that works in the projected space is on.
    #[inline]
    pub fn any_projected_stage(&self) -> bool {
        self.enable_sage || self.enable_opal || self.enable_deo || self.enable_apollo
    }
}

/// Optimizer selection and hyperparameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    /// Base learning rate before step decay.
    pub lr: f64,
    /// Momentum coefficient (Momentum rule only).
    pub momentum: f64,
    pub adam: AdamConfig,
    pub apollo: ApolloConfig,
    pub sage: SageConfig,
    pub fusion: FusionConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Fusion,
            lr: 0.12,
            momentum: 0.9,
            adam: AdamConfig::default(),
            apollo: ApolloConfig::default(),
            sage: SageConfig::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Default hyperparameters for `kind` with learning rate `lr`.
    pub fn with_lr(kind: OptimizerKind, lr: f64) -> Self {
        Self {
            kind,
            lr,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.lr));
        }
        check_decay("momentum", self.momentum)?;
        check_decay("adam.beta1", self.adam.beta1)?;
        check_decay("adam.beta2", self.adam.beta2)?;
        if self.adam.epsilon.is_nan() || self.adam.epsilon <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "adam.epsilon",
                value: self.adam.epsilon,
            });
        }
        check_decay("apollo.beta3", self.apollo.beta3)?;
        check_non_negative("apollo.gamma", self.apollo.gamma)?;

        if self.sage.k == 0 {
            return Err(ConfigError::InvalidRank(self.sage.k));
        }
        check_decay("sage.decay", self.sage.decay)?;
        if self.sage.update_interval == 0 {
            return Err(ConfigError::InvalidDimension(
                "sage.update_interval must be > 0",
            ));
        }

        let f = &self.fusion;
        if f.k == 0 {
            return Err(ConfigError::InvalidRank(f.k));
        }
        if f.r == 0 {
            return Err(ConfigError::InvalidDimension("fusion.r must be > 0"));
        }
        if f.update_interval == 0 {
            return Err(ConfigError::InvalidDimension(
                "fusion.update_interval must be > 0",
            ));
        }
        check_decay("fusion.i_decay", f.i_decay)?;
        check_decay("fusion.beta3", f.beta3)?;
        check_decay("fusion.sage_decay", f.sage_decay)?;
        check_non_negative("fusion.gamma", f.gamma)?;
        check_non_negative("fusion.clip", f.clip)?;
        check_non_negative("fusion.weight_decay", f.weight_decay)?;
        for (name, value) in [
            ("fusion.alpha_para", f.alpha_para),
            ("fusion.alpha_orth", f.alpha_orth),
            ("fusion.kp", f.kp),
            ("fusion.ki", f.ki),
            ("fusion.kd", f.kd),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidValue { name, value });
            }
        }
        Ok(())
    }
}

/// Decays live in [0, 1].
fn check_decay(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, value })
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, value })
    }
}

/// Training-loop settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainConfig {
    /// Minibatch size; the last batch of an epoch may be smaller.
    pub batch_size: usize,
    /// Epochs without validation improvement before early stop.
    pub patience: usize,
    /// Fraction of the dataset held out for validation.
    pub val_ratio: f64,
    /// Seed of the train/validation permutation.
    pub split_seed: u32,
    /// Base seed of the per-epoch shuffle generator.
    pub shuffle_key: u32,
    /// Epochs between learning-rate decays, 0 = off.
    pub step_decay_interval: usize,
    /// Multiplicative decay applied every interval.
    pub step_decay_gamma: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            patience: 20,
            val_ratio: 0.2,
            split_seed: 12345,
            shuffle_key: 555,
            step_decay_interval: 0,
            step_decay_gamma: 1.0,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidDimension("batch_size must be > 0"));
        }
        if self.val_ratio.is_nan() || self.val_ratio <= 0.0 || self.val_ratio >= 1.0 {
            return Err(ConfigError::InvalidValRatio(self.val_ratio));
        }
        if !(self.step_decay_gamma.is_finite() && self.step_decay_gamma > 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "step_decay_gamma",
                value: self.step_decay_gamma,
            });
        }
        Ok(())
    }
}

/// Everything needed to build a trainer.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LabConfig {
    pub network: NetworkConfig,
    pub optimizer: OptimizerConfig,
    pub train: TrainConfig,
}

impl LabConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.optimizer.validate()?;
        self.train.validate()
    }
}

/// Errors returned by the `validate` methods.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A dimension or count is invalid.
    #[error("Invalid dimension: {0}")]
    InvalidDimension(&'static str),

    /// First hidden width outside 1-24.
    #[error("h1 must be 1-{max}, got {0}", max = MAX_HIDDEN)]
    InvalidHidden1(usize),

    /// Second hidden width outside 0-24.
    #[error("h2 must be 0-{max}, got {0}", max = MAX_HIDDEN)]
    InvalidHidden2(usize),

    /// Dropout probability outside 0-0.6.
    #[error("dropout{layer} must be 0-{max}, got {p}", max = MAX_DROPOUT)]
    InvalidDropout { layer: usize, p: f64 },

    /// L2 coefficient outside 0-0.01.
    #[error("L2 lambda must be 0-{max}, got {0}", max = MAX_L2_LAMBDA)]
    InvalidL2(f64),

    /// Learning rate not positive and finite.
    #[error("Learning rate must be positive, got {0}")]
    InvalidLearningRate(f64),

    /// Projection rank of zero.
    #[error("Projection rank k must be > 0, got {0}")]
    InvalidRank(usize),

    /// Validation fraction outside (0, 1).
    #[error("Validation ratio must be in (0, 1), got {0}")]
    InvalidValRatio(f64),

    /// Any other out-of-range scalar.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = LabConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.kind, OptimizerKind::Fusion);
        assert_eq!(config.optimizer.fusion.projection_seed, 1337);
        assert_eq!(config.optimizer.sage.projection_seed, 12345);
    }

    #[test]
    fn test_hidden_ranges() {
        let mut net = NetworkConfig::default();
        net.h1 = 0;
        assert_eq!(net.validate(), Err(ConfigError::InvalidHidden1(0)));
        net.h1 = 25;
        assert_eq!(net.validate(), Err(ConfigError::InvalidHidden1(25)));
        net.h1 = 24;
        net.h2 = 0;
        assert!(net.validate().is_ok());
        net.h2 = 25;
        assert_eq!(net.validate(), Err(ConfigError::InvalidHidden2(25)));
    }

    #[test]
    fn test_regularization_ranges() {
        let mut net = NetworkConfig::default();
        net.dropout2 = 0.7;
        assert!(matches!(
            net.validate(),
            Err(ConfigError::InvalidDropout { layer: 2, .. })
        ));
        net.dropout2 = 0.6;
        net.l2_lambda = 0.02;
        assert_eq!(net.validate(), Err(ConfigError::InvalidL2(0.02)));
    }

    #[test]
    fn test_optimizer_ranges() {
        let mut opt = OptimizerConfig::default();
        opt.lr = 0.0;
        assert!(opt.validate().is_err());
        opt.lr = 0.05;
        opt.fusion.k = 0;
        assert_eq!(opt.validate(), Err(ConfigError::InvalidRank(0)));
        opt.fusion.k = 8;
        opt.fusion.clip = -1.0;
        assert!(opt.validate().is_err());
        opt.fusion.clip = 0.0;
        opt.adam.beta2 = 1.5;
        assert!(opt.validate().is_err());
    }

    #[test]
    fn test_train_ranges() {
        let mut train = TrainConfig::default();
        train.val_ratio = 1.0;
        assert!(train.validate().is_err());
        train.val_ratio = 0.3;
        train.batch_size = 0;
        assert!(train.validate().is_err());
    }

    #[test]
    fn test_fusion_all_disabled() {
        let f = FusionConfig::all_disabled();
        assert!(!f.any_projected_stage());
        assert!(!f.enable_sgds);
        assert_eq!(f.clip, 0.0);
        assert!(FusionConfig::default().any_projected_stage());
    }
}
