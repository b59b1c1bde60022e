//! # Fusion Lab - Optimizer Playground for Small Classifiers
//!
//! A 2-input feed-forward binary classifier (one or two hidden layers,
//! sigmoid output) trained on toy 2-D datasets with six update rules:
//! SGD, Momentum, Adam, ApoLLO, SAGE and the composite Fusion optimizer.
//!
//! ## Architecture
//! - Row-major [`Matrix`] of `f64` for all numeric state
//! - Seeded [`Mulberry32`] streams for data, init, shuffling and dropout
//! - Parameters flatten in a fixed order: W1, b1, [W2, b2], Wout, bout
//! - Fusion composes clipping, SAGE, OPAL, DEO and ApoLLO-k in a rank-k
//!   projected space, then per-column Adam with SGD-S gating
//!
//! ## Usage
//! ```rust
//! use fusion_lab::dataset::{generate, DatasetKind};
//! use fusion_lab::{LabConfig, Trainer};
//!
//! let data = generate(DatasetKind::Circles, 42);
//! let mut trainer = Trainer::new(LabConfig::default(), data).unwrap();
//! trainer.train_epochs(5, true);
//!
//! let cm = trainer.confusion_matrix();
//! assert_eq!(cm.total(), trainer.split().val.len());
//! ```

pub mod activation;
pub mod config;
pub mod dataset;
pub mod error;
pub mod layer;
pub mod linalg;
pub mod loss;
pub mod network;
pub mod optimizer;
pub mod rng;
pub mod spectral;
pub mod trainer;

// Re-exports
pub use activation::{sigmoid, Activation};
pub use config::{ConfigError, LabConfig, NetworkConfig, OptimizerConfig, TrainConfig};
pub use dataset::{Dataset, DatasetKind, Split};
pub use error::{LabError, LabResult};
pub use layer::Dense;
pub use linalg::{Eigenpairs, Matrix};
pub use loss::{binary_cross_entropy, ConfusionMatrix};
pub use network::{backprop, forward, predict, Backprop, DropoutConfig, ParamShape, Params};
pub use optimizer::{LrScheduler, OptimizerKind, OptimizerState, StepDecay};
pub use rng::{epoch_seed, Mulberry32};
pub use spectral::{spectral_correct, SpectralTracker};
pub use trainer::{History, Metrics, TrainReport, Trainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
