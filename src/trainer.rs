//! Training-loop driver.
//!
//! A [`Trainer`] owns the dataset split, the live parameters, the optimizer
//! state and the run bookkeeping (epoch counter, best validation loss,
//! patience counter, metric histories).
//!
//! # Copy-on-write runs
//!
//! [`Trainer::train_epochs`] clones the parameters and optimizer state,
//! runs every requested epoch against the clones and commits them back in
//! one assignment at the end. Observers never see a half-applied run; the
//! only early exit is the per-epoch early-stop check.
//!
//! # Reproducibility
//!
//! Epoch `e` draws its minibatch order and its dropout masks from one
//! generator seeded with [`epoch_seed`]`(shuffle_key, e)`. Post-epoch
//! evaluation runs with dropout off and a fixed generator.
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::dataset::{generate, DatasetKind};
//! use fusion_lab::{LabConfig, OptimizerKind, Trainer};
//!
//! let mut config = LabConfig::default();
//! config.optimizer.kind = OptimizerKind::Adam;
//! config.optimizer.lr = 0.05;
//!
//! let data = generate(DatasetKind::Xor, 42);
//! let mut trainer = Trainer::new(config, data).unwrap();
//! let report = trainer.train_epochs(3, false);
//! assert_eq!(report.epochs_run, 3);
//! assert_eq!(trainer.history().val_loss.len(), 3);
//! ```

use crate::config::{LabConfig, NetworkConfig, OptimizerConfig, TrainConfig};
use crate::dataset::{Dataset, Split};
use crate::error::{LabError, LabResult};
use crate::linalg::Matrix;
use crate::loss::ConfusionMatrix;
use crate::network::{self, backprop, forward, DropoutConfig, Params};
use crate::optimizer::{LrScheduler, OptimizerState, StepDecay};
use crate::rng::{epoch_seed, Mulberry32};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Seed of the generator used for post-epoch evaluation.
pub const EVAL_SEED: u32 = 999;

/// Seed of the generator used for the confusion matrix.
pub const CONFUSION_SEED: u32 = 1234;

/// Minimum validation-loss decrease that counts as an improvement.
pub const IMPROVEMENT_EPS: f64 = 1e-9;

/// Metrics of the latest committed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metrics {
    /// Epochs committed so far.
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub train_acc: f64,
    pub val_acc: f64,
}

/// Per-epoch metric sequences, one entry per committed epoch.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct History {
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub train_acc: Vec<f64>,
    pub val_acc: Vec<f64>,
}

impl History {
    pub fn len(&self) -> usize {
        self.val_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val_loss.is_empty()
    }

    fn push(&mut self, train: (f64, f64), val: (f64, f64)) {
        self.train_loss.push(train.0);
        self.train_acc.push(train.1);
        self.val_loss.push(val.0);
        self.val_acc.push(val.1);
    }

    fn extend(&mut self, other: History) {
        self.train_loss.extend(other.train_loss);
        self.val_loss.extend(other.val_loss);
        self.train_acc.extend(other.train_acc);
        self.val_acc.extend(other.val_acc);
    }
}

/// Outcome of one [`Trainer::train_epochs`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainReport {
    /// Epochs actually run and committed.
    pub epochs_run: usize,
    /// True when the request ended on the early-stop check.
    pub stopped_early: bool,
}

/// Owns the run state and performs training requests.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: LabConfig,
    dataset: Dataset,
    split: Split,
    params: Params,
    optimizer: OptimizerState,
    epoch: usize,
    best_val: f64,
    wait: usize,
    metrics: Metrics,
    history: History,
}

impl Trainer {
    /// Validates `config` and `dataset`, splits the data and initializes
    /// parameters and optimizer state.
    pub fn new(config: LabConfig, dataset: Dataset) -> LabResult<Self> {
        config.validate()?;
        dataset.validate()?;
        check_input_dim(&config.network, &dataset)?;
        let split = dataset.split(config.train.val_ratio, config.train.split_seed)?;

        let params = init_params(&config.network);
        let optimizer = OptimizerState::new(&params, &config.optimizer);
        log::info!(
            "trainer ready: {} train / {} val samples, {} parameters, optimizer {}",
            split.train.len(),
            split.val.len(),
            params.param_count(),
            config.optimizer.kind
        );

        Ok(Self {
            config,
            dataset,
            split,
            params,
            optimizer,
            epoch: 0,
            best_val: f64::INFINITY,
            wait: 0,
            metrics: Metrics::default(),
            history: History::default(),
        })
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn optimizer(&self) -> &OptimizerState {
        &self.optimizer
    }

    /// Epochs committed so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Best validation loss seen since the last reset.
    pub fn best_val_loss(&self) -> f64 {
        self.best_val
    }

    /// Epochs since the last validation improvement.
    pub fn wait(&self) -> usize {
        self.wait
    }

    /// True once the patience budget is used up.
    pub fn patience_exhausted(&self) -> bool {
        self.wait >= self.config.train.patience
    }

    /// Learning rate used during `epoch`.
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        scheduler(&self.config).get_lr(epoch)
    }

    /// Runs `n` epochs against copies of the live state and commits them.
    ///
    /// With `early_stop`, the request ends after the first epoch that leaves
    /// the patience counter at or above `patience`.
    pub fn train_epochs(&mut self, n: usize, early_stop: bool) -> TrainReport {
        let cfg = &self.config;
        let train = &self.split.train;
        let val = &self.split.val;
        let activation = cfg.network.activation;
        let dropout = cfg.network.dropout();
        let lambda = cfg.network.l2_lambda;
        let schedule = scheduler(cfg);

        let mut params = self.params.clone();
        let mut optimizer = self.optimizer.clone();
        let mut best = self.best_val;
        let mut wait = self.wait;
        let mut history = History::default();
        let mut stopped_early = false;

        for offset in 0..n {
            let epoch = self.epoch + offset;
            let lr = schedule.get_lr(epoch);
            let mut rng = Mulberry32::new(epoch_seed(cfg.train.shuffle_key, epoch));
            let order = rng.shuffled(train.len());

            for batch in order.chunks(cfg.train.batch_size) {
                let b = train.select(batch);
                let bp = backprop(&b.x, &b.y, &params, activation, dropout, lambda, &mut rng, true);
                optimizer.step(&mut params, &bp.grads, lr, &cfg.optimizer);
            }

            let train_eval = evaluate(&params, train, &cfg.network);
            let val_eval = evaluate(&params, val, &cfg.network);
            if !train_eval.0.is_finite() || !val_eval.0.is_finite() {
                log::warn!(
                    "epoch {}: loss diverged (train {}, val {}) at lr {}",
                    epoch + 1,
                    train_eval.0,
                    val_eval.0,
                    lr
                );
            }
            history.push(train_eval, val_eval);

            if val_eval.0 + IMPROVEMENT_EPS < best {
                best = val_eval.0;
                wait = 0;
            } else {
                wait += 1;
            }
            log::debug!(
                "epoch {}: lr={:.5} loss={:.5}/{:.5} acc={:.3}/{:.3} wait={}",
                epoch + 1,
                lr,
                train_eval.0,
                val_eval.0,
                train_eval.1,
                val_eval.1,
                wait
            );

            if early_stop && wait >= cfg.train.patience {
                log::info!(
                    "early stop after epoch {}: no improvement on {:.5} for {} epochs",
                    epoch + 1,
                    best,
                    wait
                );
                stopped_early = true;
                break;
            }
        }

        let epochs_run = history.len();
        self.params = params;
        self.optimizer = optimizer;
        self.epoch += epochs_run;
        self.best_val = best;
        self.wait = wait;
        if epochs_run > 0 {
            let last = epochs_run - 1;
            self.metrics = Metrics {
                epoch: self.epoch,
                train_loss: history.train_loss[last],
                val_loss: history.val_loss[last],
                train_acc: history.train_acc[last],
                val_acc: history.val_acc[last],
            };
        }
        self.history.extend(history);

        TrainReport {
            epochs_run,
            stopped_early,
        }
    }

    /// Reinitializes parameters and optimizer state and clears the run
    /// bookkeeping. Configuration and split are kept.
    pub fn reset(&mut self) {
        self.params = init_params(&self.config.network);
        self.optimizer = OptimizerState::new(&self.params, &self.config.optimizer);
        self.epoch = 0;
        self.best_val = f64::INFINITY;
        self.wait = 0;
        self.metrics = Metrics::default();
        self.history = History::default();
        log::info!(
            "training state reset: {} parameters, optimizer {}",
            self.params.param_count(),
            self.config.optimizer.kind
        );
    }

    /// Replaces the network configuration.
    ///
    /// Architecture, activation or init-seed changes reset the whole run;
    /// dropout and L2 changes apply from the next request on.
    pub fn set_network(&mut self, network: NetworkConfig) -> LabResult<()> {
        network.validate()?;
        check_input_dim(&network, &self.dataset)?;
        let old = &self.config.network;
        let structural = old.shape() != network.shape()
            || old.activation != network.activation
            || old.init_seed != network.init_seed;
        self.config.network = network;
        if structural {
            self.reset();
        }
        Ok(())
    }

    /// Replaces the optimizer configuration.
    ///
    /// A different kind, projection rank or projection seed rebuilds the
    /// optimizer state; parameters and run bookkeeping are kept. Any other
    /// change (learning rate, stage flags, gains, OPAL history length) is
    /// picked up by the next step with the state intact.
    pub fn set_optimizer(&mut self, optimizer: OptimizerConfig) -> LabResult<()> {
        optimizer.validate()?;
        let old = &self.config.optimizer;
        let rebuild = old.kind != optimizer.kind
            || old.sage.k != optimizer.sage.k
            || old.sage.projection_seed != optimizer.sage.projection_seed
            || old.fusion.k != optimizer.fusion.k
            || old.fusion.projection_seed != optimizer.fusion.projection_seed;
        self.config.optimizer = optimizer;
        if rebuild {
            self.optimizer = OptimizerState::new(&self.params, &self.config.optimizer);
            log::info!("optimizer state rebuilt for {}", self.config.optimizer.kind);
        }
        Ok(())
    }

    /// Replaces the training-loop configuration.
    ///
    /// A different split seed or validation ratio re-splits the dataset and
    /// resets the run.
    pub fn set_train_config(&mut self, train: TrainConfig) -> LabResult<()> {
        train.validate()?;
        let resplit = self.config.train.split_seed != train.split_seed
            || self.config.train.val_ratio != train.val_ratio;
        if resplit {
            self.split = self.dataset.split(train.val_ratio, train.split_seed)?;
        }
        self.config.train = train;
        if resplit {
            self.reset();
        }
        Ok(())
    }

    /// Confusion matrix of the current parameters over the validation split.
    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        let val = &self.split.val;
        let mut rng = Mulberry32::new(CONFUSION_SEED);
        let cache = forward(
            &val.x,
            &self.params,
            self.config.network.activation,
            DropoutConfig::NONE,
            false,
            &mut rng,
        );
        ConfusionMatrix::from_predictions(&cache.probs, &val.y)
    }

    /// `P(class 1)` of the current parameters on a grid over [-1, 1]².
    pub fn decision_surface(&self, resolution: usize) -> Matrix {
        network::decision_surface(&self.params, self.config.network.activation, resolution)
    }
}

fn init_params(cfg: &NetworkConfig) -> Params {
    network::init(cfg.input_dim, cfg.h1, cfg.h2, cfg.init_seed, cfg.activation)
}

fn scheduler(cfg: &LabConfig) -> StepDecay {
    StepDecay::new(
        cfg.optimizer.lr,
        cfg.train.step_decay_interval,
        cfg.train.step_decay_gamma,
    )
}

fn check_input_dim(cfg: &NetworkConfig, dataset: &Dataset) -> LabResult<()> {
    if dataset.input_dim() != cfg.input_dim {
        return Err(LabError::shape_mismatch(
            &[dataset.len(), cfg.input_dim],
            &[dataset.len(), dataset.input_dim()],
        ));
    }
    Ok(())
}

/// `(loss, accuracy)` over `data` with dropout off and the evaluation seed.
fn evaluate(params: &Params, data: &Dataset, cfg: &NetworkConfig) -> (f64, f64) {
    let mut rng = Mulberry32::new(EVAL_SEED);
    let bp = backprop(
        &data.x,
        &data.y,
        params,
        cfg.activation,
        DropoutConfig::NONE,
        cfg.l2_lambda,
        &mut rng,
        false,
    );
    (bp.loss, bp.accuracy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{generate, DatasetKind};
    use crate::optimizer::OptimizerKind;

    fn small_config(kind: OptimizerKind) -> LabConfig {
        let mut config = LabConfig::default();
        config.network.h1 = 6;
        config.network.h2 = 0;
        config.optimizer.kind = kind;
        config.optimizer.lr = 0.05;
        config
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut config = small_config(OptimizerKind::Adam);
        config.network.h1 = 0;
        let err = Trainer::new(config, generate(DatasetKind::And, 1)).unwrap_err();
        assert!(matches!(err, LabError::Config(_)));

        let mut config = small_config(OptimizerKind::Adam);
        config.network.input_dim = 3;
        let err = Trainer::new(config, generate(DatasetKind::And, 1)).unwrap_err();
        assert!(matches!(err, LabError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_metrics_and_history_track_epochs() {
        let mut t = Trainer::new(
            small_config(OptimizerKind::Momentum),
            generate(DatasetKind::Or, 3),
        )
        .unwrap();
        assert_eq!(t.metrics(), &Metrics::default());
        t.train_epochs(2, false);
        t.train_epochs(3, false);
        assert_eq!(t.epoch(), 5);
        assert_eq!(t.metrics().epoch, 5);
        assert_eq!(t.history().len(), 5);
        assert_eq!(t.metrics().val_loss, t.history().val_loss[4]);
        assert!(t.best_val_loss().is_finite());
    }

    #[test]
    fn test_zero_epoch_request_is_noop() {
        let mut t = Trainer::new(
            small_config(OptimizerKind::Sgd),
            generate(DatasetKind::And, 3),
        )
        .unwrap();
        let before = t.params().clone();
        let report = t.train_epochs(0, true);
        assert_eq!(report.epochs_run, 0);
        assert_eq!(t.params(), &before);
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut t = Trainer::new(
            small_config(OptimizerKind::Fusion),
            generate(DatasetKind::Xor, 5),
        )
        .unwrap();
        let initial = t.params().clone();
        t.train_epochs(2, false);
        assert_ne!(t.params(), &initial);
        t.reset();
        assert_eq!(t.params(), &initial);
        assert_eq!(t.epoch(), 0);
        assert_eq!(t.wait(), 0);
        assert!(t.best_val_loss().is_infinite());
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_set_optimizer_rebuilds_or_keeps_state() {
        let mut t = Trainer::new(
            small_config(OptimizerKind::Fusion),
            generate(DatasetKind::Xor, 5),
        )
        .unwrap();
        t.train_epochs(1, false);

        // Flag change: state survives.
        let mut cfg = t.config().optimizer.clone();
        cfg.fusion.enable_deo = false;
        let before = t.optimizer().clone();
        t.set_optimizer(cfg.clone()).unwrap();
        assert_eq!(t.optimizer(), &before);
        assert_eq!(t.epoch(), 1);

        // Kind change: fresh state, same parameters and epoch.
        cfg.kind = OptimizerKind::Adam;
        let params = t.params().clone();
        t.set_optimizer(cfg.clone()).unwrap();
        assert_eq!(t.optimizer().kind(), OptimizerKind::Adam);
        assert_eq!(t.params(), &params);
        assert_eq!(t.epoch(), 1);

        // Rank change: fresh state sized for the new rank.
        cfg.kind = OptimizerKind::Fusion;
        t.set_optimizer(cfg.clone()).unwrap();
        t.train_epochs(1, false);
        cfg.fusion.k = 8;
        t.set_optimizer(cfg).unwrap();
        assert_eq!(t.epoch(), 2);
        match t.optimizer() {
            OptimizerState::Fusion(s) => {
                assert_eq!(s.t(), 0);
                assert_eq!(s.tracker.k(), 8);
            }
            other => panic!("unexpected state {:?}", other.kind()),
        }
    }

    #[test]
    fn test_set_network_structural_change_resets() {
        let mut t = Trainer::new(
            small_config(OptimizerKind::Adam),
            generate(DatasetKind::And, 2),
        )
        .unwrap();
        t.train_epochs(1, false);

        let mut net = t.config().network.clone();
        net.dropout1 = 0.2;
        t.set_network(net.clone()).unwrap();
        assert_eq!(t.epoch(), 1);

        net.h2 = 3;
        t.set_network(net).unwrap();
        assert_eq!(t.epoch(), 0);
        assert!(t.params().hidden2.is_some());
    }

    #[test]
    fn test_learning_rate_schedule() {
        let mut config = small_config(OptimizerKind::Sgd);
        config.train.step_decay_interval = 2;
        config.train.step_decay_gamma = 0.5;
        let t = Trainer::new(config, generate(DatasetKind::And, 2)).unwrap();
        assert_eq!(t.learning_rate(1), 0.05);
        assert!((t.learning_rate(2) - 0.025).abs() < 1e-15);
    }

    #[test]
    fn test_decision_surface_shape() {
        let t = Trainer::new(
            small_config(OptimizerKind::Adam),
            generate(DatasetKind::Circles, 2),
        )
        .unwrap();
        let s = t.decision_surface(16);
        assert_eq!(s.shape(), (16, 16));
        assert!(s.as_slice().iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
