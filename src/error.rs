//! Unified error types for fusion-lab.
//!
//! This module provides [`LabError`], the error type returned at the crate's
//! boundaries: building a trainer, validating datasets and parsing names.
//! The numeric core (forward, backprop, optimizer steps) is total and never
//! returns errors. It uses the `thiserror` crate for ergonomic error handling.
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::LabError;
//!
//! fn check_lengths(features: usize, labels: usize) -> Result<(), LabError> {
//!     if features != labels {
//!         return Err(LabError::shape_mismatch(&[features], &[labels]));
//!     }
//!     Ok(())
//! }
//! assert!(check_lengths(4, 3).is_err());
//! ```

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for fusion-lab operations.
#[derive(Error, Debug)]
pub enum LabError {
    /// Shape mismatch between expected and actual dimensions.
    ///
    /// Raised when feature rows and labels disagree in length, or when a
    /// feature row does not have the network's input dimension.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape received.
        got: Vec<usize>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dataset is unusable (empty split, empty feature set, ...).
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A label outside {0, 1}.
    #[error("Label at index {index} must be 0 or 1, got {label}")]
    InvalidLabel {
        /// Sample index.
        index: usize,
        /// Offending label value.
        label: u8,
    },

    /// Unknown dataset name.
    #[error("Unknown dataset '{0}' (expected AND, OR, XOR, CIRCLES or SPIRAL)")]
    UnknownDataset(String),

    /// Unknown activation name.
    #[error("Unknown activation '{0}' (expected relu, silu, gelu, tanh or sigmoid)")]
    UnknownActivation(String),

    /// Unknown optimizer name.
    #[error("Unknown optimizer '{0}' (expected sgd, momentum, adam, apollo, sage or fusion)")]
    UnknownOptimizer(String),
}

/// Result type alias for fusion-lab operations.
pub type LabResult<T> = Result<T, LabError>;

impl LabError {
    /// Creates a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        LabError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Creates an invalid data error.
    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        LabError::InvalidData(msg.into())
    }

    /// Creates an invalid label error.
    pub fn invalid_label(index: usize, label: u8) -> Self {
        LabError::InvalidLabel { index, label }
    }
}
