//! Toy 2-D binary classification datasets and the train/validation split.
//!
//! | Name | Points | Shape |
//! |------|--------|-------|
//! | `AND`, `OR`, `XOR` | 96 | 24 jittered copies of each corner of [-1, 1]² |
//! | `CIRCLES` | 480 | inner ring r≈0.45 (class 0), outer ring r≈0.88 (class 1) |
//! | `SPIRAL` | 520 | two interleaved arms, 2.2 turns |
//!
//! Every generator is driven by a single [`Mulberry32`] seeded with the
//! dataset seed, so a `(kind, seed)` pair always yields the same points.
//!
//! # Example
//!
//! ```rust
//! use fusion_lab::dataset::{generate, DatasetKind};
//!
//! let data = generate(DatasetKind::Xor, 42);
//! assert_eq!(data.len(), 96);
//! let split = data.split(0.2, 12345).unwrap();
//! assert_eq!(split.train.len() + split.val.len(), 96);
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{LabError, LabResult};
use crate::linalg::Matrix;
use crate::rng::Mulberry32;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Points generated per corner of the logical datasets.
const POINTS_PER_CORNER: usize = 24;
/// Full width of the uniform corner jitter.
const CORNER_JITTER: f64 = 0.12;

const RING_POINTS: usize = 240;
const RING_NOISE: f64 = 0.06;
const INNER_RADIUS: f64 = 0.45;
const OUTER_RADIUS: f64 = 0.88;

const SPIRAL_POINTS: usize = 260;
const SPIRAL_TURNS: f64 = 2.2;
const SPIRAL_NOISE: f64 = 0.12;

/// Built-in dataset generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum DatasetKind {
    And,
    Or,
    Xor,
    Circles,
    #[default]
    Spiral,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [
        DatasetKind::And,
        DatasetKind::Or,
        DatasetKind::Xor,
        DatasetKind::Circles,
        DatasetKind::Spiral,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::And => "AND",
            DatasetKind::Or => "OR",
            DatasetKind::Xor => "XOR",
            DatasetKind::Circles => "CIRCLES",
            DatasetKind::Spiral => "SPIRAL",
        }
    }

    /// Label of corner `(x1, x2)` with coordinates in {-1, 1}.
    fn corner_label(self, x1: f64, x2: f64) -> u8 {
        let (a, b) = (x1 > 0.0, x2 > 0.0);
        let positive = match self {
            DatasetKind::And => a && b,
            DatasetKind::Or => a || b,
            _ => a != b,
        };
        u8::from(positive)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(DatasetKind::And),
            "OR" => Ok(DatasetKind::Or),
            "XOR" => Ok(DatasetKind::Xor),
            "CIRCLES" => Ok(DatasetKind::Circles),
            "SPIRAL" => Ok(DatasetKind::Spiral),
            _ => Err(LabError::UnknownDataset(s.to_string())),
        }
    }
}

/// Features (one sample per row) and binary labels.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dataset {
    pub x: Matrix,
    pub y: Vec<u8>,
}

/// Disjoint train/validation partition of a [`Dataset`].
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Dataset,
    pub val: Dataset,
}

impl Dataset {
    /// Builds a dataset after checking lengths and labels.
    pub fn new(x: Matrix, y: Vec<u8>) -> LabResult<Self> {
        let data = Self { x, y };
        data.validate()?;
        Ok(data)
    }

    /// Builds a dataset from 2-D points.
    pub fn from_points(points: &[[f64; 2]], y: Vec<u8>) -> LabResult<Self> {
        let x = Matrix::from_fn(points.len(), 2, |i, j| points[i][j]);
        Self::new(x, y)
    }

    /// Checks that every row has a label and every label is 0 or 1.
    pub fn validate(&self) -> LabResult<()> {
        if self.x.rows() != self.y.len() {
            return Err(LabError::shape_mismatch(
                &[self.x.rows(), self.x.cols()],
                &[self.y.len()],
            ));
        }
        if let Some((index, &label)) = self.y.iter().enumerate().find(|(_, &l)| l > 1) {
            return Err(LabError::invalid_label(index, label));
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.y.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.x.cols()
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        let x = Matrix::from_fn(indices.len(), self.x.cols(), |i, j| self.x.get(indices[i], j));
        let y = indices.iter().map(|&i| self.y[i]).collect();
        Dataset { x, y }
    }

    /// Shuffles with `Mulberry32(split_seed)` and keeps the first
    /// `floor(n·(1-val_ratio))` samples for training.
    ///
    /// Fails when either side would be empty.
    pub fn split(&self, val_ratio: f64, split_seed: u32) -> LabResult<Split> {
        let n = self.len();
        let order = Mulberry32::new(split_seed).shuffled(n);
        let n_train = (n as f64 * (1.0 - val_ratio)).floor() as usize;
        if n_train == 0 || n_train >= n {
            return Err(LabError::invalid_data(format!(
                "split of {} samples at ratio {} leaves an empty side",
                n, val_ratio
            )));
        }
        Ok(Split {
            train: self.select(&order[..n_train]),
            val: self.select(&order[n_train..]),
        })
    }
}

/// Generates the named dataset.
pub fn generate(kind: DatasetKind, seed: u32) -> Dataset {
    let mut rng = Mulberry32::new(seed);
    let mut points: Vec<[f64; 2]> = Vec::new();
    let mut labels = Vec::new();

    match kind {
        DatasetKind::And | DatasetKind::Or | DatasetKind::Xor => {
            for (cx, cy) in [(-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0), (1.0, 1.0)] {
                let label = kind.corner_label(cx, cy);
                for _ in 0..POINTS_PER_CORNER {
                    let jx = (rng.next_f64() - 0.5) * CORNER_JITTER;
                    let jy = (rng.next_f64() - 0.5) * CORNER_JITTER;
                    points.push([cx + jx, cy + jy]);
                    labels.push(label);
                }
            }
        }
        DatasetKind::Circles => {
            for (radius, label) in [(INNER_RADIUS, 0u8), (OUTER_RADIUS, 1u8)] {
                for _ in 0..RING_POINTS {
                    let angle = 2.0 * PI * rng.next_f64();
                    let r = radius + RING_NOISE * rng.normal();
                    points.push([r * angle.cos(), r * angle.sin()]);
                    labels.push(label);
                }
            }
        }
        DatasetKind::Spiral => {
            for (offset, label) in [(0.0, 0u8), (PI, 1u8)] {
                for i in 0..SPIRAL_POINTS {
                    let r = i as f64 / SPIRAL_POINTS as f64;
                    let angle = SPIRAL_TURNS * 2.0 * PI * r + offset + SPIRAL_NOISE * rng.normal();
                    points.push([r * angle.cos(), r * angle.sin()]);
                    labels.push(label);
                }
            }
        }
    }

    let x = Matrix::from_fn(points.len(), 2, |i, j| points[i][j]);
    Dataset { x, y: labels }
}
