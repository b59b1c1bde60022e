//! Hidden-layer activation functions and their derivatives.

use std::fmt;
use std::str::FromStr;

use crate::error::LabError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `sqrt(2/π)`, the GELU tanh-approximation constant.
const GELU_C: f64 = 0.797_884_560_802_865_4;

/// Logistic sigmoid.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Activation used by every hidden layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Activation {
    Relu,
    Silu,
    Gelu,
    #[default]
    Tanh,
    Sigmoid,
}

impl Activation {
    /// All variants, in display order.
    pub const ALL: [Activation; 5] = [
        Activation::Relu,
        Activation::Silu,
        Activation::Gelu,
        Activation::Tanh,
        Activation::Sigmoid,
    ];

    /// `f(z)`.
    #[inline]
    pub fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Relu => {
                if z > 0.0 {
                    z
                } else {
                    0.0
                }
            }
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => sigmoid(z),
            Activation::Silu => z * sigmoid(z),
            Activation::Gelu => {
                let u = GELU_C * (z + 0.044715 * z * z * z);
                0.5 * z * (1.0 + u.tanh())
            }
        }
    }

    /// `f'(z)`, evaluated at the pre-activation.
    #[inline]
    pub fn derivative(self, z: f64) -> f64 {
        match self {
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
            Activation::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            Activation::Silu => {
                let s = sigmoid(z);
                s + z * s * (1.0 - s)
            }
            Activation::Gelu => {
                let zz = z * z;
                let th = (GELU_C * (z + 0.044715 * z * zz)).tanh();
                let sech2 = 1.0 - th * th;
                let du = GELU_C * (1.0 + 0.134145 * zz);
                0.5 * (1.0 + th) + 0.5 * z * sech2 * du
            }
        }
    }

    /// ReLU-family activations get He initialization, the rest Xavier.
    #[inline]
    pub fn uses_he_init(self) -> bool {
        matches!(self, Activation::Relu | Activation::Silu | Activation::Gelu)
    }

    /// Initial hidden bias: a small positive value for ReLU, zero otherwise.
    #[inline]
    pub fn initial_bias(self) -> f64 {
        if self == Activation::Relu {
            0.01
        } else {
            0.0
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Silu => "silu",
            Activation::Gelu => "gelu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "silu" => Ok(Activation::Silu),
            "gelu" => Ok(Activation::Gelu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            _ => Err(LabError::UnknownActivation(s.to_string())),
        }
    }
}
