//! Numerical Gradient Checking for the Backward Pass
//!
//! Verifies that the analytical gradients returned by `backprop()` match
//! central-difference estimates of the full objective (clamped BCE plus the
//! L2 penalty) for every activation, with and without a second hidden layer.
//!
//! # Methodology
//!
//! For each parameter `w` in flattening order:
//! - Analytical gradient: `grad_ana = backprop().grads`
//! - Numerical gradient: `grad_num = (L(w+ε) - L(w-ε)) / (2ε)`
//!
//! Dropout is off so the objective is deterministic.
//!
//! Run with: cargo test --test gradient_check

use fusion_lab::network::{self, DropoutConfig};
use fusion_lab::{Activation, Matrix, Mulberry32, ParamShape, Params};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Step for central differences.
const EPSILON: f64 = 1e-4;

/// Maximum relative error between analytical and numerical gradients.
const MAX_RELATIVE_ERROR: f64 = 1e-3;

/// Below this magnitude the absolute error is checked instead.
const SMALL_GRAD_THRESHOLD: f64 = 1e-4;

const MAX_ABSOLUTE_ERROR: f64 = 1e-7;

/// Share of checks that must pass. ReLU may land an input within `ε` of
/// its kink, where the finite difference is meaningless.
const MIN_PASS_RATE_RELU: f64 = 0.95;

// =============================================================================
// HELPERS
// =============================================================================

fn random_batch(n: usize, seed: u64) -> (Matrix, Vec<u8>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Matrix::from_fn(n, 2, |_, _| rng.gen_range(-1.0..1.0));
    let y = (0..n).map(|_| rng.gen_range(0..2u8)).collect();
    (x, y)
}

fn objective(x: &Matrix, y: &[u8], params: &Params, activation: Activation, lambda: f64) -> f64 {
    network::backprop(
        x,
        y,
        params,
        activation,
        DropoutConfig::NONE,
        lambda,
        &mut Mulberry32::new(0),
        false,
    )
    .loss
}

/// Returns `(checked, passed, worst relative error)`.
fn check_gradients(
    shape: ParamShape,
    activation: Activation,
    lambda: f64,
    seed: u64,
) -> (usize, usize, f64) {
    let params = network::init(shape.input_dim, shape.h1, shape.h2, seed as u32, activation);
    let (x, y) = random_batch(16, seed);

    let analytic = network::backprop(
        &x,
        &y,
        &params,
        activation,
        DropoutConfig::NONE,
        lambda,
        &mut Mulberry32::new(0),
        false,
    )
    .grads
    .flatten();

    let flat = params.flatten();
    let mut passed = 0;
    let mut worst: f64 = 0.0;
    for i in 0..flat.len() {
        let mut plus = flat.clone();
        plus[i] += EPSILON;
        let mut minus = flat.clone();
        minus[i] -= EPSILON;
        let lp = objective(&x, &y, &Params::unflatten(&plus, &shape), activation, lambda);
        let lm = objective(&x, &y, &Params::unflatten(&minus, &shape), activation, lambda);
        let numeric = (lp - lm) / (2.0 * EPSILON);

        let a = analytic[i];
        let abs_err = (a - numeric).abs();
        let ok = if a.abs().max(numeric.abs()) < SMALL_GRAD_THRESHOLD {
            abs_err < MAX_ABSOLUTE_ERROR
        } else {
            let rel = abs_err / (a.abs() + numeric.abs());
            worst = worst.max(rel);
            rel < MAX_RELATIVE_ERROR
        };
        if ok {
            passed += 1;
        }
    }
    (flat.len(), passed, worst)
}

fn assert_gradients(shape: ParamShape, activation: Activation, lambda: f64, seed: u64) {
    let (checked, passed, worst) = check_gradients(shape, activation, lambda, seed);
    let required = if activation == Activation::Relu {
        (checked as f64 * MIN_PASS_RATE_RELU).ceil() as usize
    } else {
        checked
    };
    assert!(
        passed >= required,
        "{} h1={} h2={} λ={}: {}/{} gradients within tolerance (worst rel err {:.2e})",
        activation,
        shape.h1,
        shape.h2,
        lambda,
        passed,
        checked,
        worst
    );
}

// =============================================================================
// TESTS
// =============================================================================

#[test]
fn test_gradients_single_hidden_layer() {
    let shape = ParamShape {
        input_dim: 2,
        h1: 5,
        h2: 0,
    };
    for (i, activation) in Activation::ALL.into_iter().enumerate() {
        assert_gradients(shape, activation, 0.0, 100 + i as u64);
    }
}

#[test]
fn test_gradients_two_hidden_layers() {
    let shape = ParamShape {
        input_dim: 2,
        h1: 4,
        h2: 3,
    };
    for (i, activation) in Activation::ALL.into_iter().enumerate() {
        assert_gradients(shape, activation, 0.0, 200 + i as u64);
    }
}

#[test]
fn test_gradients_with_l2() {
    let shape = ParamShape {
        input_dim: 2,
        h1: 4,
        h2: 3,
    };
    for (i, activation) in Activation::ALL.into_iter().enumerate() {
        assert_gradients(shape, activation, 0.01, 300 + i as u64);
    }
}

#[test]
fn test_bias_gradients_ignore_l2() {
    // Penalty gradient lands on weights only, so bias gradients agree
    // exactly with and without λ.
    let params = network::init(2, 4, 3, 5, Activation::Tanh);
    let (x, y) = random_batch(12, 5);
    let run = |lambda: f64| {
        network::backprop(
            &x,
            &y,
            &params,
            Activation::Tanh,
            DropoutConfig::NONE,
            lambda,
            &mut Mulberry32::new(0),
            false,
        )
        .grads
    };
    let plain = run(0.0);
    let reg = run(0.01);
    for (a, b) in plain.layers().zip(reg.layers()) {
        assert_eq!(a.bias, b.bias);
    }
    for ((a, b), w) in plain.layers().zip(reg.layers()).zip(params.layers()) {
        for ((ga, gb), wv) in a
            .weights
            .as_slice()
            .iter()
            .zip(b.weights.as_slice())
            .zip(w.weights.as_slice())
        {
            assert!((gb - ga - 0.01 * wv).abs() < 1e-15);
        }
    }
}
