//! Low-rank spectral view of the gradient stream, shared by SAGE and Fusion.
//!
//! A [`SpectralTracker`] owns:
//!
//! - a fixed random projection `P` (k × dim, entries `N(0,1)/√k`)
//! - an EMA covariance `C` (k × k) of projected gradients
//! - the top `min(3, k)` eigenpairs of `C`, refreshed on a fixed cadence
//!
//! [`spectral_correct`] then rescales a projected gradient along those
//! eigen-directions, amplifying low-curvature components relative to the
//! dominant one. Back-projection is `Pᵀ·u`; `P` is not orthonormal, so the
//! round trip is only approximate.

use crate::linalg::{back_project, dot, project, top_eigenpairs, Eigenpairs, Matrix};
use crate::rng::Mulberry32;

/// Power-iteration rounds per eigenpair.
pub const POWER_ITERATIONS: usize = 10;

/// Upper bound on the tracked eigenpairs.
pub const MAX_EIGENPAIRS: usize = 3;

/// Added to each eigenvalue before dividing.
pub const SCALE_EPS: f64 = 1e-8;

/// Floor on the dominant eigenvalue.
pub const MIN_DOMINANT: f64 = 1e-6;

/// Projection, covariance and eigenpairs for one optimizer state.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralTracker {
    projection: Matrix,
    covariance: Matrix,
    eigen: Eigenpairs,
    /// Continues the stream that generated `projection`; feeds eigen restarts.
    rng: Mulberry32,
}

impl SpectralTracker {
    /// Draws `P` Row-Major from `Mulberry32(seed)` and seeds the eigenpairs
    /// with the first `min(3, k)` standard basis vectors at `initial_eigenvalue`.
    pub fn new(dim: usize, k: usize, seed: u32, initial_eigenvalue: f64) -> Self {
        assert!(k > 0, "projection rank must be positive");
        let mut rng = Mulberry32::new(seed);
        let sqrt_k = (k as f64).sqrt();
        let projection = Matrix::from_fn(k, dim, |_, _| rng.normal() / sqrt_k);
        Self {
            projection,
            covariance: Matrix::zeros(k, k),
            eigen: Eigenpairs::standard_basis(k, k.min(MAX_EIGENPAIRS), initial_eigenvalue),
            rng,
        }
    }

    /// Projection rank.
    #[inline]
    pub fn k(&self) -> usize {
        self.projection.rows()
    }

    /// Full parameter dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.projection.cols()
    }

    pub fn projection(&self) -> &Matrix {
        &self.projection
    }

    pub fn covariance(&self) -> &Matrix {
        &self.covariance
    }

    pub fn eigenpairs(&self) -> &Eigenpairs {
        &self.eigen
    }

    /// `P · g`.
    pub fn project(&self, g: &[f64]) -> Vec<f64> {
        debug_assert_eq!(g.len(), self.dim());
        project(&self.projection, g)
    }

    /// `Pᵀ · u`.
    pub fn back_project(&self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.k());
        back_project(&self.projection, u)
    }

    /// `C ← decay·C + (1-decay)·gk gkᵀ`.
    pub fn update_covariance(&mut self, gk: &[f64], decay: f64) {
        let k = self.k();
        debug_assert_eq!(gk.len(), k);
        for i in 0..k {
            for j in 0..k {
                let c = self.covariance.get_mut(i, j);
                *c = decay * *c + (1.0 - decay) * gk[i] * gk[j];
            }
        }
    }

    /// Recomputes the eigenpairs of `C` by power iteration with deflation.
    pub fn refresh_eigenpairs(&mut self) {
        let top = self.k().min(MAX_EIGENPAIRS);
        self.eigen = top_eigenpairs(&self.covariance, top, POWER_ITERATIONS, &mut self.rng);
    }

    /// Folds `gk` into the covariance and refreshes the eigenpairs when
    /// `step` is a multiple of `interval`. Returns whether a refresh ran.
    ///
    /// `interval == 0` never refreshes.
    pub fn observe(&mut self, gk: &[f64], decay: f64, step: u64, interval: u64) -> bool {
        self.update_covariance(gk, decay);
        if interval > 0 && step % interval == 0 {
            self.refresh_eigenpairs();
            true
        } else {
            false
        }
    }

    /// Ratio of the largest to the smallest tracked eigenvalue, when at least
    /// two are tracked.
    pub fn spectral_gap(&self) -> Option<f64> {
        let values = &self.eigen.values;
        if values.len() < 2 {
            return None;
        }
        Some(values[0] / (values[values.len() - 1] + 1e-10))
    }
}

/// Rescales `gk` along the eigen-directions and keeps its orthogonal residual.
///
/// With `c_i = ⟨v_i, gk⟩` and `λ_max = max(λ_i, 1e-6)`:
///
/// ```text
/// out = Σ v_i · c_i · sqrt(λ_max / (λ_i + 1e-8))  +  (gk - Σ v_i · c_i)
/// ```
pub fn spectral_correct(gk: &[f64], eigen: &Eigenpairs) -> Vec<f64> {
    let max_lambda = eigen.values.iter().copied().fold(MIN_DOMINANT, f64::max);
    let mut out = gk.to_vec();
    for (v, &lambda) in eigen.vectors.iter().zip(&eigen.values) {
        let coef = dot(v, gk);
        let scale = (max_lambda / (lambda + SCALE_EPS)).sqrt();
        // Scaled component in, unscaled component out.
        for (o, &vj) in out.iter_mut().zip(v) {
            *o += vj * coef * scale - vj * coef;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_is_seeded() {
        let a = SpectralTracker::new(30, 5, 1337, 0.01);
        let b = SpectralTracker::new(30, 5, 1337, 0.01);
        assert_eq!(a, b);
        assert_eq!(a.projection().shape(), (5, 30));

        let mut rng = Mulberry32::new(1337);
        let first = rng.normal() / 5f64.sqrt();
        assert_eq!(a.projection().get(0, 0), first);
        // Row-major draw order: (0, 1) is the second draw.
        let second = rng.normal() / 5f64.sqrt();
        assert_eq!(a.projection().get(0, 1), second);
        assert_ne!(a, SpectralTracker::new(30, 5, 1338, 0.01));
    }

    #[test]
    fn test_initial_eigenpairs() {
        let t = SpectralTracker::new(10, 20, 1, 0.1);
        assert_eq!(t.eigenpairs().len(), 3);
        assert_eq!(t.eigenpairs().values, vec![0.1; 3]);
        let small = SpectralTracker::new(10, 2, 1, 0.1);
        assert_eq!(small.eigenpairs().len(), 2);
    }

    #[test]
    fn test_covariance_ema() {
        let mut t = SpectralTracker::new(4, 2, 3, 0.1);
        t.update_covariance(&[1.0, 2.0], 0.5);
        assert_eq!(t.covariance().row(0), &[0.5, 1.0]);
        assert_eq!(t.covariance().row(1), &[1.0, 2.0]);
        t.update_covariance(&[0.0, 0.0], 0.5);
        assert_eq!(t.covariance().row(1), &[0.5, 1.0]);
    }

    #[test]
    fn test_observe_cadence() {
        let mut t = SpectralTracker::new(6, 3, 9, 0.1);
        let before = t.eigenpairs().clone();
        for step in 1..=4u64 {
            assert!(!t.observe(&[1.0, -0.5, 0.25], 0.9, step, 5));
            assert_eq!(t.eigenpairs(), &before);
        }
        assert!(t.observe(&[1.0, -0.5, 0.25], 0.9, 5, 5));
        assert_ne!(t.eigenpairs(), &before);
        assert!(!t.observe(&[1.0, 0.0, 0.0], 0.9, 6, 0));
    }

    #[test]
    fn test_correct_identity_when_eigenvalues_equal() {
        let eig = Eigenpairs::standard_basis(4, 3, 0.5);
        let gk = vec![1.0, -2.0, 3.0, 4.0];
        let out = spectral_correct(&gk, &eig);
        for (o, g) in out.iter().zip(&gk) {
            // sqrt(0.5 / (0.5 + 1e-8)) is 1 up to ~1e-8.
            assert!((o - g).abs() < 1e-6);
        }
    }

    #[test]
    fn test_correct_amplifies_weak_direction() {
        let eig = Eigenpairs {
            vectors: vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            values: vec![4.0, 1.0],
        };
        let out = spectral_correct(&[1.0, 1.0, 7.0], &eig);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 2.0).abs() < 1e-6);
        // Residual outside the eigenspace passes through.
        assert_eq!(out[2], 7.0);
    }

    #[test]
    fn test_spectral_gap() {
        let t = SpectralTracker::new(5, 1, 2, 0.1);
        assert!(t.spectral_gap().is_none());
        let t = SpectralTracker::new(5, 4, 2, 0.1);
        let gap = t.spectral_gap().unwrap();
        assert!((gap - 1.0).abs() < 1e-8);
    }
}
