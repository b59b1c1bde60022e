//! Dense linear-algebra kernels.
//!
//! All matrices are Row-Major `f64` buffers. Sizes in this crate are tiny
//! (a few hundred parameters, k ≤ ~50), so the kernels are plain loops with
//! a fixed summation order: identical inputs always give bit-identical
//! outputs.

use crate::rng::Mulberry32;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Floor added to every norm used as a divisor.
pub const NORM_EPS: f64 = 1e-12;

/// Vectors whose norm is at or below this are dropped by [`gram_schmidt`].
pub const GRAM_SCHMIDT_EPS: f64 = 1e-8;

/// Row-Major dense matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Zero matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Builds a matrix from a Row-Major buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "buffer does not match {}x{}", rows, cols);
        Self { rows, cols, data }
    }

    /// Builds a matrix from a row-major generator, called in traversal order.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    /// Builds a matrix from row vectors.
    ///
    /// # Panics
    ///
    /// Panics if the rows are ragged.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            assert_eq!(r.len(), cols, "ragged rows");
            data.extend_from_slice(r);
        }
        Self {
            rows: rows.len(),
            cols,
            data,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }

    #[inline]
    pub fn get_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Applies `f` to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Sum of squared elements.
    pub fn sum_squares(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum()
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }
}

/// `a · b`.
pub fn matmul(a: &Matrix, b: &Matrix) -> Matrix {
    debug_assert_eq!(a.cols, b.rows, "matmul inner dimensions");
    let (m, n, p) = (a.rows, a.cols, b.cols);
    let mut out = Matrix::zeros(m, p);
    for i in 0..m {
        let out_row = &mut out.data[i * p..(i + 1) * p];
        for k in 0..n {
            let aik = a.data[i * n + k];
            let b_row = &b.data[k * p..(k + 1) * p];
            for (o, &bkj) in out_row.iter_mut().zip(b_row) {
                *o += aik * bkj;
            }
        }
    }
    out
}

/// `aᵀ`.
pub fn transpose(a: &Matrix) -> Matrix {
    let mut out = Matrix::zeros(a.cols, a.rows);
    for i in 0..a.rows {
        for j in 0..a.cols {
            out.data[j * a.rows + i] = a.data[i * a.cols + j];
        }
    }
    out
}

/// Adds `bias[j]` to every element of column `j`.
pub fn add_bias(x: &Matrix, bias: &[f64]) -> Matrix {
    debug_assert_eq!(x.cols, bias.len());
    let mut out = x.clone();
    for i in 0..out.rows {
        for (v, b) in out.row_mut(i).iter_mut().zip(bias) {
            *v += b;
        }
    }
    out
}

/// Per-column sums of `x` over its rows.
pub fn column_sums(x: &Matrix) -> Vec<f64> {
    let mut out = vec![0.0; x.cols];
    for i in 0..x.rows {
        for (o, v) in out.iter_mut().zip(x.row(i)) {
            *o += v;
        }
    }
    out
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut s = 0.0;
    for (x, y) in a.iter().zip(b) {
        s += x * y;
    }
    s
}

/// L2 norm floored by [`NORM_EPS`]; safe to divide by.
#[inline]
pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt() + NORM_EPS
}

/// L2 norm without the floor.
#[inline]
pub fn raw_norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `a · c`.
pub fn scale(a: &[f64], c: f64) -> Vec<f64> {
    a.iter().map(|v| v * c).collect()
}

/// Projects a `dim`-vector to k dimensions: `P · v`.
pub fn project(p: &Matrix, v: &[f64]) -> Vec<f64> {
    debug_assert_eq!(p.cols, v.len());
    (0..p.rows).map(|i| dot(p.row(i), v)).collect()
}

/// Maps a k-vector back to `dim` dimensions with the transpose: `Pᵀ · u`.
///
/// `P` is not orthonormal, so this is an approximation of the inverse.
pub fn back_project(p: &Matrix, u: &[f64]) -> Vec<f64> {
    debug_assert_eq!(p.rows, u.len());
    let mut out = vec![0.0; p.cols];
    for (j, o) in out.iter_mut().enumerate() {
        let mut s = 0.0;
        for (i, ui) in u.iter().enumerate() {
            s += p.data[i * p.cols + j] * ui;
        }
        *o = s;
    }
    out
}

/// Orthonormalizes `vectors` in order (modified Gram–Schmidt).
///
/// Vectors that become (numerically) dependent on earlier ones are dropped,
/// so the basis may be shorter than the input.
pub fn gram_schmidt(vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(vectors.len());
    for v in vectors {
        let mut u = v.clone();
        for q in &basis {
            let d = dot(&u, q);
            for (ui, qi) in u.iter_mut().zip(q) {
                *ui -= d * qi;
            }
        }
        let n = norm(&u);
        if n > GRAM_SCHMIDT_EPS {
            basis.push(u.iter().map(|x| x / n).collect());
        }
    }
    basis
}

/// Eigenpairs of a small symmetric matrix, dominant first.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Eigenpairs {
    /// Unit eigenvectors.
    pub vectors: Vec<Vec<f64>>,
    /// Absolute eigenvalues, aligned with `vectors`.
    pub values: Vec<f64>,
}

impl Eigenpairs {
    /// The first `count` standard basis vectors of R^k with a constant value.
    pub fn standard_basis(k: usize, count: usize, value: f64) -> Self {
        let vectors = (0..count)
            .map(|i| {
                let mut v = vec![0.0; k];
                v[i] = 1.0;
                v
            })
            .collect();
        Self {
            vectors,
            values: vec![value; count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Top `top` eigenpairs of square `c` by power iteration with deflation.
///
/// Each component starts from a restart vector of `u - 0.5` draws from `rng`,
/// runs `iterations` multiply-and-normalize rounds, takes the Rayleigh
/// quotient as eigenvalue and subtracts `λ·v·vᵀ` from the working matrix.
pub fn top_eigenpairs(
    c: &Matrix,
    top: usize,
    iterations: usize,
    rng: &mut Mulberry32,
) -> Eigenpairs {
    debug_assert_eq!(c.rows, c.cols, "eigen solver needs a square matrix");
    let n = c.rows;
    let count = top.min(n);
    let mut work = c.clone();
    let mut vectors = Vec::with_capacity(count);
    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        let mut v: Vec<f64> = (0..n).map(|_| rng.next_f64() - 0.5).collect();
        let vn = norm(&v);
        v.iter_mut().for_each(|x| *x /= vn);

        for _ in 0..iterations {
            let w = mat_vec(&work, &v);
            let wn = norm(&w);
            v = w.into_iter().map(|x| x / wn).collect();
        }

        let lambda = dot(&v, &mat_vec(&work, &v));
        for i in 0..n {
            for j in 0..n {
                work.data[i * n + j] -= lambda * v[i] * v[j];
            }
        }
        vectors.push(v);
        values.push(lambda.abs());
    }

    Eigenpairs { vectors, values }
}

/// `m · v`.
pub fn mat_vec(m: &Matrix, v: &[f64]) -> Vec<f64> {
    debug_assert_eq!(m.cols, v.len());
    (0..m.rows).map(|i| dot(m.row(i), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_small() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        let b = Matrix::from_rows(&[vec![1.0, 0.0, -1.0], vec![2.0, 1.0, 0.5]]);
        let c = matmul(&a, &b);
        assert_eq!(c.shape(), (3, 3));
        assert_eq!(c.row(0), &[5.0, 2.0, 0.0]);
        assert_eq!(c.row(2), &[17.0, 6.0, -2.0]);
    }

    #[test]
    fn test_transpose_involution() {
        let a = Matrix::from_fn(3, 5, |i, j| (i * 5 + j) as f64);
        let t = transpose(&a);
        assert_eq!(t.shape(), (5, 3));
        assert_eq!(t.get(4, 2), a.get(2, 4));
        assert_eq!(transpose(&t), a);
    }

    #[test]
    fn test_add_bias_and_column_sums() {
        let x = Matrix::zeros(2, 3);
        let y = add_bias(&x, &[1.0, 2.0, 3.0]);
        assert_eq!(y.row(1), &[1.0, 2.0, 3.0]);
        assert_eq!(column_sums(&y), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_norm_is_floored() {
        assert_eq!(norm(&[0.0, 0.0]), NORM_EPS);
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-9);
        assert_eq!(raw_norm(&[0.0]), 0.0);
    }

    #[test]
    fn test_back_project_is_transpose() {
        let p = Matrix::from_fn(3, 7, |i, j| (i as f64 + 1.0) * 0.1 - j as f64 * 0.05);
        let u = vec![0.5, -1.0, 2.0];
        let expected = mat_vec(&transpose(&p), &u);
        assert_eq!(back_project(&p, &u), expected);
        // <P v, u> == <v, Pᵀ u>
        let v: Vec<f64> = (0..7).map(|j| (j as f64).sin()).collect();
        let lhs = dot(&project(&p, &v), &u);
        let rhs = dot(&v, &back_project(&p, &u));
        assert!((lhs - rhs).abs() < 1e-12);
    }

    #[test]
    fn test_gram_schmidt_orthonormal_and_drops_dependent() {
        let vs = vec![
            vec![1.0, 1.0, 0.0],
            vec![2.0, 2.0, 0.0],
            vec![0.0, 1.0, 1.0],
        ];
        let q = gram_schmidt(&vs);
        assert_eq!(q.len(), 2);
        for a in &q {
            assert!((dot(a, a) - 1.0).abs() < 1e-9);
        }
        assert!(dot(&q[0], &q[1]).abs() < 1e-9);
    }

    #[test]
    fn test_top_eigenpairs_diagonal() {
        let c = Matrix::from_rows(&[
            vec![5.0, 0.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.5, 0.0],
            vec![0.0, 0.0, 0.0, 0.1],
        ]);
        let mut rng = Mulberry32::new(3);
        let eig = top_eigenpairs(&c, 3, 60, &mut rng);
        assert_eq!(eig.len(), 3);
        assert!((eig.values[0] - 5.0).abs() < 1e-6);
        assert!((eig.values[1] - 2.0).abs() < 1e-6);
        assert!((eig.values[2] - 0.5).abs() < 1e-3);
        assert!(eig.vectors[0][0].abs() > 0.999);
    }

    #[test]
    fn test_top_eigenpairs_deterministic() {
        let c = Matrix::from_fn(6, 6, |i, j| 1.0 / (1.0 + i as f64 + j as f64));
        let a = top_eigenpairs(&c, 3, 10, &mut Mulberry32::new(11));
        let b = top_eigenpairs(&c, 3, 10, &mut Mulberry32::new(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_top_is_capped_by_dimension() {
        let c = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let eig = top_eigenpairs(&c, 3, 10, &mut Mulberry32::new(1));
        assert_eq!(eig.len(), 2);
    }

    #[test]
    fn test_standard_basis() {
        let e = Eigenpairs::standard_basis(5, 3, 0.1);
        assert_eq!(e.vectors[2], vec![0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(e.values, vec![0.1; 3]);
    }
}
