// ============================================
// Vector Math (向量運算)
// ============================================
//
// Cosine similarity in its three call shapes (pairwise, bulk, one-to-many),
// plus the small dense linear algebra the bandit needs.
//
// Similarity never fails on bad input: mismatched dimensions, empty vectors
// and zero norms all score 0.0.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

/// Pivots with an absolute value below this are treated as zero
const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum VectorMathError {
    #[error("Matrix is singular (no usable pivot in column {column})")]
    SingularMatrix { column: usize },

    #[error("Matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Input lists differ in length: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

pub type Result<T> = std::result::Result<T, VectorMathError>;

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when the dimensions differ, either vector is empty, either
/// norm is zero, or the products overflow.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    finite_or_zero(a.dot(&b) / (norm_a * norm_b))
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Elementwise similarity of two equal-length lists: `out[i] = cos(a[i], b[i])`.
///
/// Used to score a whole pool against a broadcast profile in one pass.
pub fn bulk_cosine_similarity<A, B>(left: &[A], right: &[B]) -> Result<Vec<f64>>
where
    A: AsRef<[f64]>,
    B: AsRef<[f64]>,
{
    if left.len() != right.len() {
        return Err(VectorMathError::LengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }

    Ok(left
        .iter()
        .zip(right.iter())
        .map(|(a, b)| cosine_similarity(a.as_ref(), b.as_ref()))
        .collect())
}

/// Similarity of one vector against every vector in `others`.
///
/// The norm of `target` is computed once for the whole batch.
pub fn one_to_many<V: AsRef<[f64]>>(target: &[f64], others: &[V]) -> Vec<f64> {
    if target.is_empty() {
        return vec![0.0; others.len()];
    }

    let target = ArrayView1::from(target);
    let target_norm = target.dot(&target).sqrt();
    if target_norm == 0.0 {
        return vec![0.0; others.len()];
    }

    others
        .iter()
        .map(|other| {
            let other = other.as_ref();
            if other.len() != target.len() {
                return 0.0;
            }
            let other = ArrayView1::from(other);
            let other_norm = other.dot(&other).sqrt();
            if other_norm == 0.0 {
                0.0
            } else {
                finite_or_zero(target.dot(&other) / (target_norm * other_norm))
            }
        })
        .collect()
}

/// Matrix-vector product `M·v`.
pub fn mat_vec(matrix: ArrayView2<f64>, v: ArrayView1<f64>) -> Result<Array1<f64>> {
    if matrix.ncols() != v.len() {
        return Err(VectorMathError::DimensionMismatch {
            expected: matrix.ncols(),
            actual: v.len(),
        });
    }
    Ok(matrix.dot(&v))
}

/// Invert a square matrix by Gauss-Jordan elimination on `[M|I]` with
/// partial pivoting.
///
/// Not guaranteed numerically stable for ill-conditioned input. The bandit
/// only inverts `I + Σ xxᵀ`, which is well conditioned in practice.
pub fn invert(matrix: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(VectorMathError::NotSquare { rows, cols });
    }
    let n = rows;

    // Augmented [M | I]
    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    aug.slice_mut(s![.., ..n]).assign(&matrix);
    for i in 0..n {
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        // Partial pivoting: largest absolute value at or below the diagonal
        let mut pivot_row = col;
        let mut pivot_abs = aug[[col, col]].abs();
        for row in (col + 1)..n {
            let candidate = aug[[row, col]].abs();
            if candidate > pivot_abs {
                pivot_abs = candidate;
                pivot_row = row;
            }
        }

        if pivot_abs < PIVOT_EPSILON || !pivot_abs.is_finite() {
            return Err(VectorMathError::SingularMatrix { column: col });
        }

        if pivot_row != col {
            for k in 0..(2 * n) {
                aug.swap([col, k], [pivot_row, k]);
            }
        }

        let pivot = aug[[col, col]];
        aug.row_mut(col).mapv_inplace(|x| x / pivot);

        let pivot_line = aug.row(col).to_owned();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[[row, col]];
            if factor != 0.0 {
                aug.row_mut(row).scaled_add(-factor, &pivot_line);
            }
        }
    }

    Ok(aug.slice(s![.., n..]).to_owned())
}

pub fn identity(dimension: usize) -> Array2<f64> {
    Array2::eye(dimension)
}

pub fn trace(matrix: ArrayView2<f64>) -> f64 {
    matrix.diag().sum()
}

pub fn is_finite_vector(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}
