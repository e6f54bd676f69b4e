//! Homogeneous affine matrices.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Pivot magnitude below which a matrix is treated as singular.
const SINGULAR_EPS: f64 = 1e-12;

/// A short coordinate vector; most data has at most four axes.
pub type Coords = SmallVec<[f64; 4]>;

/// A homogeneous affine matrix of shape `(n_out + 1) x (n_in + 1)`.
///
/// The last row is always `[0, ..., 0, 1]`. Rows are stored row-major as a
/// nested vector so the on-disk representation is a plain JSON matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffineMatrix(Vec<Vec<f64>>);

impl AffineMatrix {
    /// Creates the `(n + 1) x (n + 1)` identity.
    pub fn identity(n: usize) -> Self {
        let rows = (0..=n)
            .map(|r| (0..=n).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
            .collect();
        Self(rows)
    }

    /// Creates a zero-filled matrix of shape `(n_out + 1) x (n_in + 1)` whose
    /// last row is the homogeneous `[0, ..., 0, 1]`.
    pub fn zeros(n_out: usize, n_in: usize) -> Self {
        let mut rows = vec![vec![0.0; n_in + 1]; n_out + 1];
        rows[n_out][n_in] = 1.0;
        Self(rows)
    }

    /// Wraps explicit rows, checking they form a homogeneous affine matrix.
    ///
    /// Returns `None` if the rows are ragged, empty, or the last row is not
    /// `[0, ..., 0, 1]`.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Option<Self> {
        let cols = rows.first()?.len();
        if cols == 0 || rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let last = rows.last()?;
        let homogeneous = last[..cols - 1].iter().all(|v| *v == 0.0) && last[cols - 1] == 1.0;
        homogeneous.then_some(Self(rows))
    }

    /// Number of output (non-homogeneous) dimensions.
    #[inline]
    pub fn n_out(&self) -> usize {
        self.0.len() - 1
    }

    /// Number of input (non-homogeneous) dimensions.
    #[inline]
    pub fn n_in(&self) -> usize {
        self.0[0].len() - 1
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row][col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.0[row][col] = value;
    }

    /// Borrow the rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.0
    }

    /// Matrix product `self * other`, i.e. apply `other` first.
    ///
    /// The caller guarantees `self.n_in() == other.n_out()`.
    pub fn matmul(&self, other: &AffineMatrix) -> AffineMatrix {
        debug_assert_eq!(self.n_in(), other.n_out());
        let n = self.0.len();
        let m = other.0[0].len();
        let k = other.0.len();
        let rows = (0..n)
            .map(|r| {
                (0..m)
                    .map(|c| (0..k).map(|i| self.0[r][i] * other.0[i][c]).sum::<f64>())
                    .collect()
            })
            .collect();
        AffineMatrix(rows)
    }

    /// Inverts a square matrix by Gauss-Jordan elimination with partial
    /// pivoting. Returns `None` for non-square or singular matrices.
    pub fn inverse(&self) -> Option<AffineMatrix> {
        let n = self.0.len();
        if self.0[0].len() != n {
            return None;
        }
        let mut a = self.0.clone();
        let mut inv = AffineMatrix::identity(n - 1).0;

        for col in 0..n {
            let pivot = (col..n).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
            if a[pivot][col].abs() < SINGULAR_EPS {
                return None;
            }
            a.swap(col, pivot);
            inv.swap(col, pivot);

            let p = a[col][col];
            for c in 0..n {
                a[col][c] /= p;
                inv[col][c] /= p;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a[r][col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    a[r][c] -= factor * a[col][c];
                    inv[r][c] -= factor * inv[col][c];
                }
            }
        }
        Some(AffineMatrix(inv))
    }

    /// Applies the matrix to one point of `n_in` coordinates.
    pub fn apply(&self, point: &[f64]) -> Coords {
        let n_in = self.n_in();
        (0..self.n_out())
            .map(|r| {
                let row = &self.0[r];
                row[..n_in]
                    .iter()
                    .zip(point)
                    .map(|(m, p)| m * p)
                    .sum::<f64>()
                    + row[n_in]
            })
            .collect()
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &AffineMatrix, tolerance: f64) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance))
    }

    /// Returns true if this is a square identity within tolerance.
    pub fn is_identity(&self, tolerance: f64) -> bool {
        self.0.len() == self.0[0].len() && self.approx_eq(&AffineMatrix::identity(self.n_out()), tolerance)
    }

    /// Determinant of the linear (non-homogeneous) block of a square matrix.
    pub fn linear_determinant(&self) -> Option<f64> {
        let n = self.n_out();
        if n != self.n_in() {
            return None;
        }
        let mut a: Vec<Vec<f64>> = self.0[..n].iter().map(|r| r[..n].to_vec()).collect();
        let mut det = 1.0;
        for col in 0..n {
            let pivot = (col..n).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
            if a[pivot][col] == 0.0 {
                return Some(0.0);
            }
            if pivot != col {
                a.swap(col, pivot);
                det = -det;
            }
            det *= a[col][col];
            for r in col + 1..n {
                let factor = a[r][col] / a[col][col];
                for c in col..n {
                    a[r][c] -= factor * a[col][c];
                }
            }
        }
        Some(det)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_requires_homogeneous_last_row() {
        assert!(AffineMatrix::from_rows(vec![vec![2.0, 1.0], vec![0.0, 1.0]]).is_some());
        assert!(AffineMatrix::from_rows(vec![vec![2.0, 1.0], vec![1.0, 1.0]]).is_none());
        assert!(AffineMatrix::from_rows(vec![vec![2.0, 1.0], vec![0.0]]).is_none());
        assert!(AffineMatrix::from_rows(vec![]).is_none());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let m = AffineMatrix::from_rows(vec![
            vec![0.0, 2.0, 5.0],
            vec![3.0, 0.0, -1.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap();
        let inv = m.inverse().expect("invertible");
        assert!(m.matmul(&inv).is_identity(1e-12));
        assert!(inv.matmul(&m).is_identity(1e-12));
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let m = AffineMatrix::from_rows(vec![
            vec![1.0, 2.0, 0.0],
            vec![2.0, 4.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap();
        assert!(m.inverse().is_none());
        assert_eq!(m.linear_determinant(), Some(0.0));
    }

    #[test]
    fn test_non_square_has_no_inverse() {
        let m = AffineMatrix::zeros(3, 2);
        assert!(m.inverse().is_none());
    }

    #[test]
    fn test_apply() {
        let m = AffineMatrix::from_rows(vec![
            vec![2.0, 0.0, 1.0],
            vec![0.0, 3.0, -1.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap();
        assert_eq!(m.apply(&[1.0, 1.0]).as_slice(), &[3.0, 2.0]);
    }
}
