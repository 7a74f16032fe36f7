//! Rank-revealing column-pivoted QR factorization.
//!
//! Householder triangularization with column pivoting: at each elimination
//! step the remaining column of largest norm is brought into the pivot
//! position, so the diagonal of `R` has non-increasing magnitude and the
//! numerical rank falls out of a single threshold sweep. The orthogonal
//! factor is kept in implicit Householder form; it is only ever applied to
//! right-hand sides, never formed.

use crate::linalg::Permutation;
use nalgebra::{DMatrix, DVector};

/// Column-pivoted QR factorization `A·P = Q·R` with an explicit numerical
/// rank.
///
/// `A` is `m × n` (measurements × parameters). The upper trapezoidal factor
/// `R` is exposed explicitly; `Q` stays implicit and is applied through
/// [`PivotedQr::q_transpose_product`], restricted to the first `rank`
/// reflections. Components beyond the rank belong to a numerically singular
/// subspace and play no part in step computation.
pub struct PivotedQr {
    /// Householder vectors stored below (and on) the diagonal; `R` above it.
    qr: DMatrix<f64>,
    /// Diagonal entries of `R`, non-increasing in magnitude.
    r_diag: DVector<f64>,
    permutation: Permutation,
    rank: usize,
}

impl PivotedQr {
    /// Factorize a matrix, consuming it as workspace.
    pub fn new(matrix: DMatrix<f64>) -> Self {
        let (m, n) = matrix.shape();
        let steps = m.min(n);

        let mut qr = matrix;
        let mut r_diag = DVector::zeros(steps);
        let mut permutation = Permutation::identity(n);

        for j in 0..steps {
            // Bring the remaining column of largest norm into pivot position.
            let mut pivot = j;
            let mut pivot_norm = Self::tail_norm(&qr, j, j);
            for k in (j + 1)..n {
                let norm = Self::tail_norm(&qr, j, k);
                if norm > pivot_norm {
                    pivot = k;
                    pivot_norm = norm;
                }
            }
            if pivot != j {
                qr.swap_columns(j, pivot);
                permutation.swap(j, pivot);
            }

            let mut column_norm = Self::tail_norm(&qr, j, j);
            if column_norm == 0.0 {
                r_diag[j] = 0.0;
                continue;
            }
            if qr[(j, j)] < 0.0 {
                column_norm = -column_norm;
            }

            for i in j..m {
                qr[(i, j)] /= column_norm;
            }
            qr[(j, j)] += 1.0;

            // Apply the reflection to the remaining columns.
            for k in (j + 1)..n {
                let mut sum = 0.0;
                for i in j..m {
                    sum += qr[(i, j)] * qr[(i, k)];
                }
                let factor = sum / qr[(j, j)];
                for i in j..m {
                    qr[(i, k)] -= factor * qr[(i, j)];
                }
            }

            r_diag[j] = -column_norm;
        }

        let rank = Self::numerical_rank(&r_diag, m, n);

        Self {
            qr,
            r_diag,
            permutation,
            rank,
        }
    }

    /// Numerical rank: leading diagonal entries of `R` whose magnitude
    /// exceeds a threshold tied to machine epsilon, the matrix dimensions,
    /// and the matrix scale. Pivoting makes the diagonal non-increasing, so
    /// the first failure ends the count.
    fn numerical_rank(r_diag: &DVector<f64>, m: usize, n: usize) -> usize {
        if r_diag.is_empty() {
            return 0;
        }
        let scale = r_diag[0].abs();
        if scale == 0.0 {
            return 0;
        }

        let base_power = scale.log2().floor() as i32;
        let threshold = 20.0 * f64::EPSILON * (m + n) as f64 * 2.0_f64.powi(base_power);

        let mut rank = 0;
        for j in 0..r_diag.len() {
            if r_diag[j].abs() <= threshold {
                break;
            }
            rank += 1;
        }
        rank
    }

    fn tail_norm(matrix: &DMatrix<f64>, from_row: usize, column: usize) -> f64 {
        let mut sum = 0.0;
        for i in from_row..matrix.nrows() {
            sum += matrix[(i, column)] * matrix[(i, column)];
        }
        sum.sqrt()
    }

    /// Numerical rank of the factorized matrix.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Column permutation taking original parameter order to pivot order.
    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    /// The upper trapezoidal factor `R`, `min(m, n) × n`, columns in pivot
    /// order.
    pub fn r(&self) -> DMatrix<f64> {
        let steps = self.r_diag.len();
        let n = self.qr.ncols();
        let mut r = DMatrix::zeros(steps, n);
        for j in 0..steps {
            r[(j, j)] = self.r_diag[j];
            for k in (j + 1)..n {
                r[(j, k)] = self.qr[(j, k)];
            }
        }
        r
    }

    /// Apply the first `rank` Householder reflections to a right-hand side,
    /// producing `Qᵀ·v`. Only the first `rank` components are meaningful to
    /// callers; the rest span the numerically singular subspace.
    pub fn q_transpose_product(&self, vector: &DVector<f64>) -> DVector<f64> {
        let m = self.qr.nrows();
        let mut out = vector.clone();

        for j in 0..self.rank {
            let head = self.qr[(j, j)];
            if head == 0.0 {
                continue;
            }
            let mut sum = 0.0;
            for i in j..m {
                sum += self.qr[(i, j)] * out[i];
            }
            let factor = -sum / head;
            for i in j..m {
                out[i] += self.qr[(i, j)] * factor;
            }
        }

        out
    }
}
