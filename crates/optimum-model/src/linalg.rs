//! Dense linear algebra helpers
//!
//! Small, dependency-free routines for the matrix sizes this crate deals
//! with (tens to low hundreds of assets or factors): Gauss-Jordan inversion
//! with partial pivoting, linear solves and symmetrization.

use crate::error::{ModelError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Relative pivot threshold below which a matrix is treated as singular
const PIVOT_TOLERANCE: f64 = 1e-14;

/// Symmetrize a square matrix: `(M + Mᵗ) / 2`
pub fn symmetrize(matrix: &Array2<f64>) -> Array2<f64> {
    (matrix + &matrix.t()) / 2.0
}

/// Invert a square matrix
///
/// # Errors
/// * `ModelError::DimensionMismatch` if the matrix is not square
/// * `ModelError::Singular` if a pivot vanishes
pub fn invert(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    let n = matrix.nrows();
    solve(matrix.view(), Array2::eye(n))
}

/// Invert a symmetric matrix and symmetrize the result
///
/// Inversion leaves small asymmetries behind; symmetrizing afterwards keeps
/// covariance matrices exactly symmetric.
pub fn invert_symmetric(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    Ok(symmetrize(&invert(matrix)?))
}

/// Solve `A · X = B` for `X`
///
/// # Arguments
/// * `a` - Square coefficient matrix (n x n)
/// * `b` - Right-hand sides (n x m)
pub fn solve(a: ArrayView2<'_, f64>, b: Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(ModelError::DimensionMismatch(format!(
            "cannot solve with a non-square {}x{} matrix",
            n,
            a.ncols()
        )));
    }
    if b.nrows() != n {
        return Err(ModelError::DimensionMismatch(format!(
            "right-hand side has {} rows, expected {}",
            b.nrows(),
            n
        )));
    }

    let mut a = a.to_owned();
    let mut x = b;
    let scale = a.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if n > 0 && scale == 0.0 {
        return Err(ModelError::Singular);
    }

    for col in 0..n {
        // Partial pivoting
        let (pivot_row, pivot_abs) = (col..n)
            .map(|row| (row, a[[row, col]].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if !pivot_abs.is_finite() || pivot_abs <= PIVOT_TOLERANCE * scale {
            return Err(ModelError::Singular);
        }

        if pivot_row != col {
            swap_rows(&mut a, pivot_row, col);
            swap_rows(&mut x, pivot_row, col);
        }

        let pivot = a[[col, col]];
        a.row_mut(col).mapv_inplace(|v| v / pivot);
        x.row_mut(col).mapv_inplace(|v| v / pivot);

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            let a_pivot = a.row(col).to_owned();
            let x_pivot = x.row(col).to_owned();
            a.row_mut(row).scaled_add(-factor, &a_pivot);
            x.row_mut(row).scaled_add(-factor, &x_pivot);
        }
    }

    Ok(x)
}

/// Solve `A · x = b` for a single right-hand side
pub fn solve_vector(a: ArrayView2<'_, f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let rhs = b.clone().insert_axis(Axis(1));
    Ok(solve(a, rhs)?.column(0).to_owned())
}

fn swap_rows(matrix: &mut Array2<f64>, i: usize, j: usize) {
    let row_i = matrix.row(i).to_owned();
    let row_j = matrix.row(j).to_owned();
    matrix.row_mut(i).assign(&row_j);
    matrix.row_mut(j).assign(&row_i);
}
