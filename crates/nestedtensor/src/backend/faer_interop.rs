//! Bridging row-major tensor data to faer's column-major matrices.
//!
//! A row-major `m x n` buffer is bit-for-bit the column-major layout of its
//! `n x m` transpose. Products are therefore computed as
//! `C^T = B^T * A^T` on column-major views, which leaves `C` in row-major
//! order without any copies.

use faer::linalg::matmul::matmul;
use faer::{Accum, MatMut, MatRef, Par};
use faer_traits::ComplexField;

use crate::scalar::Scalar;

/// View a row-major `rows x cols` slice as the column-major `cols x rows`
/// faer matrix (its transpose).
///
/// # Panics
///
/// Panics if `rows * cols != data.len()`.
pub fn matrix_view<T: Scalar + ComplexField>(data: &[T], rows: usize, cols: usize) -> MatRef<'_, T> {
    assert_eq!(
        rows * cols,
        data.len(),
        "Matrix dimensions ({} x {} = {}) must match data length ({})",
        rows,
        cols,
        rows * cols,
        data.len()
    );
    MatRef::from_column_major_slice(data, cols, rows)
}

/// Compute the row-major product `lhs (m x k) * rhs (k x n)`.
///
/// # Panics
///
/// Panics if slice lengths disagree with the given dimensions.
pub fn gemm_row_major<T: Scalar + ComplexField>(
    lhs: &[T],
    rhs: &[T],
    m: usize,
    k: usize,
    n: usize,
) -> Vec<T> {
    let mut out = vec![<T as Scalar>::zero(); m * n];
    if m == 0 || n == 0 {
        return out;
    }
    if k == 0 {
        return out;
    }

    let a_t = matrix_view(lhs, m, k);
    let b_t = matrix_view(rhs, k, n);
    let c_t = MatMut::from_column_major_slice_mut(&mut out, n, m);

    // C^T = B^T * A^T
    matmul(c_t, Accum::Replace, b_t, a_t, <T as Scalar>::one(), Par::Seq);
    out
}
