//! Matrix products with NumPy-style promotion and batch broadcasting.
//!
//! ```text
//! matmul(a, b)
//!     → promote 1-D operands to matrices
//!     → broadcast leading batch dimensions
//!     → one row-major GEMM per batch entry (faer)
//!     → drop the promoted dimensions again
//! ```

use faer_traits::ComplexField;

use crate::backend::gemm_row_major;
use crate::error::TensorError;
use crate::operations::elementwise::broadcast_shapes;
use crate::scalar::Scalar;
use crate::strides::{compute_strides, linear_to_cartesian};
use crate::tensor::DenseTensor;

/// Matrix product of two tensors.
///
/// - 1-D x 1-D: dot product (zero-dimensional result)
/// - 2-D x 2-D: matrix product
/// - 1-D operands are promoted to a row (left) or column (right) matrix and
///   the promoted dimension is removed from the result
/// - higher ranks: batched product with broadcast batch dimensions
///
/// # Errors
///
/// Returns `TensorError::RankMismatch` for zero-dimensional operands and
/// `TensorError::IncompatibleShapes` if inner or batch dimensions disagree.
///
/// # Example
///
/// ```
/// use nestedtensor::DenseTensor;
/// use nestedtensor::operations::matmul;
///
/// let a = DenseTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
/// let b = DenseTensor::from_vec(vec![1.0, 1.0], &[2]).unwrap();
/// let c = matmul(&a, &b).unwrap();
/// assert_eq!(c.shape(), &[2]);
/// assert_eq!(c.data(), &[3.0, 7.0]);
/// ```
pub fn matmul<ElT: Scalar + ComplexField>(
    a: &DenseTensor<ElT>,
    b: &DenseTensor<ElT>,
) -> Result<DenseTensor<ElT>, TensorError> {
    for t in [a, b] {
        if t.ndim() == 0 {
            return Err(TensorError::RankMismatch {
                expected: 1,
                actual: 0,
            });
        }
    }
    let incompatible = || TensorError::IncompatibleShapes {
        lhs: a.shape().to_vec(),
        rhs: b.shape().to_vec(),
    };

    let mut a_shape = a.shape().to_vec();
    let mut b_shape = b.shape().to_vec();
    let a_vector = a_shape.len() == 1;
    let b_vector = b_shape.len() == 1;
    if a_vector {
        a_shape.insert(0, 1);
    }
    if b_vector {
        b_shape.push(1);
    }

    let (m, k) = (a_shape[a_shape.len() - 2], a_shape[a_shape.len() - 1]);
    let (k2, n) = (b_shape[b_shape.len() - 2], b_shape[b_shape.len() - 1]);
    if k != k2 {
        return Err(incompatible());
    }

    let a_batch = &a_shape[..a_shape.len() - 2];
    let b_batch = &b_shape[..b_shape.len() - 2];
    let batch = broadcast_shapes(a_batch, b_batch).map_err(|_| incompatible())?;
    let batch_count: usize = batch.iter().product();

    let av = a.to_vec();
    let bv = b.to_vec();
    let mut out = Vec::with_capacity(batch_count * m * n);
    for linear in 0..batch_count {
        let index = linear_to_cartesian(linear, &batch);
        let a_start = batch_offset(&index, a_batch) * m * k;
        let b_start = batch_offset(&index, b_batch) * k * n;
        out.extend(gemm_row_major(
            &av[a_start..a_start + m * k],
            &bv[b_start..b_start + k * n],
            m,
            k,
            n,
        ));
    }

    let mut shape = batch;
    if !a_vector {
        shape.push(m);
    }
    if !b_vector {
        shape.push(n);
    }
    DenseTensor::from_vec(out, &shape)
}

/// Linear batch index of a broadcast operand, given the full batch index.
fn batch_offset(index: &[usize], operand_batch: &[usize]) -> usize {
    let lead = index.len() - operand_batch.len();
    let strides = compute_strides(operand_batch);
    operand_batch
        .iter()
        .enumerate()
        .map(|(i, &dim)| if dim == 1 { 0 } else { index[lead + i] * strides[i] })
        .sum()
}

/// Matrix product written into an existing tensor.
///
/// # Errors
///
/// As [`matmul`], plus `TensorError::IncompatibleShapes` if `out` does not
/// have the product's shape (in which case `out` is left untouched).
pub fn matmul_out<ElT: Scalar + ComplexField>(
    out: &mut DenseTensor<ElT>,
    a: &DenseTensor<ElT>,
    b: &DenseTensor<ElT>,
) -> Result<(), TensorError> {
    let product = matmul(a, b)?;
    if out.shape() != product.shape() {
        return Err(TensorError::IncompatibleShapes {
            lhs: out.shape().to_vec(),
            rhs: product.shape().to_vec(),
        });
    }
    out.assign(product.data())
}
