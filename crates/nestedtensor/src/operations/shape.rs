//! Shape-only operations.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Merge dimensions `start_dim..=end_dim` into one.
///
/// A zero-dimensional tensor flattens to shape `[1]`.
///
/// # Errors
///
/// Returns `TensorError::DimensionOutOfRange` if `end_dim` is out of range
/// and `TensorError::InvalidArgument` if `start_dim > end_dim`.
pub fn flatten<ElT: Scalar>(
    tensor: &DenseTensor<ElT>,
    start_dim: usize,
    end_dim: usize,
) -> Result<DenseTensor<ElT>, TensorError> {
    if tensor.ndim() == 0 {
        return tensor.reshape(&[1]);
    }
    if end_dim >= tensor.ndim() {
        return Err(TensorError::DimensionOutOfRange {
            dim: end_dim as i64,
            ndim: tensor.ndim(),
        });
    }
    if start_dim > end_dim {
        return Err(TensorError::invalid_argument(format!(
            "flatten: start_dim {start_dim} is after end_dim {end_dim}"
        )));
    }
    tensor.reshape(&flattened_shape(tensor.shape(), start_dim, end_dim))
}

pub(crate) fn flattened_shape(shape: &[usize], start_dim: usize, end_dim: usize) -> Vec<usize> {
    let mut out = shape[..start_dim].to_vec();
    out.push(shape[start_dim..=end_dim].iter().product());
    out.extend_from_slice(&shape[end_dim + 1..]);
    out
}
