//! Softmax and log-softmax along one dimension.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Split a shape around `dim` into (outer, extent, inner) counts.
pub(crate) fn split_at_dim(shape: &[usize], dim: usize) -> (usize, usize, usize) {
    let outer = shape[..dim].iter().product();
    let inner = shape[dim + 1..].iter().product();
    (outer, shape[dim], inner)
}

fn reduce_along<ElT: Scalar>(
    tensor: &DenseTensor<ElT>,
    dim: usize,
    log: bool,
) -> Result<DenseTensor<ElT>, TensorError> {
    if dim >= tensor.ndim() {
        return Err(TensorError::DimensionOutOfRange {
            dim: dim as i64,
            ndim: tensor.ndim(),
        });
    }
    let mut data = tensor.to_vec();
    let (outer, n, inner) = split_at_dim(tensor.shape(), dim);

    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| o * n * inner + k * inner + i;
            let mut max = ElT::neg_infinity();
            for k in 0..n {
                if data[at(k)] > max {
                    max = data[at(k)];
                }
            }
            let total: ElT = (0..n).map(|k| (data[at(k)] - max).exp()).sum();
            for k in 0..n {
                let shifted = data[at(k)] - max;
                data[at(k)] = if log {
                    shifted - total.ln()
                } else {
                    shifted.exp() / total
                };
            }
        }
    }
    DenseTensor::from_vec(data, tensor.shape())
}

/// Softmax along `dim`.
///
/// # Errors
///
/// Returns `TensorError::DimensionOutOfRange` if `dim >= ndim`.
///
/// # Example
///
/// ```
/// use nestedtensor::DenseTensor;
/// use nestedtensor::operations::softmax;
///
/// let t = DenseTensor::from_vec(vec![0.0, 0.0], &[2]).unwrap();
/// assert_eq!(softmax(&t, 0).unwrap().data(), &[0.5, 0.5]);
/// ```
pub fn softmax<ElT: Scalar>(tensor: &DenseTensor<ElT>, dim: usize) -> Result<DenseTensor<ElT>, TensorError> {
    reduce_along(tensor, dim, false)
}

/// Log-softmax along `dim`.
pub fn log_softmax<ElT: Scalar>(
    tensor: &DenseTensor<ElT>,
    dim: usize,
) -> Result<DenseTensor<ElT>, TensorError> {
    reduce_along(tensor, dim, true)
}
