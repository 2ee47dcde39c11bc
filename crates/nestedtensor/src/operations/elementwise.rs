//! Element-wise tensor operations, with broadcasting for binary kernels.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::strides::{compute_strides, storage_offsets};
use crate::tensor::DenseTensor;

/// Scale all elements by a scalar, returning a new tensor.
pub fn scale<ElT: Scalar>(tensor: &DenseTensor<ElT>, alpha: ElT) -> DenseTensor<ElT> {
    apply(tensor, |x| x * alpha)
}

/// Apply a function to every element, returning a new contiguous tensor.
///
/// # Example
///
/// ```
/// use nestedtensor::Tensor;
/// use nestedtensor::operations::apply;
///
/// let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
/// let squared = apply(&t, |x| x * x);
/// assert_eq!(squared.data(), &[1.0, 4.0, 9.0]);
/// ```
pub fn apply<ElT: Scalar, F>(tensor: &DenseTensor<ElT>, f: F) -> DenseTensor<ElT>
where
    F: Fn(ElT) -> ElT,
{
    let data: Vec<ElT> = tensor.to_vec().into_iter().map(f).collect();
    DenseTensor::from_vec(data, tensor.shape()).expect("apply: shape unchanged")
}

/// Apply a function to every element in place.
pub fn apply_inplace<ElT: Scalar, F>(tensor: &mut DenseTensor<ElT>, f: F)
where
    F: Fn(ElT) -> ElT,
{
    for x in tensor.data_mut() {
        *x = f(*x);
    }
}

/// Rectified linear unit.
pub fn relu<ElT: Scalar>(tensor: &DenseTensor<ElT>) -> DenseTensor<ElT> {
    apply(tensor, relu_scalar)
}

/// Rectified linear unit, in place.
pub fn relu_inplace<ElT: Scalar>(tensor: &mut DenseTensor<ElT>) {
    apply_inplace(tensor, relu_scalar);
}

/// Rectified linear unit over a raw slice.
pub(crate) fn relu_slice<ElT: Scalar>(data: &mut [ElT]) {
    for x in data {
        *x = relu_scalar(*x);
    }
}

#[inline]
fn relu_scalar<ElT: Scalar>(x: ElT) -> ElT {
    if x > ElT::zero() { x } else { ElT::zero() }
}

/// Shape resulting from broadcasting `lhs` against `rhs`.
///
/// # Errors
///
/// Returns `TensorError::IncompatibleShapes` if a pair of trailing extents
/// differ and neither is 1.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, TensorError> {
    let ndim = lhs.len().max(rhs.len());
    let mut out = vec![0; ndim];
    for i in 0..ndim {
        let a = if i < ndim - lhs.len() { 1 } else { lhs[i - (ndim - lhs.len())] };
        let b = if i < ndim - rhs.len() { 1 } else { rhs[i - (ndim - rhs.len())] };
        out[i] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(TensorError::IncompatibleShapes {
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                });
            }
        };
    }
    Ok(out)
}

/// Positions of `tensor`'s elements when broadcast to `target`, in row-major
/// order of `target`. Indexes into `tensor.to_vec()`.
fn broadcast_positions(shape: &[usize], target: &[usize]) -> Vec<usize> {
    let strides = compute_strides(shape);
    let lead = target.len() - shape.len();
    let expanded: Vec<usize> = (0..target.len())
        .map(|i| {
            if i < lead || shape[i - lead] == 1 {
                0
            } else {
                strides[i - lead]
            }
        })
        .collect();
    storage_offsets(target, &expanded, 0)
}

/// Apply a binary function element-wise with broadcasting.
///
/// # Errors
///
/// Returns `TensorError::IncompatibleShapes` if the shapes do not broadcast.
pub fn apply_binary<ElT: Scalar, F>(
    a: &DenseTensor<ElT>,
    b: &DenseTensor<ElT>,
    f: F,
) -> Result<DenseTensor<ElT>, TensorError>
where
    F: Fn(ElT, ElT) -> ElT,
{
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    let (av, bv) = (a.to_vec(), b.to_vec());
    let data: Vec<ElT> = broadcast_positions(a.shape(), &shape)
        .into_iter()
        .zip(broadcast_positions(b.shape(), &shape))
        .map(|(i, j)| f(av[i], bv[j]))
        .collect();
    DenseTensor::from_vec(data, &shape)
}

/// Check that `other` broadcasts to exactly `dest`'s shape.
pub fn check_broadcast_to(dest: &[usize], other: &[usize]) -> Result<(), TensorError> {
    let shape = broadcast_shapes(dest, other)?;
    if shape != dest {
        return Err(TensorError::IncompatibleShapes {
            lhs: dest.to_vec(),
            rhs: other.to_vec(),
        });
    }
    Ok(())
}

/// `dest += alpha * other`, broadcasting `other` to `dest`'s shape.
///
/// # Errors
///
/// Returns `TensorError::IncompatibleShapes` (leaving `dest` untouched) if
/// `other` does not broadcast to `dest`.
pub fn add_scaled_inplace<ElT: Scalar>(
    dest: &mut DenseTensor<ElT>,
    other: &DenseTensor<ElT>,
    alpha: ElT,
) -> Result<(), TensorError> {
    check_broadcast_to(dest.shape(), other.shape())?;
    let positions = broadcast_positions(other.shape(), dest.shape());
    let values = other.to_vec();
    for (x, pos) in dest.data_mut().iter_mut().zip(positions) {
        *x += alpha * values[pos];
    }
    Ok(())
}

/// Same as [`add_scaled_inplace`] on a raw row-major slice of the given shape.
pub(crate) fn add_scaled_slice<ElT: Scalar>(
    dest: &mut [ElT],
    dest_shape: &[usize],
    other: &DenseTensor<ElT>,
    alpha: ElT,
) -> Result<(), TensorError> {
    check_broadcast_to(dest_shape, other.shape())?;
    let positions = broadcast_positions(other.shape(), dest_shape);
    let values = other.to_vec();
    for (x, pos) in dest.iter_mut().zip(positions) {
        *x += alpha * values[pos];
    }
    Ok(())
}
