//! Full reductions over a tensor.

use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Sum of all elements as a zero-dimensional tensor.
///
/// # Example
///
/// ```
/// use nestedtensor::DenseTensor;
/// use nestedtensor::operations::sum_all;
///
/// let t = DenseTensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
/// assert_eq!(sum_all(&t).get(&[]), Some(&6.0));
/// ```
pub fn sum_all<ElT: Scalar>(tensor: &DenseTensor<ElT>) -> DenseTensor<ElT> {
    DenseTensor::scalar(tensor.to_vec().into_iter().sum())
}

/// Whether every element is non-zero. True for an empty tensor.
pub fn all<ElT: Scalar>(tensor: &DenseTensor<ElT>) -> bool {
    tensor.to_vec().into_iter().all(|x| x != ElT::zero())
}

/// Whether any element is non-zero. False for an empty tensor.
pub fn any<ElT: Scalar>(tensor: &DenseTensor<ElT>) -> bool {
    tensor.to_vec().into_iter().any(|x| x != ElT::zero())
}
