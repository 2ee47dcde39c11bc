//! Copy operations for tensors.

use crate::backend::{GenericBackend, PackBackend};
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Copy the elements of `src` into `dest`.
///
/// `src` may be any strided view; `dest` is written through copy-on-write.
///
/// # Errors
///
/// Returns `TensorError::IncompatibleShapes` if shapes differ.
///
/// # Example
///
/// ```
/// use nestedtensor::DenseTensor;
/// use nestedtensor::operations::copy_into;
///
/// let src = DenseTensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
/// let mut dest = DenseTensor::<f64>::zeros(&[2]);
/// copy_into(&mut dest, &src).unwrap();
/// assert_eq!(dest.data(), &[1.0, 2.0]);
/// ```
pub fn copy_into<ElT: Scalar>(
    dest: &mut DenseTensor<ElT>,
    src: &DenseTensor<ElT>,
) -> Result<(), TensorError> {
    if dest.shape() != src.shape() {
        return Err(TensorError::IncompatibleShapes {
            lhs: dest.shape().to_vec(),
            rhs: src.shape().to_vec(),
        });
    }
    GenericBackend::gather_into(dest.data_mut(), src);
    Ok(())
}
