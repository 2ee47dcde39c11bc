//! Generic (naive loop-based) backend implementation.

use crate::backend::PackBackend;
use crate::scalar::Scalar;
use crate::storage::TensorStorage;
use crate::strides::storage_offsets;
use crate::tensor::DenseTensor;

/// Generic backend using naive loop-based implementations.
pub struct GenericBackend;

impl PackBackend for GenericBackend {
    fn gather_into<ElT: Scalar>(dest: &mut [ElT], src: &DenseTensor<ElT>) {
        assert_eq!(dest.len(), src.len(), "gather destination has the wrong length");
        if src.is_contiguous() {
            dest.copy_from_slice(src.data());
            return;
        }
        let data = src.storage().as_slice();
        let positions = storage_offsets(src.shape(), src.strides(), src.storage_offset());
        for (x, pos) in dest.iter_mut().zip(positions) {
            *x = data[pos];
        }
    }
}
