//! Packing backend trait.

use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Backend trait for gathering strided tensors into contiguous memory.
pub trait PackBackend {
    /// Write the elements of `src`, in row-major logical order, into `dest`.
    ///
    /// `src` may be any strided view.
    ///
    /// # Panics
    ///
    /// Panics if `dest.len() != src.len()`.
    fn gather_into<ElT: Scalar>(dest: &mut [ElT], src: &DenseTensor<ElT>);

    /// Pack `tensors` back to back into one flat vector of `total` elements.
    ///
    /// # Panics
    ///
    /// Panics if the element counts do not add up to `total`.
    fn pack<'a, ElT: Scalar + 'a>(tensors: impl IntoIterator<Item = &'a DenseTensor<ElT>>, total: usize) -> Vec<ElT> {
        let mut out = vec![ElT::zero(); total];
        let mut start = 0;
        for t in tensors {
            let end = start + t.len();
            Self::gather_into(&mut out[start..end], t);
            start = end;
        }
        assert_eq!(start, total, "packed {start} of {total} elements");
        out
    }
}
