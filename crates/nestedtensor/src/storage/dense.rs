//! Dense storage for tensor data.

use crate::scalar::Scalar;
use crate::storage::TensorStorage;
use crate::storage::buffer::{CpuBuffer, DataBuffer};

/// Dense storage: a flat, shareable array of elements.
///
/// Tensors index into it through their own offset and strides, so several
/// tensors may view disjoint or overlapping regions of one `Dense`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense<ElT: Scalar> {
    buffer: CpuBuffer<ElT>,
}

impl<ElT: Scalar> Dense<ElT> {
    /// Access the underlying buffer.
    #[inline]
    pub fn buffer(&self) -> &CpuBuffer<ElT> {
        &self.buffer
    }
}

impl<ElT: Scalar> TensorStorage<ElT> for Dense<ElT> {
    fn zeros(len: usize) -> Self {
        Self {
            buffer: CpuBuffer::zeros(len),
        }
    }

    fn from_vec(data: Vec<ElT>) -> Self {
        Self {
            buffer: CpuBuffer::from_vec(data),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    fn as_slice(&self) -> &[ElT] {
        self.buffer.as_slice()
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [ElT] {
        self.buffer.as_mut_slice()
    }

    #[inline]
    fn shares_storage_with(&self, other: &Self) -> bool {
        self.buffer.shares_storage_with(&other.buffer)
    }

    #[inline]
    fn is_shared(&self) -> bool {
        self.buffer.is_shared()
    }
}
