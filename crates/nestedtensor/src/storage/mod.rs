//! Storage types for tensor data.

pub mod buffer;
pub mod dense;

pub use buffer::{CpuBuffer, DataBuffer};
pub use dense::Dense;

use crate::scalar::Scalar;

/// Trait for tensor storage types.
pub trait TensorStorage<ElT: Scalar>: Clone + std::fmt::Debug {
    /// Create storage with given length, zero-initialized.
    fn zeros(len: usize) -> Self;

    /// Create storage from existing vector.
    fn from_vec(data: Vec<ElT>) -> Self;

    /// Number of elements held by the storage.
    fn len(&self) -> usize;

    /// Check if storage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get immutable slice of data.
    fn as_slice(&self) -> &[ElT];

    /// Get mutable slice of data (copy-on-write when shared).
    fn as_mut_slice(&mut self) -> &mut [ElT];

    /// Whether two storages refer to the same allocation.
    fn shares_storage_with(&self, other: &Self) -> bool;

    /// Whether more than one tensor references this storage.
    fn is_shared(&self) -> bool;
}
