//! Data buffer abstraction for shared element storage.
//!
//! A buffer may be referenced by many tensors at once (a contiguous nested
//! tensor and every one of its constituent views). Writes go through
//! copy-on-write, so a mutation through one owner never shows up in another.

use std::sync::Arc;

use crate::scalar::Scalar;

/// Trait for element storage backends.
pub trait DataBuffer<T: Scalar>: Clone + std::fmt::Debug + PartialEq {
    /// Create buffer with given length, zero-initialized.
    fn zeros(len: usize) -> Self;

    /// Create buffer from existing vector.
    fn from_vec(data: Vec<T>) -> Self;

    /// Length of buffer (number of elements).
    fn len(&self) -> usize;

    /// Check if buffer is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get immutable slice of data.
    fn as_slice(&self) -> &[T];

    /// Get mutable slice of data, detaching from other owners first.
    fn as_mut_slice(&mut self) -> &mut [T];

    /// Whether `self` and `other` refer to the same allocation.
    fn shares_storage_with(&self, other: &Self) -> bool;

    /// Whether more than one owner references this allocation.
    fn is_shared(&self) -> bool;
}

/// CPU data buffer backed by a reference-counted `Vec<T>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBuffer<T: Scalar> {
    data: Arc<Vec<T>>,
}

impl<T: Scalar> CpuBuffer<T> {
    /// Create a new CpuBuffer from a Vec.
    #[inline]
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Consume the buffer and return the underlying Vec, copying only if shared.
    pub fn into_vec(self) -> Vec<T> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}

impl<T: Scalar> DataBuffer<T> for CpuBuffer<T> {
    #[inline]
    fn zeros(len: usize) -> Self {
        Self::new(vec![T::zero(); len])
    }

    #[inline]
    fn from_vec(data: Vec<T>) -> Self {
        Self::new(data)
    }

    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    #[inline]
    fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    #[inline]
    fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_buffer_zeros() {
        let buf: CpuBuffer<f64> = CpuBuffer::zeros(5);
        assert_eq!(buf.len(), 5);
        assert!(!buf.is_empty());
        assert!(buf.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_cpu_buffer_clone_shares() {
        let buf1 = CpuBuffer::from_vec(vec![1.0, 2.0, 3.0]);
        let buf2 = buf1.clone();
        assert!(buf1.shares_storage_with(&buf2));
        assert!(buf1.is_shared());
    }

    #[test]
    fn test_cpu_buffer_copy_on_write() {
        let buf1 = CpuBuffer::from_vec(vec![1.0, 2.0, 3.0]);
        let mut buf2 = buf1.clone();
        buf2.as_mut_slice()[1] = 5.0;
        assert_eq!(buf1.as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(buf2.as_slice(), &[1.0, 5.0, 3.0]);
        assert!(!buf1.shares_storage_with(&buf2));
        assert!(!buf1.is_shared());
    }

    #[test]
    fn test_cpu_buffer_into_vec() {
        let buf = CpuBuffer::from_vec(vec![1.0, 2.0, 3.0]);
        let other = buf.clone();
        assert_eq!(buf.into_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(other.into_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cpu_buffer_empty() {
        let buf: CpuBuffer<f64> = CpuBuffer::zeros(0);
        assert!(buf.is_empty());
    }
}
