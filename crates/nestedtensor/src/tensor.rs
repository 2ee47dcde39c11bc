//! N-dimensional dense tensor type with shareable storage.
//!
//! A `Tensor` is a (storage, offset, shape, strides) view. Several tensors
//! may view the same storage: `reshape`, `narrow`, `select`, `transpose`,
//! `unsqueeze` and `squeeze` return views without copying, and writes detach
//! the writer through copy-on-write.
//!
//! Layout is row-major, so the constituents of a contiguous nested tensor
//! can be viewed as consecutive slices of one flat buffer.

use std::fmt;
use std::marker::PhantomData;

use crate::error::TensorError;
use crate::scalar::{DType, Scalar};
use crate::storage::{Dense, TensorStorage};
use crate::strides::{cartesian_to_linear, compute_strides, is_contiguous, storage_offsets};

/// Device on which tensor data resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
}

/// Memory layout of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Strided,
}

/// A n-dimensional tensor with polymorphic storage.
///
/// Besides data, each tensor carries a `requires_grad` flag and an optional
/// accumulated gradient, filled by [`Tensor::backward`].
#[derive(Debug, Clone)]
pub struct Tensor<ElT: Scalar, StoreT: TensorStorage<ElT> = Dense<ElT>> {
    storage: StoreT,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
    requires_grad: bool,
    grad: Option<Box<Tensor<ElT, StoreT>>>,
    pinned: bool,
    _phantom: PhantomData<ElT>,
}

/// Type alias for dense tensors (the only storage used by nested tensors).
pub type DenseTensor<ElT> = Tensor<ElT, Dense<ElT>>;

impl<ElT: Scalar, StoreT: TensorStorage<ElT>> Tensor<ElT, StoreT> {
    fn from_parts(storage: StoreT, offset: usize, shape: Vec<usize>, strides: Vec<usize>) -> Self {
        Self {
            storage,
            offset,
            shape,
            strides,
            requires_grad: false,
            grad: None,
            pinned: false,
            _phantom: PhantomData,
        }
    }

    /// A new view over the same storage, carrying over the autograd flag.
    fn view_with(&self, offset: usize, shape: Vec<usize>, strides: Vec<usize>) -> Self {
        let mut view = Self::from_parts(self.storage.clone(), offset, shape, strides);
        view.requires_grad = self.requires_grad;
        view.pinned = self.pinned;
        view
    }

    /// Create a new tensor with the given shape, zero-initialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use nestedtensor::Tensor;
    ///
    /// let t: Tensor<f64> = Tensor::zeros(&[2, 3, 4]);
    /// assert_eq!(t.shape(), &[2, 3, 4]);
    /// assert_eq!(t.len(), 24);
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::from_parts(StoreT::zeros(len), 0, shape.to_vec(), compute_strides(shape))
    }

    /// Create a tensor filled with `value`.
    pub fn full(shape: &[usize], value: ElT) -> Self {
        let len: usize = shape.iter().product();
        Self::from_parts(
            StoreT::from_vec(vec![value; len]),
            0,
            shape.to_vec(),
            compute_strides(shape),
        )
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, ElT::one())
    }

    /// Create a zero-dimensional tensor holding one value.
    pub fn scalar(value: ElT) -> Self {
        Self::full(&[], value)
    }

    /// Create tensor from row-major data and shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if data length doesn't match shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use nestedtensor::{DenseTensor, Tensor};
    ///
    /// let t: DenseTensor<f64> = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// assert_eq!(t.get(&[0, 1]), Some(&2.0));
    /// assert_eq!(t.get(&[1, 0]), Some(&4.0));
    /// ```
    pub fn from_vec(data: Vec<ElT>, shape: &[usize]) -> Result<Self, TensorError> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(TensorError::ShapeMismatch {
                expected: expected_len,
                actual: data.len(),
            });
        }
        Ok(Self::from_parts(
            StoreT::from_vec(data),
            0,
            shape.to_vec(),
            compute_strides(shape),
        ))
    }

    /// Get the shape of the tensor.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the rank (number of dimensions).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check if tensor is empty (has zero elements).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get strides.
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Offset of the first element within the storage.
    #[inline]
    pub fn storage_offset(&self) -> usize {
        self.offset
    }

    /// Get the underlying storage.
    #[inline]
    pub fn storage(&self) -> &StoreT {
        &self.storage
    }

    /// Whether the elements are laid out densely in row-major order.
    pub fn is_contiguous(&self) -> bool {
        is_contiguous(&self.shape, &self.strides)
    }

    /// Get the elements as a slice.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not contiguous; use [`Tensor::to_vec`] or
    /// `contiguous()` for strided views.
    pub fn data(&self) -> &[ElT] {
        assert!(
            self.is_contiguous(),
            "data() requires a contiguous tensor (shape {:?}, strides {:?})",
            self.shape,
            self.strides
        );
        &self.storage.as_slice()[self.offset..self.offset + self.len()]
    }

    /// Get the elements as a mutable slice.
    ///
    /// A strided view is first materialized into fresh contiguous storage;
    /// shared storage is copied before writing.
    pub fn data_mut(&mut self) -> &mut [ElT] {
        if !self.is_contiguous() {
            let data = self.to_vec();
            self.storage = StoreT::from_vec(data);
            self.offset = 0;
            self.strides = compute_strides(&self.shape);
        }
        let (start, len) = (self.offset, self.len());
        &mut self.storage.as_mut_slice()[start..start + len]
    }

    /// Copy the elements out in row-major logical order.
    pub fn to_vec(&self) -> Vec<ElT> {
        if self.is_contiguous() {
            return self.data().to_vec();
        }
        let data = self.storage.as_slice();
        storage_offsets(&self.shape, &self.strides, self.offset)
            .into_iter()
            .map(|pos| data[pos])
            .collect()
    }

    fn position(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.ndim() {
            return None;
        }
        for (&idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return None;
            }
        }
        Some(self.offset + cartesian_to_linear(indices, &self.strides))
    }

    /// Get element by cartesian indices.
    ///
    /// Returns `None` if indices are out of bounds or wrong number of indices.
    pub fn get(&self, indices: &[usize]) -> Option<&ElT> {
        let pos = self.position(indices)?;
        self.storage.as_slice().get(pos)
    }

    /// Get mutable element by cartesian indices.
    pub fn get_mut(&mut self, indices: &[usize]) -> Option<&mut ElT> {
        let pos = self.position(indices)?;
        self.storage.as_mut_slice().get_mut(pos)
    }

    /// Set element by cartesian indices.
    ///
    /// # Errors
    ///
    /// Returns error if indices are out of bounds or wrong number of indices.
    pub fn set(&mut self, indices: &[usize], value: ElT) -> Result<(), TensorError> {
        if indices.len() != self.ndim() {
            return Err(TensorError::WrongNumberOfIndices {
                expected: self.ndim(),
                actual: indices.len(),
            });
        }
        for (&idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return Err(TensorError::IndexOutOfBounds {
                    index: idx,
                    dim_size: dim,
                });
            }
        }
        let pos = self.offset + cartesian_to_linear(indices, &self.strides);
        self.storage.as_mut_slice()[pos] = value;
        Ok(())
    }

    /// Fill all elements with a value.
    pub fn fill(&mut self, value: ElT) {
        for x in self.data_mut() {
            *x = value;
        }
    }

    /// Overwrite the elements with `values`, given in row-major order.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the lengths differ.
    pub fn assign(&mut self, values: &[ElT]) -> Result<(), TensorError> {
        if values.len() != self.len() {
            return Err(TensorError::ShapeMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.data_mut().copy_from_slice(values);
        Ok(())
    }

    /// Element type tag.
    pub fn dtype(&self) -> DType {
        ElT::DTYPE
    }

    /// Size in bytes of one element.
    pub fn element_size(&self) -> usize {
        ElT::DTYPE.element_size()
    }

    pub fn device(&self) -> Device {
        Device::Cpu
    }

    pub fn layout(&self) -> Layout {
        Layout::Strided
    }

    /// Whether the tensor was produced by `pin_memory`.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Whether gradients are accumulated for this tensor.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Set the `requires_grad` flag. Clearing it drops any accumulated gradient.
    pub fn set_requires_grad(&mut self, requires_grad: bool) -> &mut Self {
        self.requires_grad = requires_grad;
        if !requires_grad {
            self.grad = None;
        }
        self
    }

    /// Accumulated gradient, if any.
    pub fn grad(&self) -> Option<&Self> {
        self.grad.as_deref()
    }

    /// Accumulate `gradient` into this tensor's gradient slot.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if the tensor does not require
    /// gradients and `TensorError::IncompatibleShapes` if shapes differ.
    pub fn backward(&mut self, gradient: &Self) -> Result<(), TensorError> {
        self.check_backward(gradient)?;
        let incoming = gradient.to_vec();
        match self.grad.as_mut() {
            Some(existing) => {
                for (acc, g) in existing.data_mut().iter_mut().zip(incoming) {
                    *acc += g;
                }
            }
            None => {
                let fresh = Self::from_vec(incoming, &self.shape)?;
                self.grad = Some(Box::new(fresh));
            }
        }
        Ok(())
    }

    /// Validate a `backward` call without touching the gradient slot.
    pub(crate) fn check_backward(&self, gradient: &Self) -> Result<(), TensorError> {
        if !self.requires_grad {
            return Err(TensorError::invalid_argument(
                "backward called on a tensor that does not require grad",
            ));
        }
        if gradient.shape() != self.shape() {
            return Err(TensorError::IncompatibleShapes {
                lhs: self.shape.clone(),
                rhs: gradient.shape.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn take_grad(&mut self) -> Option<Box<Self>> {
        self.grad.take()
    }

    pub(crate) fn restore_grad(&mut self, grad: Option<Box<Self>>) {
        self.grad = grad;
    }

    /// Same data, detached from gradient tracking.
    pub fn detach(&self) -> Self {
        let mut out = self.clone();
        out.requires_grad = false;
        out.grad = None;
        out
    }
}

impl<ElT: Scalar, StoreT: TensorStorage<ElT>> PartialEq for Tensor<ElT, StoreT> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.to_vec() == other.to_vec()
    }
}

impl<ElT: Scalar, StoreT: TensorStorage<ElT>> fmt::Display for Tensor<ElT, StoreT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_level<T: Scalar>(
            f: &mut fmt::Formatter<'_>,
            data: &[T],
            shape: &[usize],
        ) -> fmt::Result {
            match shape.split_first() {
                None => write!(f, "{}", data[0]),
                Some((&n, rest)) => {
                    let chunk: usize = rest.iter().product();
                    write!(f, "[")?;
                    for i in 0..n {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write_level(f, &data[i * chunk..(i + 1) * chunk], rest)?;
                    }
                    write!(f, "]")
                }
            }
        }

        write!(f, "tensor(")?;
        write_level(f, &self.to_vec(), &self.shape)?;
        write!(f, ")")
    }
}

// DenseTensor-specific operations: views share the reference-counted buffer.
impl<ElT: Scalar> Tensor<ElT, Dense<ElT>> {
    /// Reshape the tensor to a new shape.
    ///
    /// Contiguous tensors are reshaped as zero-copy views; strided views are
    /// materialized first.
    ///
    /// # Errors
    ///
    /// Returns an error if the total number of elements doesn't match.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::Tensor;
    ///
    /// let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// let t3x2 = t.reshape(&[3, 2]).unwrap();
    /// assert_eq!(t3x2.shape(), &[3, 2]);
    /// assert!(t.shares_storage_with(&t3x2));
    /// ```
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self, TensorError> {
        let new_len: usize = new_shape.iter().product();
        if self.len() != new_len {
            return Err(TensorError::ShapeMismatch {
                expected: self.len(),
                actual: new_len,
            });
        }
        if !self.is_contiguous() {
            return self.contiguous().reshape(new_shape);
        }
        Ok(self.view_with(self.offset, new_shape.to_vec(), compute_strides(new_shape)))
    }

    /// Reshape with at most one `-1` entry, whose extent is inferred.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` for more than one `-1`, for
    /// other negative entries, or when the inferred extent is not integral.
    pub fn reshape_inferred(&self, shape: &[i64]) -> Result<Self, TensorError> {
        let resolved = infer_shape(shape, self.len())?;
        self.reshape(&resolved)
    }

    /// Check if this tensor shares storage with another tensor.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        self.storage.shares_storage_with(&other.storage)
    }

    /// Check if this tensor's storage is shared with other tensors.
    pub fn is_view(&self) -> bool {
        self.storage.is_shared()
    }

    /// Row-major view of `shape` starting `start` elements into this
    /// contiguous tensor.
    pub(crate) fn contiguous_view(&self, start: usize, shape: &[usize]) -> Self {
        debug_assert!(self.is_contiguous());
        self.view_with(self.offset + start, shape.to_vec(), compute_strides(shape))
    }

    /// Contiguous version of this tensor; a cheap clone if already contiguous.
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }
        let mut out = Self::from_parts(
            Dense::from_vec(self.to_vec()),
            0,
            self.shape.clone(),
            compute_strides(&self.shape),
        );
        out.requires_grad = self.requires_grad;
        out.pinned = self.pinned;
        out
    }

    /// Contiguous copy in fresh storage, keeping flags and gradient.
    pub(crate) fn deep_clone(&self) -> Self {
        let mut out = Self::from_parts(
            Dense::from_vec(self.to_vec()),
            0,
            self.shape.clone(),
            compute_strides(&self.shape),
        );
        out.requires_grad = self.requires_grad;
        out.pinned = self.pinned;
        out.grad = self.grad.clone();
        out
    }

    /// Contiguous copy flagged as pinned.
    pub fn pin_memory(&self) -> Self {
        let mut out = self.contiguous();
        out.pinned = true;
        out
    }

    fn check_dim(&self, dim: usize) -> Result<(), TensorError> {
        if dim >= self.ndim() {
            return Err(TensorError::DimensionOutOfRange {
                dim: dim as i64,
                ndim: self.ndim(),
            });
        }
        Ok(())
    }

    /// Swap two dimensions (zero-copy view).
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self, TensorError> {
        self.check_dim(dim0)?;
        self.check_dim(dim1)?;
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.swap(dim0, dim1);
        strides.swap(dim0, dim1);
        Ok(self.view_with(self.offset, shape, strides))
    }

    /// Restrict `dim` to `start..start + length` (zero-copy view).
    pub fn narrow(&self, dim: usize, start: usize, length: usize) -> Result<Self, TensorError> {
        self.check_dim(dim)?;
        let size = self.shape[dim];
        if start + length > size {
            return Err(TensorError::SliceOutOfBounds {
                start,
                end: start + length,
                dim,
                size,
            });
        }
        let mut shape = self.shape.clone();
        shape[dim] = length;
        let offset = self.offset + start * self.strides[dim];
        Ok(self.view_with(offset, shape, self.strides.clone()))
    }

    /// Index `dim` at `index`, removing that dimension (zero-copy view).
    pub fn select(&self, dim: usize, index: usize) -> Result<Self, TensorError> {
        self.check_dim(dim)?;
        if index >= self.shape[dim] {
            return Err(TensorError::IndexOutOfBounds {
                index,
                dim_size: self.shape[dim],
            });
        }
        let offset = self.offset + index * self.strides[dim];
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.remove(dim);
        strides.remove(dim);
        Ok(self.view_with(offset, shape, strides))
    }

    /// Split along `dim` into views, one per index.
    pub fn unbind(&self, dim: usize) -> Result<Vec<Self>, TensorError> {
        self.check_dim(dim)?;
        (0..self.shape[dim]).map(|i| self.select(dim, i)).collect()
    }

    /// Insert a dimension of extent 1 at `dim` (zero-copy view).
    pub fn unsqueeze(&self, dim: usize) -> Result<Self, TensorError> {
        if dim > self.ndim() {
            return Err(TensorError::DimensionOutOfRange {
                dim: dim as i64,
                ndim: self.ndim() + 1,
            });
        }
        let stride = if dim < self.ndim() {
            self.strides[dim] * self.shape[dim]
        } else {
            1
        };
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.insert(dim, 1);
        strides.insert(dim, stride);
        Ok(self.view_with(self.offset, shape, strides))
    }

    /// Remove `dim` if its extent is 1; otherwise return an unchanged view.
    pub fn squeeze(&self, dim: usize) -> Result<Self, TensorError> {
        self.check_dim(dim)?;
        if self.shape[dim] != 1 {
            return Ok(self.view_with(self.offset, self.shape.clone(), self.strides.clone()));
        }
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.remove(dim);
        strides.remove(dim);
        Ok(self.view_with(self.offset, shape, strides))
    }

    /// Stack equally shaped tensors along a new leading dimension.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::EmptyNestedTensor` for an empty input and
    /// `TensorError::IncompatibleShapes` if shapes differ.
    pub fn stack(tensors: &[Self]) -> Result<Self, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyNestedTensor)?;
        let mut data = Vec::with_capacity(first.len() * tensors.len());
        for t in tensors {
            if t.shape() != first.shape() {
                return Err(TensorError::IncompatibleShapes {
                    lhs: first.shape.clone(),
                    rhs: t.shape.clone(),
                });
            }
            data.extend(t.to_vec());
        }
        let mut shape = Vec::with_capacity(first.ndim() + 1);
        shape.push(tensors.len());
        shape.extend_from_slice(first.shape());
        Self::from_vec(data, &shape)
    }
}

/// Resolve a shape containing at most one `-1` against an element count.
pub(crate) fn infer_shape(shape: &[i64], numel: usize) -> Result<Vec<usize>, TensorError> {
    let mut inferred = None;
    let mut known = 1usize;
    for (i, &s) in shape.iter().enumerate() {
        match s {
            -1 if inferred.is_none() => inferred = Some(i),
            -1 => return Err(TensorError::invalid_argument("only one dimension can be inferred")),
            s if s < 0 => {
                return Err(TensorError::invalid_argument(format!(
                    "invalid shape dimension {s}"
                )));
            }
            s => known *= s as usize,
        }
    }

    let mut resolved: Vec<usize> = shape.iter().map(|&s| s.max(0) as usize).collect();
    if let Some(i) = inferred {
        if known == 0 || numel % known != 0 {
            return Err(TensorError::invalid_argument(format!(
                "shape {shape:?} is invalid for input of size {numel}"
            )));
        }
        resolved[i] = numel / known;
    }
    Ok(resolved)
}
