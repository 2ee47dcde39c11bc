//! nestedtensor - nested (ragged) tensors over dense arrays
//!
//! A [`NestedTensor`] is a batch of dense tensors whose shapes may differ
//! from one item to the next, possibly grouped over several levels of
//! nesting. It behaves like one tensor whose leading dimensions come from
//! the tree and whose trailing dimensions come from the items.
//!
//! # Architecture
//!
//! ```text
//! Level 1: Dispatch (dispatch module)
//!     → conv2d, relu, softmax, matmul, ... on nested tensors
//!     → buffer fast paths or leaf-wise fallback
//!
//! Level 2: Nested containers (nested module)
//!     → NestedNode tree + map/apply/reduce algorithms
//!     → NestedTensor with an optional contiguous buffer
//!
//! Level 3: Dense tensors (tensor, operations, backend modules)
//!     → row-major DenseTensor with shared storage
//!     → dense kernels, faer-backed GEMM
//! ```
//!
//! # Example
//!
//! ```
//! use nestedtensor::{DenseTensor, NestedTensor, SizeEntry, Tensor};
//!
//! let a: DenseTensor<f64> = Tensor::ones(&[2, 4]);
//! let b: DenseTensor<f64> = Tensor::zeros(&[3, 4]);
//! let nt = NestedTensor::from_tensors([a, b]).unwrap();
//!
//! assert_eq!(nt.dim(), 3);
//! assert_eq!(nt.sizes(), vec![Some(2), None, Some(4)]);
//! assert_eq!(
//!     nt.nested_size_at(1).unwrap(),
//!     SizeEntry::Tuple(vec![SizeEntry::Size(2), SizeEntry::Size(3)])
//! );
//!
//! let packed = nt.to_contiguous();
//! assert!(packed.is_contiguous());
//! assert_eq!(packed.numel(), 20);
//! ```

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod nested;
pub mod operations;
pub mod random;
pub mod scalar;
pub mod storage;
pub mod strides;
pub mod tensor;

pub use dispatch::{DispatchOutput, DispatchPolicy, NestedInplaceOp, NestedOp, Operand};
pub use error::TensorError;
pub use nested::{NestedItem, NestedNode, NestedTensor, SizeEntry};
pub use scalar::{DType, Scalar};
pub use storage::{Dense, TensorStorage};
pub use tensor::{DenseTensor, Device, Layout, Tensor};
