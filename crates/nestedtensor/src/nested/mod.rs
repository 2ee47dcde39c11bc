//! Nested trees and the nested tensor built on them.
//!
//! [`NestedNode`] is the generic tree container; the free functions in this
//! module ([`map`], [`apply_mut`], [`reduce`], ...) are the structural
//! algorithms over it. [`NestedTensor`] wraps a tree of dense tensors and
//! optionally a single contiguous buffer that backs all leaves.

mod algorithms;
mod node;
mod tensor;

pub use algorithms::{
    apply, apply2, apply3, apply_mut, flatten, map, map2, map3, map_into, reduce, try_map, try_map2, unflatten,
};
pub use node::{Leaves, NestedNode};
pub use tensor::{NestedItem, NestedTensor, SizeEntry, SizeNode, TensorNode};

pub(crate) use tensor::leaf_ranges;
