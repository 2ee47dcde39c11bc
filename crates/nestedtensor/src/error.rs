//! Error types for nestedtensor.

use thiserror::Error;

/// Errors that can occur in dense and nested tensor operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// Shape mismatch between data length and expected size.
    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Two shapes that must agree (or broadcast) do not.
    #[error("incompatible shapes {lhs:?} and {rhs:?}")]
    IncompatibleShapes { lhs: Vec<usize>, rhs: Vec<usize> },

    /// Index out of bounds.
    #[error("index out of bounds: index {index} is out of range for dimension {dim_size}")]
    IndexOutOfBounds { index: usize, dim_size: usize },

    /// Wrong number of indices provided.
    #[error("wrong number of indices: expected {expected}, got {actual}")]
    WrongNumberOfIndices { expected: usize, actual: usize },

    /// Operation requires specific tensor rank.
    #[error("expected tensor of rank {expected}, got rank {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Slice range out of bounds.
    #[error("slice range {start}..{end} out of bounds for dimension {dim} with size {size}")]
    SliceOutOfBounds {
        start: usize,
        end: usize,
        dim: usize,
        size: usize,
    },

    /// A (possibly negative) dimension index does not name an existing dimension.
    #[error("dimension {dim} out of range for tensor with {ndim} dimensions")]
    DimensionOutOfRange { dim: i64, ndim: usize },

    /// Two trees that must be congruent differ in degree or height somewhere.
    #[error("nested structures are not congruent: {reason}")]
    StructureMismatch { reason: String },

    /// A dimension that must be regular varies across leaves.
    #[error("dimension {dim} is irregular across the nested tensor")]
    IrregularDimension { dim: usize },

    /// The operation only acts on tensor dimensions, but a nested one was named.
    #[error("dimension {dim} is a nested dimension (nested_dim = {nested_dim}); only tensor dimensions are supported")]
    NestedDimensionUnsupported { dim: usize, nested_dim: usize },

    /// A gradient was requested for a leaf that has none.
    #[error("gradient is undefined for at least one constituent tensor")]
    UndefinedGradient,

    /// Leaves of a nested tensor must share the same rank.
    #[error("all constituent tensors must have rank {expected}, found rank {actual}")]
    IrregularRank { expected: usize, actual: usize },

    /// The operation requires at least one constituent tensor.
    #[error("nested tensor has no constituent tensors")]
    EmptyNestedTensor,

    /// Catch-all for invalid operation arguments.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl TensorError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        TensorError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn structure_mismatch(reason: impl Into<String>) -> Self {
        TensorError::StructureMismatch {
            reason: reason.into(),
        }
    }
}
