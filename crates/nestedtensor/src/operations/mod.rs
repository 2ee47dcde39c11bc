//! Dense tensor operations.
//!
//! These are the per-constituent kernels that nested tensor operations map
//! over their leaves:
//!
//! ```text
//! Level 1: High-level API (matmul, conv2d, softmax, ...)
//!     → allocate output
//!     → call in-place / into version where one exists
//!
//! Level 2: Backend implementation (GenericBackend, faer GEMM)
//! ```

mod conv;
mod copy;
mod dropout;
mod elementwise;
mod matmul;
mod norm;
mod pool;
mod reduction;
mod shape;
mod softmax;

pub use conv::{Conv2dParams, conv2d};
pub use copy::copy_into;
pub use dropout::{DropoutParams, dropout, dropout_inplace};
pub use elementwise::{
    add_scaled_inplace, apply, apply_binary, apply_inplace, broadcast_shapes, check_broadcast_to,
    relu, relu_inplace, scale,
};
pub use matmul::{matmul, matmul_out};
pub use norm::{BatchNormParams, LayerNormParams, batch_norm, layer_norm};
pub use pool::{MaxPool2dParams, max_pool2d};
pub use reduction::{all, any, sum_all};
pub use shape::flatten;
pub use softmax::{log_softmax, softmax};

pub(crate) use dropout::dropout_slice;
pub(crate) use elementwise::{add_scaled_slice, relu_slice};
pub(crate) use shape::flattened_shape;
