//! Ragged-aware versions of dense tensor operations.
//!
//! Every supported operation is a plain function in this module taking a
//! [`NestedTensor`] and returning a new nested tensor (or, for reductions, a
//! dense tensor). [`NestedOp`] and [`NestedInplaceOp`] enumerate the same
//! operations with their arguments so callers can route by name through
//! [`dispatch`] and [`dispatch_inplace`].
//!
//! Operations either run leaf-wise, mapping the dense kernel over every
//! constituent, or take a fast path over the contiguous buffer when the
//! input allows it. [`DispatchPolicy`] can disable the fast paths; both
//! paths produce the same values.
//!
//! # Example
//!
//! ```
//! use nestedtensor::dispatch::{self, DispatchPolicy, NestedOp};
//! use nestedtensor::{DenseTensor, NestedTensor};
//!
//! let nt = NestedTensor::from_tensors([
//!     DenseTensor::from_vec(vec![-1.0, 2.0], &[2]).unwrap(),
//!     DenseTensor::from_vec(vec![3.0, -4.0, 5.0], &[3]).unwrap(),
//! ])
//! .unwrap();
//! let out = dispatch::dispatch(NestedOp::Relu, &nt, DispatchPolicy::default())
//!     .unwrap()
//!     .into_nested()
//!     .unwrap();
//! assert_eq!(out.get(1).unwrap().into_tensor().unwrap().to_vec(), vec![3.0, 0.0, 5.0]);
//! ```

mod functions;

use faer_traits::ComplexField;
use rand::RngCore;

use crate::error::TensorError;
use crate::nested::NestedTensor;
use crate::operations::{BatchNormParams, Conv2dParams, DropoutParams, LayerNormParams, MaxPool2dParams};
use crate::random::RandomUniform;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

pub use functions::{
    add_, all, any, batch_norm, conv2d, dropout, dropout_, flatten, layer_norm, log_softmax, matmul, matmul_out,
    max_pool2d, pin_memory, relu, relu_, reshape, softmax, sum, transpose,
};

/// Names of every operation with a nested implementation, in registration
/// order.
pub const REGISTERED_OPS: [&str; 20] = [
    "conv2d",
    "batch_norm",
    "max_pool2d",
    "dropout",
    "dropout_",
    "sum",
    "add_.Tensor",
    "any",
    "all",
    "_log_softmax",
    "reshape",
    "transpose.int",
    "softmax.int",
    "layer_norm",
    "matmul",
    "matmul.out",
    "pin_memory",
    "flatten.using_ints",
    "relu",
    "relu_",
];

/// Whether operations may use the contiguous-buffer fast paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub allow_buffer_fast_path: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            allow_buffer_fast_path: true,
        }
    }
}

impl DispatchPolicy {
    /// Always run leaf-wise.
    pub fn leaf_wise() -> Self {
        Self {
            allow_buffer_fast_path: false,
        }
    }
}

/// Second operand of a binary operation: either ragged and paired leaf by
/// leaf, or a single dense tensor broadcast into every leaf.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a, T: Scalar> {
    Nested(&'a NestedTensor<T>),
    Dense(&'a DenseTensor<T>),
}

/// Result of [`dispatch`].
#[derive(Debug, Clone)]
pub enum DispatchOutput<T: Scalar> {
    Nested(NestedTensor<T>),
    Tensor(DenseTensor<T>),
}

impl<T: Scalar> DispatchOutput<T> {
    pub fn into_nested(self) -> Option<NestedTensor<T>> {
        match self {
            DispatchOutput::Nested(nt) => Some(nt),
            DispatchOutput::Tensor(_) => None,
        }
    }

    pub fn into_tensor(self) -> Option<DenseTensor<T>> {
        match self {
            DispatchOutput::Nested(_) => None,
            DispatchOutput::Tensor(t) => Some(t),
        }
    }
}

/// An out-of-place operation together with its arguments.
pub enum NestedOp<'a, T: Scalar> {
    Conv2d {
        weight: &'a DenseTensor<T>,
        bias: Option<&'a DenseTensor<T>>,
        params: Conv2dParams,
    },
    BatchNorm {
        running_mean: Option<&'a mut DenseTensor<T>>,
        running_var: Option<&'a mut DenseTensor<T>>,
        weight: Option<&'a DenseTensor<T>>,
        bias: Option<&'a DenseTensor<T>>,
        params: BatchNormParams,
    },
    MaxPool2d(MaxPool2dParams),
    Dropout {
        params: DropoutParams,
        rng: &'a mut dyn RngCore,
    },
    Sum,
    Any,
    All,
    LogSoftmax {
        dim: i64,
    },
    Reshape {
        shape: &'a [i64],
    },
    Transpose {
        dim0: i64,
        dim1: i64,
    },
    Softmax {
        dim: i64,
    },
    LayerNorm {
        normalized_shape: &'a [usize],
        weight: Option<&'a DenseTensor<T>>,
        bias: Option<&'a DenseTensor<T>>,
        params: LayerNormParams,
    },
    Matmul {
        other: Operand<'a, T>,
    },
    PinMemory,
    Flatten {
        start_dim: i64,
        end_dim: i64,
    },
    Relu,
}

impl<T: Scalar> NestedOp<'_, T> {
    /// Registered operation name.
    pub fn name(&self) -> &'static str {
        match self {
            NestedOp::Conv2d { .. } => "conv2d",
            NestedOp::BatchNorm { .. } => "batch_norm",
            NestedOp::MaxPool2d(_) => "max_pool2d",
            NestedOp::Dropout { .. } => "dropout",
            NestedOp::Sum => "sum",
            NestedOp::Any => "any",
            NestedOp::All => "all",
            NestedOp::LogSoftmax { .. } => "_log_softmax",
            NestedOp::Reshape { .. } => "reshape",
            NestedOp::Transpose { .. } => "transpose.int",
            NestedOp::Softmax { .. } => "softmax.int",
            NestedOp::LayerNorm { .. } => "layer_norm",
            NestedOp::Matmul { .. } => "matmul",
            NestedOp::PinMemory => "pin_memory",
            NestedOp::Flatten { .. } => "flatten.using_ints",
            NestedOp::Relu => "relu",
        }
    }
}

/// An in-place operation together with its arguments.
pub enum NestedInplaceOp<'a, T: Scalar> {
    Dropout {
        params: DropoutParams,
        rng: &'a mut dyn RngCore,
    },
    Add {
        other: Operand<'a, T>,
        alpha: T,
    },
    Relu,
    /// Write `a @ b` into the receiver.
    MatmulOut {
        a: &'a NestedTensor<T>,
        b: &'a NestedTensor<T>,
    },
}

impl<T: Scalar> NestedInplaceOp<'_, T> {
    /// Registered operation name.
    pub fn name(&self) -> &'static str {
        match self {
            NestedInplaceOp::Dropout { .. } => "dropout_",
            NestedInplaceOp::Add { .. } => "add_.Tensor",
            NestedInplaceOp::Relu => "relu_",
            NestedInplaceOp::MatmulOut { .. } => "matmul.out",
        }
    }
}

/// Run an out-of-place operation on a nested tensor.
pub fn dispatch<T>(op: NestedOp<'_, T>, input: &NestedTensor<T>, policy: DispatchPolicy) -> Result<DispatchOutput<T>, TensorError>
where
    T: RandomUniform + ComplexField,
{
    log::trace!("dispatching {} on a nested tensor of dim {}", op.name(), input.dim());
    let nested = match op {
        NestedOp::Conv2d { weight, bias, params } => conv2d(input, weight, bias, params, policy)?,
        NestedOp::BatchNorm {
            running_mean,
            running_var,
            weight,
            bias,
            params,
        } => batch_norm(input, running_mean, running_var, weight, bias, params, policy)?,
        NestedOp::MaxPool2d(params) => max_pool2d(input, params, policy)?,
        NestedOp::Dropout { params, rng } => dropout(input, params, rng, policy)?,
        NestedOp::Sum => return Ok(DispatchOutput::Tensor(sum(input)?)),
        NestedOp::Any => return Ok(DispatchOutput::Tensor(any(input))),
        NestedOp::All => return Ok(DispatchOutput::Tensor(all(input))),
        NestedOp::LogSoftmax { dim } => log_softmax(input, dim)?,
        NestedOp::Reshape { shape } => reshape(input, shape)?,
        NestedOp::Transpose { dim0, dim1 } => transpose(input, dim0, dim1)?,
        NestedOp::Softmax { dim } => softmax(input, dim)?,
        NestedOp::LayerNorm {
            normalized_shape,
            weight,
            bias,
            params,
        } => layer_norm(input, normalized_shape, weight, bias, params)?,
        NestedOp::Matmul { other } => matmul(input, other)?,
        NestedOp::PinMemory => pin_memory(input),
        NestedOp::Flatten { start_dim, end_dim } => flatten(input, start_dim, end_dim)?,
        NestedOp::Relu => relu(input, policy)?,
    };
    Ok(DispatchOutput::Nested(nested))
}

/// Run an in-place operation on a nested tensor.
///
/// On error the receiver is left unchanged.
pub fn dispatch_inplace<T>(
    op: NestedInplaceOp<'_, T>,
    input: &mut NestedTensor<T>,
    policy: DispatchPolicy,
) -> Result<(), TensorError>
where
    T: RandomUniform + ComplexField,
{
    log::trace!("dispatching {} on a nested tensor of dim {}", op.name(), input.dim());
    match op {
        NestedInplaceOp::Dropout { params, rng } => dropout_(input, params, rng, policy),
        NestedInplaceOp::Add { other, alpha } => add_(input, other, alpha, policy),
        NestedInplaceOp::Relu => {
            relu_(input, policy);
            Ok(())
        }
        NestedInplaceOp::MatmulOut { a, b } => matmul_out(input, a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample() -> NestedTensor<f64> {
        NestedTensor::from_tensors([
            DenseTensor::from_vec(vec![1.0, -2.0, 3.0, -4.0], &[2, 2]).unwrap(),
            DenseTensor::from_vec(vec![-5.0, 6.0], &[1, 2]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_op_names_are_registered() {
        let mut rng = StdRng::seed_from_u64(0);
        let ops: Vec<NestedOp<'_, f64>> = vec![
            NestedOp::Sum,
            NestedOp::Any,
            NestedOp::All,
            NestedOp::Relu,
            NestedOp::PinMemory,
            NestedOp::Softmax { dim: -1 },
            NestedOp::LogSoftmax { dim: -1 },
            NestedOp::Transpose { dim0: 1, dim1: 2 },
            NestedOp::Flatten { start_dim: 1, end_dim: 2 },
            NestedOp::MaxPool2d(MaxPool2dParams::new(2)),
            NestedOp::Dropout {
                params: DropoutParams::default(),
                rng: &mut rng,
            },
        ];
        for op in &ops {
            assert!(REGISTERED_OPS.contains(&op.name()), "{}", op.name());
        }
        assert!(REGISTERED_OPS.contains(&NestedInplaceOp::<f64>::Relu.name()));

        let mut names = REGISTERED_OPS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), REGISTERED_OPS.len());
    }

    #[test]
    fn test_dispatch_routes_outputs() {
        let nt = sample();
        let summed = dispatch(NestedOp::Sum, &nt, DispatchPolicy::default())
            .unwrap()
            .into_tensor()
            .unwrap();
        assert_eq!(summed.to_vec(), vec![-1.0]);

        let relued = dispatch(NestedOp::Relu, &nt, DispatchPolicy::leaf_wise())
            .unwrap()
            .into_nested()
            .unwrap();
        assert_eq!(relued.numel(), 6);
        assert!(
            dispatch(NestedOp::Transpose { dim0: 0, dim1: 1 }, &nt, DispatchPolicy::default()).is_err()
        );
    }

    #[test]
    fn test_dispatch_inplace() {
        let mut nt = sample();
        let ones = DenseTensor::ones(&[2]);
        dispatch_inplace(
            NestedInplaceOp::Add {
                other: Operand::Dense(&ones),
                alpha: 2.0,
            },
            &mut nt,
            DispatchPolicy::default(),
        )
        .unwrap();
        assert_eq!(nt.get(1).unwrap().into_tensor().unwrap().to_vec(), vec![-3.0, 8.0]);

        dispatch_inplace(NestedInplaceOp::Relu, &mut nt, DispatchPolicy::default()).unwrap();
        assert_eq!(nt.get(1).unwrap().into_tensor().unwrap().to_vec(), vec![0.0, 8.0]);
    }

    #[test]
    fn test_policy_default() {
        assert!(DispatchPolicy::default().allow_buffer_fast_path);
        assert!(!DispatchPolicy::leaf_wise().allow_buffer_fast_path);
    }
}
