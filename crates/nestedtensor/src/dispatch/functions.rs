//! Nested implementations of the registered operations.

use faer_traits::ComplexField;
use rand::Rng;

use super::{DispatchPolicy, Operand};
use crate::error::TensorError;
use crate::nested::{self, NestedTensor};
use crate::operations::{
    self as ops, BatchNormParams, Conv2dParams, DropoutParams, LayerNormParams, MaxPool2dParams,
};
use crate::random::RandomUniform;
use crate::scalar::Scalar;
use crate::tensor::{DenseTensor, infer_shape};

fn buffer_fast_path<T: Scalar>(input: &NestedTensor<T>, policy: DispatchPolicy) -> Option<&DenseTensor<T>> {
    if policy.allow_buffer_fast_path && input.is_contiguous() {
        input.buffer()
    } else {
        None
    }
}

/// Leaf dimension for a (possibly negative) dimension of `input`.
fn leaf_dim<T: Scalar>(input: &NestedTensor<T>, dim: i64) -> Result<usize, TensorError> {
    let dim = input.wrap_dim(dim)?;
    let nested_dim = input.nested_dim();
    if dim < nested_dim {
        return Err(TensorError::NestedDimensionUnsupported { dim, nested_dim });
    }
    Ok(dim - nested_dim)
}

/// Run `kernel` once with every leaf stacked along the batch dimension.
///
/// Returns `Ok(None)` when the input is ragged, has no leaves, or the policy
/// forbids it; the caller then goes leaf-wise.
fn whole_batch<T, F>(
    input: &NestedTensor<T>,
    policy: DispatchPolicy,
    op: &str,
    kernel: F,
) -> Result<Option<NestedTensor<T>>, TensorError>
where
    T: Scalar,
    F: FnOnce(&DenseTensor<T>) -> Result<DenseTensor<T>, TensorError>,
{
    if !policy.allow_buffer_fast_path || input.structure().leaf_count() == 0 || !input.is_tensor_shape() {
        return Ok(None);
    }
    let nested_dim = input.nested_dim();
    let sizes: Vec<usize> = input.sizes().into_iter().flatten().collect();
    let (outer, inner) = sizes.split_at(nested_dim);
    let mut batched = Vec::with_capacity(inner.len() + 1);
    batched.push(outer.iter().product::<usize>());
    batched.extend_from_slice(inner);
    log::debug!("{op}: running once over a batch of {} items", batched[0]);

    let out = kernel(&input.to_dense()?.reshape(&batched)?)?;
    let mut shape = outer.to_vec();
    shape.extend_from_slice(&out.shape()[1..]);
    let out = out.reshape(&shape)?;
    NestedTensor::from_tensor(&out)?
        .to_nested_tensor(Some(nested_dim as i64 - 1))
        .map(Some)
}

/// Convolution of every `[C, H, W]` item.
///
/// # Errors
///
/// Propagates the dense kernel's errors for leaves of the wrong rank or
/// channel count.
pub fn conv2d<T: Scalar>(
    input: &NestedTensor<T>,
    weight: &DenseTensor<T>,
    bias: Option<&DenseTensor<T>>,
    params: Conv2dParams,
    policy: DispatchPolicy,
) -> Result<NestedTensor<T>, TensorError> {
    if let Some(out) = whole_batch(input, policy, "conv2d", |batch| ops::conv2d(batch, weight, bias, params))? {
        return Ok(out);
    }
    input.try_map_leaves(|t| ops::conv2d(&t.unsqueeze(0)?, weight, bias, params)?.squeeze(0))
}

/// Batch normalization of every `[C, ...]` item.
///
/// In training mode every item is normalized with its own statistics and
/// updates the running statistics in traversal order.
pub fn batch_norm<T: Scalar>(
    input: &NestedTensor<T>,
    mut running_mean: Option<&mut DenseTensor<T>>,
    mut running_var: Option<&mut DenseTensor<T>>,
    weight: Option<&DenseTensor<T>>,
    bias: Option<&DenseTensor<T>>,
    params: BatchNormParams,
    policy: DispatchPolicy,
) -> Result<NestedTensor<T>, TensorError> {
    if !params.training {
        let batched = whole_batch(input, policy, "batch_norm", |batch| {
            ops::batch_norm(
                batch,
                running_mean.as_deref_mut(),
                running_var.as_deref_mut(),
                weight,
                bias,
                params,
            )
        })?;
        if let Some(out) = batched {
            return Ok(out);
        }
    }
    input.try_map_leaves(|t| {
        ops::batch_norm(
            &t.unsqueeze(0)?,
            running_mean.as_deref_mut(),
            running_var.as_deref_mut(),
            weight,
            bias,
            params,
        )?
        .squeeze(0)
    })
}

pub fn max_pool2d<T: Scalar>(
    input: &NestedTensor<T>,
    params: MaxPool2dParams,
    policy: DispatchPolicy,
) -> Result<NestedTensor<T>, TensorError> {
    if let Some(out) = whole_batch(input, policy, "max_pool2d", |batch| ops::max_pool2d(batch, params))? {
        return Ok(out);
    }
    input.try_map_leaves(|t| ops::max_pool2d(&t.unsqueeze(0)?, params)?.squeeze(0))
}

/// Dropout over every element.
///
/// Elements are visited in traversal order on both paths, so a given RNG
/// state yields the same mask whether or not the buffer is used.
pub fn dropout<T: RandomUniform, R: Rng + ?Sized>(
    input: &NestedTensor<T>,
    params: DropoutParams,
    rng: &mut R,
    policy: DispatchPolicy,
) -> Result<NestedTensor<T>, TensorError> {
    params.validate()?;
    if let Some(buffer) = buffer_fast_path(input, policy) {
        log::debug!("dropout: using the contiguous buffer");
        let out = ops::dropout(buffer, params, rng)?;
        return NestedTensor::from_buffer(out, input.nested_size().clone());
    }
    input.try_map_leaves(|t| ops::dropout(t, params, &mut *rng))
}

pub fn dropout_<T: RandomUniform, R: Rng + ?Sized>(
    input: &mut NestedTensor<T>,
    params: DropoutParams,
    rng: &mut R,
    policy: DispatchPolicy,
) -> Result<(), TensorError> {
    params.validate()?;
    if buffer_fast_path(input, policy).is_some() {
        let mut outcome = Ok(());
        if input.update_buffer(|data, _| outcome = ops::dropout_slice(data, params, &mut *rng)) {
            log::debug!("dropout_: updated the contiguous buffer");
            return outcome;
        }
    }
    for leaf in input.unbuffered_leaves_mut() {
        ops::dropout_inplace(leaf, params, &mut *rng)?;
    }
    Ok(())
}

/// Sum of all elements as a 0-dimensional tensor, or an empty `[0]` tensor
/// when there are no leaves.
pub fn sum<T: Scalar>(input: &NestedTensor<T>) -> Result<DenseTensor<T>, TensorError> {
    let partial = nested::flatten(&nested::map(ops::sum_all, input.structure()));
    if partial.is_empty() {
        return Ok(DenseTensor::zeros(&[0]));
    }
    Ok(ops::sum_all(&DenseTensor::stack(&partial)?))
}

/// Whether every element is non-zero, as a 0-dimensional `1` or `0`.
///
/// An input without elements gives an empty `[0]` tensor.
pub fn all<T: Scalar>(input: &NestedTensor<T>) -> DenseTensor<T> {
    if input.numel() == 0 {
        return DenseTensor::zeros(&[0]);
    }
    let per_leaf = nested::flatten(&nested::map(ops::all, input.structure()));
    DenseTensor::scalar(if per_leaf.into_iter().all(|b| b) { T::one() } else { T::zero() })
}

/// Whether any element is non-zero. Same conventions as [`all`].
pub fn any<T: Scalar>(input: &NestedTensor<T>) -> DenseTensor<T> {
    if input.numel() == 0 {
        return DenseTensor::zeros(&[0]);
    }
    let per_leaf = nested::flatten(&nested::map(ops::any, input.structure()));
    DenseTensor::scalar(if per_leaf.into_iter().any(|b| b) { T::one() } else { T::zero() })
}

pub fn log_softmax<T: Scalar>(input: &NestedTensor<T>, dim: i64) -> Result<NestedTensor<T>, TensorError> {
    let dim = leaf_dim(input, dim)?;
    input.try_map_leaves(|t| ops::log_softmax(t, dim))
}

pub fn softmax<T: Scalar>(input: &NestedTensor<T>, dim: i64) -> Result<NestedTensor<T>, TensorError> {
    let dim = leaf_dim(input, dim)?;
    input.try_map_leaves(|t| ops::softmax(t, dim))
}

/// Reshape every item.
///
/// `shape` spans all dimensions; its nested entries must be `-1` and the
/// remaining entries (at most one `-1`) give each leaf's new shape.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `shape` covers only nested
/// dimensions and `TensorError::IrregularDimension` if a nested dimension is
/// given an explicit size.
pub fn reshape<T: Scalar>(input: &NestedTensor<T>, shape: &[i64]) -> Result<NestedTensor<T>, TensorError> {
    let nested_dim = input.nested_dim();
    if shape.len() <= nested_dim {
        return Err(TensorError::invalid_argument(format!(
            "reshape to {shape:?} cannot be exclusive to the {nested_dim} nested dimensions"
        )));
    }
    if let Some(dim) = shape[..nested_dim].iter().position(|&s| s >= 0) {
        return Err(TensorError::IrregularDimension { dim });
    }
    let target = &shape[nested_dim..];
    if let Some(buffer) = input.buffer().filter(|_| input.is_contiguous()) {
        let nested_size = nested::try_map(|s: &Vec<usize>| infer_shape(target, s.iter().product()), input.nested_size())?;
        log::debug!("reshape: reusing the contiguous buffer");
        return NestedTensor::from_buffer(buffer.clone(), nested_size);
    }
    input.try_map_leaves(|t| t.reshape_inferred(target))
}

/// Swap two leaf dimensions. Equal dimensions return the input unchanged.
pub fn transpose<T: Scalar>(input: &NestedTensor<T>, dim0: i64, dim1: i64) -> Result<NestedTensor<T>, TensorError> {
    let (d0, d1) = (input.wrap_dim(dim0)?, input.wrap_dim(dim1)?);
    if d0 == d1 {
        return Ok(input.clone());
    }
    let (d0, d1) = (leaf_dim(input, dim0)?, leaf_dim(input, dim1)?);
    input.try_map_leaves(|t| t.transpose(d0, d1))
}

/// Layer normalization over the last dimension of every item.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` unless `normalized_shape` has
/// exactly one entry, and `TensorError::IrregularDimension` if the last
/// dimension is ragged.
pub fn layer_norm<T: Scalar>(
    input: &NestedTensor<T>,
    normalized_shape: &[usize],
    weight: Option<&DenseTensor<T>>,
    bias: Option<&DenseTensor<T>>,
    params: LayerNormParams,
) -> Result<NestedTensor<T>, TensorError> {
    if normalized_shape.len() != 1 {
        return Err(TensorError::invalid_argument(format!(
            "layer_norm normalizes exactly one dimension, got {normalized_shape:?}"
        )));
    }
    let last = leaf_dim(input, -1)?;
    if input.size(-1)?.is_none() {
        return Err(TensorError::IrregularDimension {
            dim: input.nested_dim() + last,
        });
    }
    input.try_map_leaves(|t| ops::layer_norm(t, normalized_shape, weight, bias, params.eps))
}

/// Matrix product of every item with the paired item of a nested operand,
/// or with a single dense operand.
pub fn matmul<T: Scalar + ComplexField>(
    input: &NestedTensor<T>,
    other: Operand<'_, T>,
) -> Result<NestedTensor<T>, TensorError> {
    match other {
        Operand::Nested(other) => NestedTensor::new(nested::try_map2(ops::matmul, input.structure(), other.structure())?),
        Operand::Dense(other) => input.try_map_leaves(|t| ops::matmul(t, other)),
    }
}

/// Write `a @ b` into `result`, leaving it untouched on error.
pub fn matmul_out<T: Scalar + ComplexField>(
    result: &mut NestedTensor<T>,
    a: &NestedTensor<T>,
    b: &NestedTensor<T>,
) -> Result<(), TensorError> {
    result.structure().check_congruent(a.structure())?;
    let product = matmul(a, Operand::Nested(b))?;
    result.copy_(&product)
}

pub fn pin_memory<T: Scalar>(input: &NestedTensor<T>) -> NestedTensor<T> {
    input.pin_memory()
}

/// Merge leaf dimensions `start_dim..=end_dim`.
///
/// # Errors
///
/// Returns `TensorError::NestedDimensionUnsupported` if either bound names a
/// nested dimension.
pub fn flatten<T: Scalar>(input: &NestedTensor<T>, start_dim: i64, end_dim: i64) -> Result<NestedTensor<T>, TensorError> {
    let start = leaf_dim(input, start_dim)?;
    let end = leaf_dim(input, end_dim)?;
    if start > end {
        return Err(TensorError::invalid_argument(format!(
            "flatten start_dim {start_dim} comes after end_dim {end_dim}"
        )));
    }
    if let Some(buffer) = input.buffer().filter(|_| input.is_contiguous()) {
        let nested_size = nested::map(|s: &Vec<usize>| ops::flattened_shape(s, start, end), input.nested_size());
        return NestedTensor::from_buffer(buffer.clone(), nested_size);
    }
    input.try_map_leaves(|t| ops::flatten(t, start, end))
}

pub fn relu<T: Scalar>(input: &NestedTensor<T>, policy: DispatchPolicy) -> Result<NestedTensor<T>, TensorError> {
    if let Some(buffer) = buffer_fast_path(input, policy) {
        log::debug!("relu: using the contiguous buffer");
        return NestedTensor::from_buffer(ops::relu(buffer), input.nested_size().clone());
    }
    NestedTensor::new(nested::map(ops::relu, input.structure()))
}

pub fn relu_<T: Scalar>(input: &mut NestedTensor<T>, policy: DispatchPolicy) {
    if buffer_fast_path(input, policy).is_some() && input.update_buffer(|data, _| ops::relu_slice(data)) {
        log::debug!("relu_: updated the contiguous buffer");
        return;
    }
    for leaf in input.unbuffered_leaves_mut() {
        ops::relu_inplace(leaf);
    }
}

/// `input += alpha * other`, broadcasting `other` into every item.
///
/// # Errors
///
/// Returns `TensorError::StructureMismatch` for a nested operand of another
/// structure and `TensorError::IncompatibleShapes` if some item cannot take
/// the broadcast. `input` is unchanged on error.
pub fn add_<T: Scalar>(
    input: &mut NestedTensor<T>,
    other: Operand<'_, T>,
    alpha: T,
    policy: DispatchPolicy,
) -> Result<(), TensorError> {
    let fast = buffer_fast_path(input, policy).is_some();
    match other {
        Operand::Nested(other) => {
            input.structure().check_congruent(other.structure())?;
            for (dest, src) in input.nested_size().iter().zip(other.nested_size().iter()) {
                ops::check_broadcast_to(dest, src)?;
            }
            if fast && input.nested_size() == other.nested_size() {
                let values: Vec<T> = other.structure().iter().flat_map(DenseTensor::to_vec).collect();
                let updated = input.update_buffer(|data, _| {
                    for (x, &v) in data.iter_mut().zip(&values) {
                        *x += alpha * v;
                    }
                });
                if updated {
                    log::debug!("add_: updated the contiguous buffer");
                    return Ok(());
                }
            }
            for (dest, src) in input.unbuffered_leaves_mut().into_iter().zip(other.structure().iter()) {
                ops::add_scaled_inplace(dest, src, alpha)?;
            }
        }
        Operand::Dense(other) => {
            for shape in input.nested_size().iter() {
                ops::check_broadcast_to(shape, other.shape())?;
            }
            if fast {
                let mut outcome = Ok(());
                let updated = input.update_buffer(|data, sizes| {
                    outcome = nested::leaf_ranges(sizes)
                        .into_iter()
                        .try_for_each(|(range, shape)| ops::add_scaled_slice(&mut data[range], shape, other, alpha));
                });
                if updated {
                    log::debug!("add_: updated the contiguous buffer");
                    return outcome;
                }
            }
            for leaf in input.unbuffered_leaves_mut() {
                ops::add_scaled_inplace(leaf, other, alpha)?;
            }
        }
    }
    Ok(())
}
