//! Layer and batch normalization.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

fn check_affine<ElT: Scalar>(
    param: Option<&DenseTensor<ElT>>,
    expected: &[usize],
) -> Result<Option<Vec<ElT>>, TensorError> {
    match param {
        None => Ok(None),
        Some(p) if p.shape() == expected => Ok(Some(p.to_vec())),
        Some(p) => Err(TensorError::IncompatibleShapes {
            lhs: expected.to_vec(),
            rhs: p.shape().to_vec(),
        }),
    }
}

/// Normalize over the trailing `normalized_shape` dimensions.
///
/// `weight` and `bias`, when given, must have shape `normalized_shape`.
///
/// # Errors
///
/// Returns `TensorError::IncompatibleShapes` if the trailing dimensions of
/// `tensor` (or the affine parameters) do not match `normalized_shape`.
pub fn layer_norm<ElT: Scalar>(
    tensor: &DenseTensor<ElT>,
    normalized_shape: &[usize],
    weight: Option<&DenseTensor<ElT>>,
    bias: Option<&DenseTensor<ElT>>,
    eps: f64,
) -> Result<DenseTensor<ElT>, TensorError> {
    let ndim = tensor.ndim();
    if normalized_shape.len() > ndim || tensor.shape()[ndim - normalized_shape.len()..] != *normalized_shape {
        return Err(TensorError::IncompatibleShapes {
            lhs: tensor.shape().to_vec(),
            rhs: normalized_shape.to_vec(),
        });
    }
    let weight = check_affine(weight, normalized_shape)?;
    let bias = check_affine(bias, normalized_shape)?;

    let group: usize = normalized_shape.iter().product();
    let mut data = tensor.to_vec();
    if group == 0 {
        return DenseTensor::from_vec(data, tensor.shape());
    }
    let count = ElT::from_f64(group as f64);
    let eps = ElT::from_f64(eps);

    for chunk in data.chunks_mut(group) {
        let mean = chunk.iter().copied().sum::<ElT>() / count;
        let var = chunk.iter().map(|&x| (x - mean) * (x - mean)).sum::<ElT>() / count;
        let inv_std = ElT::one() / (var + eps).sqrt();
        for (j, x) in chunk.iter_mut().enumerate() {
            let mut y = (*x - mean) * inv_std;
            if let Some(w) = &weight {
                y = y * w[j];
            }
            if let Some(b) = &bias {
                y = y + b[j];
            }
            *x = y;
        }
    }
    DenseTensor::from_vec(data, tensor.shape())
}

/// Options for [`layer_norm`] beyond the normalized shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerNormParams {
    pub eps: f64,
}

impl Default for LayerNormParams {
    fn default() -> Self {
        Self { eps: 1e-5 }
    }
}

/// Options for [`batch_norm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNormParams {
    /// Use batch statistics (and update running statistics) when true.
    pub training: bool,
    pub momentum: f64,
    pub eps: f64,
}

impl Default for BatchNormParams {
    fn default() -> Self {
        Self {
            training: false,
            momentum: 0.1,
            eps: 1e-5,
        }
    }
}

/// Batch normalization of an `[N, C, ...]` input over every axis but `C`.
///
/// In training mode batch statistics are used and, when running buffers are
/// supplied, they are updated as
/// `running = (1 - momentum) * running + momentum * batch_stat`
/// (with the unbiased variance). In evaluation mode the running buffers are
/// required.
///
/// # Errors
///
/// Returns `TensorError::RankMismatch` for inputs of rank < 2,
/// `TensorError::IncompatibleShapes` for per-channel parameters of the wrong
/// shape, and `TensorError::InvalidArgument` when evaluation mode lacks
/// running statistics.
pub fn batch_norm<ElT: Scalar>(
    input: &DenseTensor<ElT>,
    running_mean: Option<&mut DenseTensor<ElT>>,
    running_var: Option<&mut DenseTensor<ElT>>,
    weight: Option<&DenseTensor<ElT>>,
    bias: Option<&DenseTensor<ElT>>,
    params: BatchNormParams,
) -> Result<DenseTensor<ElT>, TensorError> {
    if input.ndim() < 2 {
        return Err(TensorError::RankMismatch {
            expected: 2,
            actual: input.ndim(),
        });
    }
    let shape = input.shape();
    let (n, c) = (shape[0], shape[1]);
    let spatial: usize = shape[2..].iter().product();
    let channel_shape = [c];
    let weight = check_affine(weight, &channel_shape)?;
    let bias = check_affine(bias, &channel_shape)?;
    for stat in [running_mean.as_deref(), running_var.as_deref()].into_iter().flatten() {
        if stat.shape() != channel_shape {
            return Err(TensorError::IncompatibleShapes {
                lhs: channel_shape.to_vec(),
                rhs: stat.shape().to_vec(),
            });
        }
    }

    let mut data = input.to_vec();
    let at = |b: usize, ch: usize, s: usize| (b * c + ch) * spatial + s;
    let count = n * spatial;

    let (mean, var): (Vec<ElT>, Vec<ElT>) = if params.training {
        if count == 0 {
            return Err(TensorError::invalid_argument(
                "batch_norm: training mode needs at least one value per channel",
            ));
        }
        let denom = ElT::from_f64(count as f64);
        let mut means = Vec::with_capacity(c);
        let mut vars = Vec::with_capacity(c);
        for ch in 0..c {
            let values = (0..n).flat_map(|b| (0..spatial).map(move |s| (b, s)));
            let mean = values.clone().map(|(b, s)| data[at(b, ch, s)]).sum::<ElT>() / denom;
            let sq = values
                .map(|(b, s)| (data[at(b, ch, s)] - mean) * (data[at(b, ch, s)] - mean))
                .sum::<ElT>();
            means.push(mean);
            vars.push(sq / denom);
        }

        let momentum = ElT::from_f64(params.momentum);
        let keep = ElT::one() - momentum;
        if let Some(rm) = running_mean {
            for (r, &m) in rm.data_mut().iter_mut().zip(&means) {
                *r = keep * *r + momentum * m;
            }
        }
        if let Some(rv) = running_var {
            let correction = if count > 1 {
                ElT::from_f64(count as f64 / (count - 1) as f64)
            } else {
                ElT::one()
            };
            for (r, &v) in rv.data_mut().iter_mut().zip(&vars) {
                *r = keep * *r + momentum * v * correction;
            }
        }
        (means, vars)
    } else {
        match (running_mean, running_var) {
            (Some(rm), Some(rv)) => (rm.to_vec(), rv.to_vec()),
            _ => {
                return Err(TensorError::invalid_argument(
                    "batch_norm: evaluation mode requires running_mean and running_var",
                ));
            }
        }
    };

    let eps = ElT::from_f64(params.eps);
    for b in 0..n {
        for ch in 0..c {
            let inv_std = ElT::one() / (var[ch] + eps).sqrt();
            let w = weight.as_ref().map_or(ElT::one(), |w| w[ch]);
            let shift = bias.as_ref().map_or(ElT::zero(), |b| b[ch]);
            for s in 0..spatial {
                let x = &mut data[at(b, ch, s)];
                *x = (*x - mean[ch]) * inv_std * w + shift;
            }
        }
    }
    DenseTensor::from_vec(data, shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let t = DenseTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0], &[2, 4]).unwrap();
        let y = layer_norm(&t, &[4], None, None, 1e-5).unwrap();
        for row in y.data().chunks(4) {
            let mean: f64 = row.iter().sum::<f64>() / 4.0;
            let var: f64 = row.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / 4.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-10);
            assert_relative_eq!(var, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_layer_norm_affine() {
        let t = DenseTensor::from_vec(vec![1.0, 3.0], &[1, 2]).unwrap();
        let w = DenseTensor::from_vec(vec![2.0, 2.0], &[2]).unwrap();
        let b = DenseTensor::from_vec(vec![1.0, 1.0], &[2]).unwrap();
        let y = layer_norm(&t, &[2], Some(&w), Some(&b), 0.0).unwrap();
        assert_relative_eq!(y.data()[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(y.data()[1], 3.0, epsilon = 1e-12);
        assert!(layer_norm(&t, &[3], None, None, 1e-5).is_err());
    }

    #[test]
    fn test_batch_norm_eval() {
        let x = DenseTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2]).unwrap();
        let mut rm = DenseTensor::from_vec(vec![1.0, 3.0], &[2]).unwrap();
        let mut rv = DenseTensor::from_vec(vec![4.0, 1.0], &[2]).unwrap();
        let params = BatchNormParams {
            eps: 0.0,
            ..Default::default()
        };
        let y = batch_norm(&x, Some(&mut rm), Some(&mut rv), None, None, params).unwrap();
        assert_relative_eq!(y.data()[0], 0.0);
        assert_relative_eq!(y.data()[1], 0.5);
        assert_relative_eq!(y.data()[2], 0.0);
        assert_relative_eq!(y.data()[3], 1.0);

        assert!(batch_norm(&x, None, None, None, None, params).is_err());
    }

    #[test]
    fn test_batch_norm_training_updates_running_stats() {
        let x = DenseTensor::from_vec(vec![1.0, 3.0], &[2, 1]).unwrap();
        let mut rm = DenseTensor::from_vec(vec![0.0], &[1]).unwrap();
        let mut rv = DenseTensor::from_vec(vec![1.0], &[1]).unwrap();
        let params = BatchNormParams {
            training: true,
            momentum: 0.5,
            eps: 0.0,
        };
        let y = batch_norm(&x, Some(&mut rm), Some(&mut rv), None, None, params).unwrap();
        assert_relative_eq!(y.data()[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(y.data()[1], 1.0, epsilon = 1e-12);
        // mean 2, biased var 1, unbiased var 2
        assert_relative_eq!(rm.data()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(rv.data()[0], 1.5, epsilon = 1e-12);
    }
}
