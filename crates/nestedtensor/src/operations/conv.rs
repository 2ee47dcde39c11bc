//! Two-dimensional convolution.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Hyper-parameters of [`conv2d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub groups: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            groups: 1,
        }
    }
}

/// Output extent of a sliding window along one axis, or `None` if the
/// window does not fit.
pub(crate) fn window_extent(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
    ceil_mode: bool,
) -> Option<usize> {
    let span = dilation * (kernel - 1) + 1;
    let padded = input + 2 * padding;
    if padded < span || stride == 0 {
        return None;
    }
    let room = padded - span;
    let mut out = if ceil_mode {
        room.div_ceil(stride) + 1
    } else {
        room / stride + 1
    };
    // The last window must start inside the input or left padding.
    if ceil_mode && (out - 1) * stride >= input + padding {
        out -= 1;
    }
    Some(out)
}

/// Cross-correlation of an `[N, C_in, H, W]` batch with a
/// `[C_out, C_in / groups, kH, kW]` kernel.
///
/// # Errors
///
/// Returns `TensorError::RankMismatch` for inputs that are not rank 4,
/// `TensorError::IncompatibleShapes` for mismatched channel counts or bias,
/// and `TensorError::InvalidArgument` if the kernel does not fit.
pub fn conv2d<ElT: Scalar>(
    input: &DenseTensor<ElT>,
    weight: &DenseTensor<ElT>,
    bias: Option<&DenseTensor<ElT>>,
    params: Conv2dParams,
) -> Result<DenseTensor<ElT>, TensorError> {
    for t in [input, weight] {
        if t.ndim() != 4 {
            return Err(TensorError::RankMismatch {
                expected: 4,
                actual: t.ndim(),
            });
        }
    }
    let &[n, c_in, h, w] = input.shape() else {
        unreachable!("rank checked above")
    };
    let &[c_out, c_per_group, kh, kw] = weight.shape() else {
        unreachable!("rank checked above")
    };
    let groups = params.groups;
    if groups == 0 || c_in % groups != 0 || c_out % groups != 0 || c_per_group * groups != c_in {
        return Err(TensorError::IncompatibleShapes {
            lhs: input.shape().to_vec(),
            rhs: weight.shape().to_vec(),
        });
    }
    let bias = match bias {
        Some(b) if b.shape() != [c_out] => {
            return Err(TensorError::IncompatibleShapes {
                lhs: vec![c_out],
                rhs: b.shape().to_vec(),
            });
        }
        Some(b) => Some(b.to_vec()),
        None => None,
    };

    let (sh, sw) = params.stride;
    let (ph, pw) = params.padding;
    let (dh, dw) = params.dilation;
    let too_small = || TensorError::invalid_argument("conv2d: kernel larger than padded input");
    if kh == 0 || kw == 0 {
        return Err(too_small());
    }
    let oh = window_extent(h, kh, sh, ph, dh, false).ok_or_else(too_small)?;
    let ow = window_extent(w, kw, sw, pw, dw, false).ok_or_else(too_small)?;

    let x = input.to_vec();
    let k = weight.to_vec();
    let out_per_group = c_out / groups;
    let mut out = vec![ElT::zero(); n * c_out * oh * ow];

    for b in 0..n {
        for co in 0..c_out {
            let g = co / out_per_group;
            let init = bias.as_ref().map_or(ElT::zero(), |bias| bias[co]);
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = init;
                    for ci in 0..c_per_group {
                        let cin = g * c_per_group + ci;
                        for ky in 0..kh {
                            let iy = (oy * sh + ky * dh) as isize - ph as isize;
                            if iy < 0 || iy as usize >= h {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox * sw + kx * dw) as isize - pw as isize;
                                if ix < 0 || ix as usize >= w {
                                    continue;
                                }
                                let xv = x[((b * c_in + cin) * h + iy as usize) * w + ix as usize];
                                let kv = k[((co * c_per_group + ci) * kh + ky) * kw + kx];
                                acc += xv * kv;
                            }
                        }
                    }
                    out[((b * c_out + co) * oh + oy) * ow + ox] = acc;
                }
            }
        }
    }
    DenseTensor::from_vec(out, &[n, c_out, oh, ow])
}
