//! Two-dimensional max pooling.

use crate::error::TensorError;
use crate::operations::conv::window_extent;
use crate::scalar::Scalar;
use crate::tensor::DenseTensor;

/// Hyper-parameters of [`max_pool2d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2dParams {
    pub kernel_size: (usize, usize),
    /// Defaults to `kernel_size` when `None`.
    pub stride: Option<(usize, usize)>,
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub ceil_mode: bool,
}

impl MaxPool2dParams {
    /// Square window with stride equal to the window.
    pub fn new(kernel: usize) -> Self {
        Self {
            kernel_size: (kernel, kernel),
            stride: None,
            padding: (0, 0),
            dilation: (1, 1),
            ceil_mode: false,
        }
    }
}

/// Max pooling over the last two dimensions of a `[C, H, W]` or
/// `[N, C, H, W]` tensor. Padding never wins the max.
///
/// # Errors
///
/// Returns `TensorError::RankMismatch` for other ranks and
/// `TensorError::InvalidArgument` if the window does not fit or padding
/// exceeds half the window.
pub fn max_pool2d<ElT: Scalar>(
    input: &DenseTensor<ElT>,
    params: MaxPool2dParams,
) -> Result<DenseTensor<ElT>, TensorError> {
    if input.ndim() != 3 && input.ndim() != 4 {
        return Err(TensorError::RankMismatch {
            expected: 4,
            actual: input.ndim(),
        });
    }
    let (kh, kw) = params.kernel_size;
    let (sh, sw) = params.stride.unwrap_or(params.kernel_size);
    let (ph, pw) = params.padding;
    let (dh, dw) = params.dilation;
    if kh == 0 || kw == 0 || 2 * ph > kh || 2 * pw > kw {
        return Err(TensorError::invalid_argument(format!(
            "max_pool2d: invalid kernel {:?} with padding {:?}",
            params.kernel_size, params.padding
        )));
    }

    let ndim = input.ndim();
    let (h, w) = (input.shape()[ndim - 2], input.shape()[ndim - 1]);
    let planes: usize = input.shape()[..ndim - 2].iter().product();
    let too_small = || TensorError::invalid_argument("max_pool2d: window larger than padded input");
    let oh = window_extent(h, kh, sh, ph, dh, params.ceil_mode).ok_or_else(too_small)?;
    let ow = window_extent(w, kw, sw, pw, dw, params.ceil_mode).ok_or_else(too_small)?;

    let x = input.to_vec();
    let mut out = Vec::with_capacity(planes * oh * ow);
    for p in 0..planes {
        let plane = &x[p * h * w..(p + 1) * h * w];
        for oy in 0..oh {
            for ox in 0..ow {
                let mut best = ElT::neg_infinity();
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
                        let v = plane[iy as usize * w + ix as usize];
                        if v > best {
                            best = v;
                        }
                    }
                }
                out.push(best);
            }
        }
    }

    let mut shape = input.shape()[..ndim - 2].to_vec();
    shape.extend([oh, ow]);
    DenseTensor::from_vec(out, &shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_pool2d_basic() {
        let input = DenseTensor::from_vec((0..16).map(|x| x as f64).collect(), &[1, 4, 4]).unwrap();
        let out = max_pool2d(&input, MaxPool2dParams::new(2)).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2]);
        assert_eq!(out.data(), &[5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn test_max_pool2d_batched_stride() {
        let input = DenseTensor::from_vec((0..18).map(|x| x as f64).collect(), &[2, 1, 3, 3]).unwrap();
        let params = MaxPool2dParams {
            stride: Some((1, 1)),
            ..MaxPool2dParams::new(2)
        };
        let out = max_pool2d(&input, params).unwrap();
        assert_eq!(out.shape(), &[2, 1, 2, 2]);
        assert_eq!(out.data(), &[4.0, 5.0, 7.0, 8.0, 13.0, 14.0, 16.0, 17.0]);
    }

    #[test]
    fn test_max_pool2d_padding_and_ceil() {
        let input = DenseTensor::from_vec(vec![-1.0, -2.0, -3.0, -4.0, -5.0], &[1, 1, 5]).unwrap();
        let params = MaxPool2dParams {
            kernel_size: (1, 2),
            ceil_mode: true,
            ..MaxPool2dParams::new(1)
        };
        let out = max_pool2d(&input, params).unwrap();
        assert_eq!(out.data(), &[-1.0, -3.0, -5.0]);

        let padded = MaxPool2dParams {
            kernel_size: (1, 3),
            stride: Some((1, 3)),
            padding: (0, 1),
            ..MaxPool2dParams::new(1)
        };
        let out = max_pool2d(&input, padded).unwrap();
        assert_eq!(out.data(), &[-1.0, -3.0]);
    }

    #[test]
    fn test_max_pool2d_errors() {
        let input: DenseTensor<f64> = DenseTensor::ones(&[4, 4]);
        assert!(max_pool2d(&input, MaxPool2dParams::new(2)).is_err());
        let small: DenseTensor<f64> = DenseTensor::ones(&[1, 1, 1]);
        assert!(max_pool2d(&small, MaxPool2dParams::new(2)).is_err());
    }
}
