//! Stride computation utilities.
//!
//! Uses row-major (C) order: the last dimension varies fastest, so stacking
//! equally shaped tensors along a new leading dimension is the same as
//! concatenating their element buffers.

/// Compute row-major strides from shape.
///
/// For shape [d0, d1, d2], returns strides [d1*d2, d2, 1].
///
/// # Examples
///
/// ```
/// use nestedtensor::strides::compute_strides;
///
/// assert_eq!(compute_strides(&[3, 4, 5]), vec![20, 5, 1]);
/// assert_eq!(compute_strides(&[2, 3]), vec![3, 1]);
/// assert_eq!(compute_strides(&[5]), vec![1]);
/// assert_eq!(compute_strides(&[]), Vec::<usize>::new());
/// ```
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1;

    for (slot, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
        *slot = stride;
        stride *= dim.max(1);
    }

    strides
}

/// Convert cartesian indices to a linear storage offset.
#[inline]
pub fn cartesian_to_linear(indices: &[usize], strides: &[usize]) -> usize {
    indices
        .iter()
        .zip(strides.iter())
        .map(|(&idx, &stride)| idx * stride)
        .sum()
}

/// Convert a row-major linear index to cartesian indices.
pub fn linear_to_cartesian(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];

    for (slot, &dim) in indices.iter_mut().zip(shape.iter()).rev() {
        *slot = linear % dim;
        linear /= dim;
    }

    indices
}

/// Whether `strides` describe a dense row-major layout of `shape`.
///
/// Dimensions of extent 1 place no constraint on their stride.
pub fn is_contiguous(shape: &[usize], strides: &[usize]) -> bool {
    if shape.contains(&0) {
        return true;
    }
    let mut expected = 1;
    for (&dim, &stride) in shape.iter().zip(strides.iter()).rev() {
        if dim == 1 {
            continue;
        }
        if stride != expected {
            return false;
        }
        expected *= dim;
    }
    true
}

/// Storage offsets of every element of a strided view, in row-major logical order.
pub fn storage_offsets(shape: &[usize], strides: &[usize], offset: usize) -> Vec<usize> {
    let total: usize = shape.iter().product();
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return out;
    }

    let mut index = vec![0usize; shape.len()];
    let mut position = offset;
    for _ in 0..total {
        out.push(position);
        for d in (0..shape.len()).rev() {
            index[d] += 1;
            position += strides[d];
            if index[d] < shape[d] {
                break;
            }
            position -= strides[d] * shape[d];
            index[d] = 0;
        }
    }
    out
}

/// Wrap a possibly negative dimension index into `0..ndim`.
pub fn wrap_dim(dim: i64, ndim: usize) -> Option<usize> {
    let n = ndim as i64;
    let wrapped = if dim < 0 { dim + n } else { dim };
    if (0..n).contains(&wrapped) {
        Some(wrapped as usize)
    } else {
        None
    }
}
