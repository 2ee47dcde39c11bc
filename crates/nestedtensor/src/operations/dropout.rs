//! Inverted dropout.

use rand::Rng;

use crate::error::TensorError;
use crate::random::RandomUniform;
use crate::tensor::DenseTensor;

/// Options for [`dropout`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropoutParams {
    /// Probability of zeroing an element.
    pub p: f64,
    /// Dropout is the identity when false.
    pub train: bool,
}

impl Default for DropoutParams {
    fn default() -> Self {
        Self { p: 0.5, train: true }
    }
}

impl DropoutParams {
    pub(crate) fn validate(&self) -> Result<(), TensorError> {
        if !(0.0..=1.0).contains(&self.p) {
            return Err(TensorError::invalid_argument(format!(
                "dropout probability has to be between 0 and 1, but got {}",
                self.p
            )));
        }
        Ok(())
    }

    fn is_identity(&self) -> bool {
        !self.train || self.p == 0.0
    }
}

/// Zero each element with probability `p`, scaling survivors by `1 / (1 - p)`.
///
/// Elements are visited in row-major order, drawing one uniform sample each,
/// so equal RNG states produce equal masks.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `p` is outside `[0, 1]`.
pub fn dropout<ElT: RandomUniform, R: Rng + ?Sized>(
    tensor: &DenseTensor<ElT>,
    params: DropoutParams,
    rng: &mut R,
) -> Result<DenseTensor<ElT>, TensorError> {
    let mut out = tensor.contiguous();
    dropout_inplace(&mut out, params, rng)?;
    Ok(out)
}

/// In-place variant of [`dropout`].
pub fn dropout_inplace<ElT: RandomUniform, R: Rng + ?Sized>(
    tensor: &mut DenseTensor<ElT>,
    params: DropoutParams,
    rng: &mut R,
) -> Result<(), TensorError> {
    dropout_slice(tensor.data_mut(), params, rng)
}

/// Dropout over a raw slice.
pub(crate) fn dropout_slice<ElT: RandomUniform, R: Rng + ?Sized>(
    data: &mut [ElT],
    params: DropoutParams,
    rng: &mut R,
) -> Result<(), TensorError> {
    params.validate()?;
    if params.is_identity() {
        return Ok(());
    }
    let keep = 1.0 - params.p;
    let scale = if keep > 0.0 {
        ElT::from_f64(1.0 / keep)
    } else {
        ElT::zero()
    };
    for x in data.iter_mut() {
        let u = ElT::sample_uniform(rng).to_f64();
        *x = if u < keep { *x * scale } else { ElT::zero() };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_dropout_eval_is_identity() {
        let t = DenseTensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let params = DropoutParams { p: 0.5, train: false };
        assert_eq!(dropout(&t, params, &mut rng).unwrap(), t);
    }

    #[test]
    fn test_dropout_values_are_zero_or_scaled() {
        let t: DenseTensor<f64> = DenseTensor::ones(&[1000]);
        let mut rng = StdRng::seed_from_u64(1);
        let out = dropout(&t, DropoutParams { p: 0.25, train: true }, &mut rng).unwrap();
        let kept = out.data().iter().filter(|&&x| x != 0.0).count();
        assert!(out.data().iter().all(|&x| x == 0.0 || (x - 4.0 / 3.0).abs() < 1e-12));
        assert!((650..850).contains(&kept), "kept {kept}");
        // Input untouched.
        assert!(t.data().iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_dropout_seeded_reproducible() {
        let t: DenseTensor<f64> = DenseTensor::ones(&[16]);
        let params = DropoutParams::default();
        let a = dropout(&t, params, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = dropout(&t, params, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dropout_edge_probabilities() {
        let t: DenseTensor<f64> = DenseTensor::ones(&[8]);
        let mut rng = StdRng::seed_from_u64(3);
        let all_dropped = dropout(&t, DropoutParams { p: 1.0, train: true }, &mut rng).unwrap();
        assert!(all_dropped.data().iter().all(|&x| x == 0.0));
        assert!(dropout(&t, DropoutParams { p: 1.5, train: true }, &mut rng).is_err());
    }
}
