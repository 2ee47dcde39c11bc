//! Random tensor construction and the sampling traits behind dropout.

use rand::Rng;
use rand::distr::StandardUniform;
use rand_distr::StandardNormal;

use crate::error::TensorError;
use crate::nested::{NestedTensor, SizeNode};
use crate::scalar::Scalar;
use crate::storage::Dense;
use crate::tensor::Tensor;

/// Trait for types that can be randomly sampled from a uniform distribution.
pub trait RandomUniform: Scalar {
    /// Sample a random value from the uniform distribution [0, 1).
    fn sample_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl RandomUniform for f64 {
    fn sample_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.sample(StandardUniform)
    }
}

impl RandomUniform for f32 {
    fn sample_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.sample(StandardUniform)
    }
}

/// Trait for types that can be randomly sampled from a normal distribution.
pub trait RandomNormal: Scalar {
    /// Sample a random value from the standard normal distribution.
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl RandomNormal for f64 {
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.sample(StandardNormal)
    }
}

impl RandomNormal for f32 {
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.sample(StandardNormal)
    }
}

impl<ElT: RandomUniform> Tensor<ElT, Dense<ElT>> {
    /// Create a tensor with uniform random values in [0, 1) using a specific RNG.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::Tensor;
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let t1: Tensor<f64> = Tensor::random_with_rng(&[2, 3], &mut rng);
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let t2: Tensor<f64> = Tensor::random_with_rng(&[2, 3], &mut rng);
    /// assert_eq!(t1.data(), t2.data());
    /// ```
    pub fn random_with_rng<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let len: usize = shape.iter().product();
        let data: Vec<ElT> = (0..len).map(|_| ElT::sample_uniform(rng)).collect();
        Self::from_vec(data, shape).expect("shape and data length should match")
    }
}

impl<ElT: RandomNormal> Tensor<ElT, Dense<ElT>> {
    /// Create a tensor with standard normal random values using a specific RNG.
    pub fn randn_with_rng<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let len: usize = shape.iter().product();
        let data: Vec<ElT> = (0..len).map(|_| ElT::sample_normal(rng)).collect();
        Self::from_vec(data, shape).expect("shape and data length should match")
    }
}

fn buffer_len(nested_size: &SizeNode) -> usize {
    nested_size.iter().map(|shape| shape.iter().product::<usize>()).sum()
}

impl<ElT: RandomUniform> NestedTensor<ElT> {
    /// Buffered nested tensor of uniform values in [0, 1), one leaf per
    /// shape in `nested_size`. Leaves are filled in traversal order.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of [`NestedTensor::from_buffer`].
    pub fn random_with_rng<R: Rng + ?Sized>(nested_size: SizeNode, rng: &mut R) -> Result<Self, TensorError> {
        let buffer = Tensor::random_with_rng(&[buffer_len(&nested_size)], rng);
        NestedTensor::from_buffer(buffer, nested_size)
    }
}

impl<ElT: RandomNormal> NestedTensor<ElT> {
    /// Standard normal counterpart of [`NestedTensor::random_with_rng`].
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::{NestedNode, NestedTensor};
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let mut rng = StdRng::seed_from_u64(0);
    /// let sizes = NestedNode::from_leaves([vec![3, 50, 60], vec![3, 12, 12]]);
    /// let images = NestedTensor::<f32>::randn_with_rng(sizes, &mut rng).unwrap();
    /// assert!(images.is_contiguous());
    /// assert_eq!(images.sizes(), vec![Some(2), Some(3), None, None]);
    /// ```
    pub fn randn_with_rng<R: Rng + ?Sized>(nested_size: SizeNode, rng: &mut R) -> Result<Self, TensorError> {
        let buffer = Tensor::randn_with_rng(&[buffer_len(&nested_size)], rng);
        NestedTensor::from_buffer(buffer, nested_size)
    }
}
