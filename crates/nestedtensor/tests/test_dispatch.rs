//! Tests for routing operations through the dispatch layer.
//!
//! Covers:
//! - fast path against leaf-wise fallback on tensor-shaped inputs, one and
//!   two levels deep
//! - empty batches and nested-dimension rejections
//! - in-place operations leaving the receiver untouched on error

use approx::assert_relative_eq;
use nestedtensor::dispatch::{self, REGISTERED_OPS};
use nestedtensor::operations::{BatchNormParams, Conv2dParams, DropoutParams, LayerNormParams, MaxPool2dParams};
use nestedtensor::{
    DenseTensor, DispatchOutput, DispatchPolicy, NestedInplaceOp, NestedNode, NestedOp, NestedTensor, Operand,
    Tensor, TensorError,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn random_images(rng: &mut StdRng, n: usize) -> NestedTensor<f64> {
    NestedTensor::from_tensors((0..n).map(|_| Tensor::random_with_rng(&[2, 4, 4], rng))).unwrap()
}

fn nested(output: DispatchOutput<f64>) -> NestedTensor<f64> {
    output.into_nested().unwrap()
}

fn assert_close(a: &NestedTensor<f64>, b: &NestedTensor<f64>) {
    assert_eq!(a.nested_size(), b.nested_size());
    for (x, y) in a.structure().iter().zip(b.structure().iter()) {
        for (u, v) in x.to_vec().into_iter().zip(y.to_vec()) {
            assert_relative_eq!(u, v, epsilon = 1e-12, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_max_pool2d_fast_path_matches_leaf_wise() {
    let mut rng = StdRng::seed_from_u64(1);
    for input in [random_images(&mut rng, 3), random_images(&mut rng, 2).to_contiguous()] {
        let params = MaxPool2dParams::new(2);
        let fast = nested(dispatch::dispatch(NestedOp::MaxPool2d(params), &input, DispatchPolicy::default()).unwrap());
        let slow = nested(dispatch::dispatch(NestedOp::MaxPool2d(params), &input, DispatchPolicy::leaf_wise()).unwrap());
        assert_close(&fast, &slow);
        assert_eq!(fast.sizes(), vec![Some(input.len()), Some(2), Some(2), Some(2)]);
    }
}

#[test]
fn test_conv2d_and_batch_norm_fast_paths_match_leaf_wise() {
    let mut rng = StdRng::seed_from_u64(2);
    let input = random_images(&mut rng, 4);
    let weight: DenseTensor<f64> = Tensor::random_with_rng(&[3, 2, 3, 3], &mut rng);
    let bias: DenseTensor<f64> = Tensor::random_with_rng(&[3], &mut rng);
    let params = Conv2dParams {
        padding: (1, 1),
        ..Conv2dParams::default()
    };
    let run = |policy| {
        nested(
            dispatch::dispatch(
                NestedOp::Conv2d {
                    weight: &weight,
                    bias: Some(&bias),
                    params,
                },
                &input,
                policy,
            )
            .unwrap(),
        )
    };
    let fast = run(DispatchPolicy::default());
    assert_close(&fast, &run(DispatchPolicy::leaf_wise()));
    assert_eq!(fast.sizes(), vec![Some(4), Some(3), Some(4), Some(4)]);

    let mut mean: DenseTensor<f64> = Tensor::random_with_rng(&[3], &mut rng);
    let mut var: DenseTensor<f64> = Tensor::full(&[3], 2.0);
    let mut normalize = |policy| {
        nested(
            dispatch::dispatch(
                NestedOp::BatchNorm {
                    running_mean: Some(&mut mean),
                    running_var: Some(&mut var),
                    weight: None,
                    bias: None,
                    params: BatchNormParams::default(),
                },
                &fast,
                policy,
            )
            .unwrap(),
        )
    };
    let a = normalize(DispatchPolicy::default());
    let b = normalize(DispatchPolicy::leaf_wise());
    assert_close(&a, &b);
}

#[test]
fn test_whole_batch_fast_paths_on_two_level_tree() {
    let mut rng = StdRng::seed_from_u64(4);
    let group = |rng: &mut StdRng| -> NestedNode<DenseTensor<f64>> {
        NestedNode::from_leaves((0..3).map(|_| Tensor::random_with_rng(&[2, 4, 4], rng)))
    };
    let input = NestedTensor::new(NestedNode::branch(vec![group(&mut rng), group(&mut rng)])).unwrap();
    assert_eq!(input.nested_dim(), 2);
    assert!(input.is_tensor_shape());

    let params = MaxPool2dParams::new(2);
    let fast = nested(dispatch::dispatch(NestedOp::MaxPool2d(params), &input, DispatchPolicy::default()).unwrap());
    let slow = nested(dispatch::dispatch(NestedOp::MaxPool2d(params), &input, DispatchPolicy::leaf_wise()).unwrap());
    assert_eq!(fast.nested_dim(), 2);
    assert_eq!(fast.sizes(), vec![Some(2), Some(3), Some(2), Some(2), Some(2)]);
    assert_close(&fast, &slow);

    let weight: DenseTensor<f64> = Tensor::random_with_rng(&[5, 2, 3, 3], &mut rng);
    let run = |policy| {
        nested(
            dispatch::dispatch(
                NestedOp::Conv2d {
                    weight: &weight,
                    bias: None,
                    params: Conv2dParams::default(),
                },
                &input,
                policy,
            )
            .unwrap(),
        )
    };
    let fast = run(DispatchPolicy::default());
    assert_eq!(fast.sizes(), vec![Some(2), Some(3), Some(5), Some(2), Some(2)]);
    assert_close(&fast, &run(DispatchPolicy::leaf_wise()));
}

#[test]
fn test_dropout_through_dispatch_is_reproducible() {
    let mut rng = StdRng::seed_from_u64(3);
    let input = random_images(&mut rng, 2).to_contiguous();
    let params = DropoutParams { p: 0.25, train: true };

    let mut first_rng = StdRng::seed_from_u64(99);
    let first = nested(
        dispatch::dispatch(
            NestedOp::Dropout {
                params,
                rng: &mut first_rng,
            },
            &input,
            DispatchPolicy::default(),
        )
        .unwrap(),
    );
    let mut second_rng = StdRng::seed_from_u64(99);
    let second = nested(
        dispatch::dispatch(
            NestedOp::Dropout {
                params,
                rng: &mut second_rng,
            },
            &input,
            DispatchPolicy::leaf_wise(),
        )
        .unwrap(),
    );
    assert_close(&first, &second);

    let mut inplace = input.clone();
    let mut third_rng = StdRng::seed_from_u64(99);
    dispatch::dispatch_inplace(
        NestedInplaceOp::Dropout {
            params,
            rng: &mut third_rng,
        },
        &mut inplace,
        DispatchPolicy::default(),
    )
    .unwrap();
    assert_close(&inplace, &first);
}

#[test]
fn test_empty_batch_sum() {
    let empty = NestedTensor::<f64>::new(NestedNode::branch(Vec::new())).unwrap();
    let total = dispatch::dispatch(NestedOp::Sum, &empty, DispatchPolicy::default())
        .unwrap()
        .into_tensor()
        .unwrap();
    assert_eq!(total.shape(), &[0]);
    assert!(total.to_vec().is_empty());

    for op in [NestedOp::Any, NestedOp::All] {
        let out = dispatch::dispatch(op, &empty, DispatchPolicy::default()).unwrap();
        assert_eq!(out.into_tensor().unwrap().len(), 0);
    }
}

#[test]
fn test_transpose_across_nested_dim_fails() {
    let input = NestedTensor::from_tensors([DenseTensor::<f64>::ones(&[2, 3]), DenseTensor::ones(&[4, 3])]).unwrap();
    assert_eq!(input.nested_dim(), 1);
    let err = dispatch::dispatch(NestedOp::Transpose { dim0: 0, dim1: 2 }, &input, DispatchPolicy::default()).unwrap_err();
    assert!(matches!(err, TensorError::NestedDimensionUnsupported { dim: 0, nested_dim: 1 }));

    let ok = nested(dispatch::dispatch(NestedOp::Transpose { dim0: -1, dim1: -2 }, &input, DispatchPolicy::default()).unwrap());
    assert_eq!(ok.sizes(), vec![Some(2), Some(3), None]);
}

#[test]
fn test_ragged_pipeline() {
    let mut rng = StdRng::seed_from_u64(5);
    let input = NestedTensor::from_tensors([
        Tensor::random_with_rng(&[3, 8], &mut rng),
        Tensor::random_with_rng(&[5, 8], &mut rng),
    ])
    .unwrap()
    .to_contiguous();
    let policy = DispatchPolicy::default();

    let normed = nested(
        dispatch::dispatch(
            NestedOp::LayerNorm {
                normalized_shape: &[8],
                weight: None,
                bias: None,
                params: LayerNormParams::default(),
            },
            &input,
            policy,
        )
        .unwrap(),
    );
    let projection: DenseTensor<f64> = Tensor::random_with_rng(&[8, 4], &mut rng);
    let projected = nested(
        dispatch::dispatch(
            NestedOp::Matmul {
                other: Operand::Dense(&projection),
            },
            &normed,
            policy,
        )
        .unwrap(),
    );
    assert_eq!(projected.sizes(), vec![Some(2), None, Some(4)]);

    let probs = nested(dispatch::dispatch(NestedOp::Softmax { dim: -1 }, &projected, policy).unwrap());
    for leaf in probs.structure().iter() {
        for row in leaf.to_vec().chunks(4) {
            assert_relative_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    let flat = nested(
        dispatch::dispatch(
            NestedOp::Reshape { shape: &[-1, -1] },
            &probs.to_contiguous(),
            policy,
        )
        .unwrap(),
    );
    let shapes: Vec<Vec<usize>> = flat.nested_size().iter().cloned().collect();
    assert_eq!(shapes, vec![vec![12], vec![20]]);

    let total = dispatch::dispatch(NestedOp::Sum, &flat, policy).unwrap().into_tensor().unwrap();
    assert_relative_eq!(total.to_vec()[0], 8.0, epsilon = 1e-10);
}

#[test]
fn test_inplace_add_rejects_without_mutation() {
    let mut input = NestedTensor::from_tensors([DenseTensor::<f64>::ones(&[2, 3]), DenseTensor::ones(&[1, 3])])
        .unwrap()
        .to_contiguous();
    let before = input.clone();
    let bad: DenseTensor<f64> = Tensor::ones(&[2, 1]);
    let err = dispatch::dispatch_inplace(
        NestedInplaceOp::Add {
            other: Operand::Dense(&bad),
            alpha: 1.0,
        },
        &mut input,
        DispatchPolicy::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TensorError::IncompatibleShapes { .. }));
    assert_eq!(input, before);
}

#[test]
fn test_matmul_out_through_dispatch() {
    let a = NestedTensor::from_tensors([DenseTensor::<f64>::ones(&[2, 3]), DenseTensor::ones(&[1, 3])]).unwrap();
    let b = NestedTensor::from_tensors([DenseTensor::<f64>::ones(&[3, 2]), DenseTensor::ones(&[3, 2])]).unwrap();
    let mut out = NestedTensor::from_tensors([DenseTensor::<f64>::zeros(&[2, 2]), DenseTensor::zeros(&[1, 2])])
        .unwrap()
        .to_contiguous();
    dispatch::dispatch_inplace(NestedInplaceOp::MatmulOut { a: &a, b: &b }, &mut out, DispatchPolicy::default())
        .unwrap();
    for leaf in out.structure().iter() {
        assert!(leaf.to_vec().iter().all(|&x| x == 3.0));
    }
    assert!(out.is_contiguous());
}

#[test]
fn test_registered_ops_cover_the_table() {
    assert_eq!(REGISTERED_OPS.len(), 20);
    for name in ["conv2d", "matmul.out", "flatten.using_ints", "add_.Tensor", "relu_"] {
        assert!(REGISTERED_OPS.contains(&name));
    }
    let op: NestedOp<'_, f64> = NestedOp::Flatten { start_dim: 1, end_dim: -1 };
    assert_eq!(op.name(), "flatten.using_ints");
}
