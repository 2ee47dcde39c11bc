//! Tests for the nested tensor entity.
//!
//! Covers:
//! - sizes and dense conversion for regular and ragged batches
//! - buffer/tree equivalence and idempotence of to_contiguous
//! - the dimension regularity law for to_tensor
//! - gradients, copies and pinned memory across both representations

use approx::assert_relative_eq;
use nestedtensor::nested::{NestedNode, flatten};
use nestedtensor::{DenseTensor, NestedTensor, SizeEntry, Tensor, TensorError};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn seq(shape: &[usize], start: f64) -> DenseTensor<f64> {
    let len: usize = shape.iter().product();
    Tensor::from_vec((0..len).map(|i| start + i as f64).collect(), shape).unwrap()
}

fn random_batches(rng: &mut StdRng) -> Vec<NestedTensor<f64>> {
    vec![
        NestedTensor::from_tensors([
            Tensor::random_with_rng(&[2, 3], rng),
            Tensor::random_with_rng(&[4, 3], rng),
        ])
        .unwrap(),
        NestedTensor::from_tensors([Tensor::random_with_rng(&[5], rng)]).unwrap(),
        NestedTensor::new(NestedNode::branch(vec![
            NestedNode::from_leaves([Tensor::random_with_rng(&[1, 2], rng), Tensor::random_with_rng(&[3, 2], rng)]),
            NestedNode::from_leaves([Tensor::random_with_rng(&[2, 2], rng)]),
        ]))
        .unwrap(),
    ]
}

#[test]
fn test_regular_batch() {
    let nt = NestedTensor::from_tensors([seq(&[2, 3], 0.0), seq(&[2, 3], 6.0), seq(&[2, 3], 12.0)]).unwrap();
    assert_eq!(nt.sizes(), vec![Some(3), Some(2), Some(3)]);
    assert!(nt.is_tensor_shape());

    let dense = nt.to_tensor(None).unwrap().into_tensor().unwrap();
    assert_eq!(dense.shape(), &[3, 2, 3]);
    assert_eq!(dense.to_vec(), (0..18).map(|i| i as f64).collect::<Vec<_>>());
}

#[test]
fn test_ragged_batch() {
    let nt = NestedTensor::from_tensors([seq(&[2, 3], 0.0), seq(&[4, 3], 0.0)]).unwrap();
    assert_eq!(nt.sizes(), vec![Some(2), None, Some(3)]);
    assert!(!nt.is_tensor_shape());
    assert!(matches!(nt.to_tensor(None), Err(TensorError::IrregularDimension { dim: 1 })));
    assert_eq!(nt.size(-1).unwrap(), Some(3));
    assert_eq!(
        nt.nested_size_at(1).unwrap(),
        SizeEntry::Tuple(vec![SizeEntry::Size(2), SizeEntry::Size(4)])
    );
}

#[test]
fn test_to_contiguous_matches_leaves() {
    let mut rng = StdRng::seed_from_u64(42);
    for nt in random_batches(&mut rng) {
        assert!(!nt.is_contiguous());
        let packed = nt.to_contiguous();
        assert!(packed.is_contiguous());
        assert_eq!(packed.nested_size(), nt.nested_size());

        let expected: Vec<f64> = flatten(nt.structure()).iter().flat_map(DenseTensor::to_vec).collect();
        assert_eq!(packed.buffer().unwrap().to_vec(), expected);
        for (a, b) in packed.structure().iter().zip(nt.structure().iter()) {
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_to_contiguous_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(7);
    for nt in random_batches(&mut rng) {
        let once = nt.to_contiguous();
        let twice = once.to_contiguous();
        assert_eq!(once, twice);
        assert!(twice.is_contiguous());
        assert!(twice.buffer().unwrap().shares_storage_with(once.buffer().unwrap()));
    }
}

#[test]
fn test_to_tensor_regularity_law() {
    let cases = vec![
        NestedTensor::from_tensors([seq(&[2, 3], 0.0), seq(&[2, 3], 0.0)]).unwrap(),
        NestedTensor::from_tensors([seq(&[2, 3], 0.0), seq(&[2, 4], 0.0)]).unwrap(),
        NestedTensor::from_tensors([seq(&[1, 3], 0.0), seq(&[2, 3], 0.0)]).unwrap(),
        NestedTensor::new(NestedNode::branch(vec![
            NestedNode::from_leaves([seq(&[3], 0.0), seq(&[3], 3.0)]),
            NestedNode::from_leaves([seq(&[3], 6.0)]),
        ]))
        .unwrap(),
    ];
    for nt in &cases {
        let regular = nt.sizes().iter().all(Option::is_some);
        for dim in [None, Some(0)] {
            let result = nt.to_tensor(dim);
            assert_eq!(result.is_ok(), regular, "sizes {:?}", nt.sizes());
            if let Err(err) = result {
                assert!(matches!(err, TensorError::IrregularDimension { .. }));
            }
        }
    }
}

#[test]
fn test_to_tensor_keeps_outer_dims() {
    let nt = NestedTensor::new(NestedNode::branch(vec![
        NestedNode::from_leaves([seq(&[2, 3], 0.0), seq(&[2, 3], 6.0)]),
        NestedNode::from_leaves([seq(&[4, 3], 12.0)]),
    ]))
    .unwrap();
    assert_eq!(nt.sizes(), vec![Some(2), None, None, Some(3)]);
    assert!(matches!(nt.to_tensor(None), Err(TensorError::IrregularDimension { dim: 1 })));

    let collapsed = nt.to_tensor(Some(1)).unwrap().into_nested().unwrap();
    assert_eq!(collapsed.nested_dim(), 1);
    let shapes: Vec<Vec<usize>> = collapsed.nested_size().iter().cloned().collect();
    assert_eq!(shapes, vec![vec![2, 2, 3], vec![1, 4, 3]]);
    assert_eq!(collapsed.numel(), nt.numel());
}

#[test]
fn test_dense_round_trip() {
    let dense = seq(&[3, 2, 2], 0.0);
    let nt = NestedTensor::from_tensor(&dense).unwrap();
    assert!(nt.is_contiguous());
    assert_eq!(nt.len(), 3);
    assert_eq!(nt.to_tensor(None).unwrap().into_tensor().unwrap(), dense);

    let deeper = nt.to_nested_tensor(Some(1)).unwrap();
    assert_eq!(deeper.nested_dim(), 2);
    assert_eq!(deeper.sizes(), vec![Some(3), Some(2), Some(2)]);
    assert_eq!(deeper.to_tensor(None).unwrap().into_tensor().unwrap(), dense);
}

#[test]
fn test_from_buffer_checks_element_count() {
    let nested_size = NestedNode::from_leaves([vec![2, 2], vec![1, 2]]);
    let nt = NestedTensor::from_buffer(seq(&[6], 0.0), nested_size.clone()).unwrap();
    assert_eq!(nt.get(1).unwrap().into_tensor().unwrap().to_vec(), vec![4.0, 5.0]);
    assert!(matches!(
        NestedTensor::from_buffer(seq(&[5], 0.0), nested_size),
        Err(TensorError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_construction_rejects_mixed_rank() {
    let err = NestedTensor::from_tensors([seq(&[2, 3], 0.0), seq(&[3], 0.0)]).unwrap_err();
    assert!(matches!(err, TensorError::IrregularRank { expected: 2, actual: 1 }));
}

#[test]
fn test_gradients_in_both_representations() {
    let leaves = || [seq(&[2], 0.0), seq(&[3], 2.0)];
    let gradient = NestedTensor::from_tensors([Tensor::full(&[2], 0.5), Tensor::full(&[3], 0.5)]).unwrap();

    let mut unbuffered = NestedTensor::from_tensors(leaves()).unwrap();
    let mut buffered = unbuffered.to_contiguous();
    for nt in [&mut unbuffered, &mut buffered] {
        nt.requires_grad_(true);
        nt.backward(&gradient).unwrap();
        nt.backward(&gradient).unwrap();
        let grad = nt.grad().unwrap();
        assert_eq!(grad.nested_size(), gradient.nested_size());
        for leaf in grad.structure().iter() {
            for g in leaf.to_vec() {
                assert_relative_eq!(g, 1.0);
            }
        }
        assert!(!nt.detach().requires_grad());
    }

    let wrong = NestedTensor::from_tensors([Tensor::full(&[3], 0.5), Tensor::full(&[2], 0.5)]).unwrap();
    assert!(buffered.backward(&wrong).is_err());
}

#[test]
fn test_copy_does_not_leak_into_clones() {
    let source = NestedTensor::from_tensors([seq(&[2], 10.0), seq(&[1], 20.0)]).unwrap();
    let original = NestedTensor::from_tensors([seq(&[2], 0.0), seq(&[1], 0.0)]).unwrap().to_contiguous();
    let mut target = original.clone();
    target.copy_(&source).unwrap();

    assert_eq!(target.get(0).unwrap().into_tensor().unwrap().to_vec(), vec![10.0, 11.0]);
    assert_eq!(original.get(0).unwrap().into_tensor().unwrap().to_vec(), vec![0.0, 1.0]);
    assert!(target.is_contiguous());

    let mismatched = NestedTensor::from_tensors([seq(&[1], 0.0), seq(&[2], 0.0)]).unwrap();
    assert!(target.copy_(&mismatched).is_err());
    assert_eq!(target.get(1).unwrap().into_tensor().unwrap().to_vec(), vec![20.0]);
}

#[test]
fn test_pin_memory() {
    let nt = NestedTensor::from_tensors([seq(&[2], 0.0), seq(&[3], 0.0)]).unwrap();
    assert!(!nt.is_pinned());
    let pinned = nt.pin_memory();
    assert!(pinned.is_pinned());
    assert_eq!(pinned, nt);
}

#[test]
fn test_empty_nested_tensor() {
    let nt = NestedTensor::<f64>::new(NestedNode::branch(Vec::new())).unwrap();
    assert!(nt.is_empty());
    assert_eq!(nt.nested_dim(), 1);
    assert_eq!(nt.tensor_dim(), 0);
    assert_eq!(nt.numel(), 0);
    assert_eq!(nt.sizes(), vec![Some(0)]);
}
