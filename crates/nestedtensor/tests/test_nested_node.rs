//! Tests for the tree container and its structural algorithms.
//!
//! Covers:
//! - congruence law for N-ary map/apply
//! - reduce agreeing with a left fold over flatten
//! - unflatten as the inverse of flatten

use nestedtensor::TensorError;
use nestedtensor::nested::{NestedNode, apply2, apply3, flatten, map, map2, map3, reduce, unflatten};

fn trees() -> Vec<NestedNode<i32>> {
    vec![
        NestedNode::from_leaves([1, 2, 3]),
        NestedNode::branch(vec![NestedNode::from_leaves([1, 2]), NestedNode::from_leaves([3])]),
        NestedNode::branch(vec![
            NestedNode::branch(vec![NestedNode::from_leaves([5]), NestedNode::from_leaves([6, 7])]),
            NestedNode::branch(vec![NestedNode::from_leaves([8, 9, 10])]),
        ]),
        NestedNode::branch(Vec::new()),
    ]
}

#[test]
fn test_map2_on_congruent_trees_keeps_shape() {
    for tree in trees() {
        let other = map(|x| x * 10, &tree);
        let summed = map2(|a, b| a + b, &tree, &other).unwrap();
        assert!(summed.structurally_congruent(&tree));
        assert_eq!(flatten(&summed), flatten(&tree).iter().map(|x| x * 11).collect::<Vec<_>>());
    }
}

#[test]
fn test_map2_rejects_incongruent_trees() {
    let trees = trees();
    for (i, a) in trees.iter().enumerate() {
        for (j, b) in trees.iter().enumerate() {
            let result = map2(|x, y| x + y, a, b);
            if i == j {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(TensorError::StructureMismatch { .. })), "trees {i} and {j}");
            }
        }
    }
}

#[test]
fn test_root_degree_mismatch() {
    // Two children against three at the root.
    let a = NestedNode::from_leaves([1, 2]);
    let b = NestedNode::from_leaves([1, 2, 3]);
    assert!(matches!(map2(|x, y| x * y, &a, &b), Err(TensorError::StructureMismatch { .. })));
    assert!(matches!(map3(|x, y, z| x + y + z, &a, &a, &b), Err(TensorError::StructureMismatch { .. })));
}

#[test]
fn test_apply2_mismatch_leaves_receiver_untouched() {
    let mut a = NestedNode::branch(vec![NestedNode::from_leaves([1, 2]), NestedNode::from_leaves([3])]);
    let b = NestedNode::branch(vec![NestedNode::from_leaves([1, 2]), NestedNode::from_leaves([3, 4])]);
    let before = a.clone();
    assert!(apply2(|x, y| *x += y, &mut a, &b).is_err());
    assert_eq!(a, before);

    let c = NestedNode::branch(vec![NestedNode::from_leaves([1, 2]), NestedNode::from_leaves([3])]);
    assert!(apply3(|x, y, z| *x += y * z, &mut a, &c, &b).is_err());
    assert_eq!(a, before);

    apply3(|x, y, z| *x += y * z, &mut a, &c, &c).unwrap();
    assert_eq!(flatten(&a), vec![2, 6, 12]);
}

#[test]
fn test_reduce_matches_fold_over_flatten() {
    for tree in trees() {
        let concat = reduce(&tree, |acc: String, x| format!("{acc}{x},"), String::new());
        let folded = flatten(&tree).into_iter().fold(String::new(), |acc, x| format!("{acc}{x},"));
        assert_eq!(concat, folded);

        let weighted = reduce(&tree, |acc: i64, &x| acc * 3 + i64::from(x), 1);
        let expected = flatten(&tree).into_iter().fold(1, |acc, x| acc * 3 + i64::from(x));
        assert_eq!(weighted, expected);
    }
}

#[test]
fn test_unflatten_inverts_flatten() {
    for tree in trees() {
        let labels: Vec<String> = flatten(&tree).iter().map(|x| format!("#{x}")).collect();
        let rebuilt = unflatten(&tree, labels.clone()).unwrap();
        assert!(rebuilt.structurally_congruent(&tree));
        assert_eq!(flatten(&rebuilt), labels);
    }
    let tree = NestedNode::from_leaves([1, 2]);
    assert!(matches!(
        unflatten(&tree, vec![1]),
        Err(TensorError::ShapeMismatch { expected: 2, actual: 1 })
    ));
}

#[test]
fn test_height_and_degree() {
    let trees = trees();
    let heights: Vec<usize> = trees.iter().map(NestedNode::height).collect();
    assert_eq!(heights, vec![1, 2, 3, 1]);
    let degrees: Vec<usize> = trees.iter().map(NestedNode::degree).collect();
    assert_eq!(degrees, vec![3, 2, 2, 0]);
    assert_eq!(NestedNode::leaf(7).height(), 0);
}
