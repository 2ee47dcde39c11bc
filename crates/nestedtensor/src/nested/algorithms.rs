//! Structural algorithms over [`NestedNode`] trees.
//!
//! Every algorithm visits leaves depth-first, left to right. N-ary variants
//! check structural congruence of all inputs before calling `f` even once,
//! so a mismatch never leaves a partially mutated tree behind.

use crate::error::TensorError;
use crate::nested::node::NestedNode;

/// Apply `f` to every leaf, preserving the tree shape.
///
/// # Example
///
/// ```
/// use nestedtensor::nested::{NestedNode, map};
///
/// let tree = NestedNode::from_leaves([1, 2, 3]);
/// let doubled = map(|x| x * 2, &tree);
/// assert_eq!(doubled, NestedNode::from_leaves([2, 4, 6]));
/// ```
pub fn map<T, U, F>(mut f: F, tree: &NestedNode<T>) -> NestedNode<U>
where
    F: FnMut(&T) -> U,
{
    fn go<T, U, F: FnMut(&T) -> U>(f: &mut F, node: &NestedNode<T>) -> NestedNode<U> {
        match node {
            NestedNode::Leaf(payload) => NestedNode::Leaf(f(payload)),
            NestedNode::Branch(children) => {
                NestedNode::Branch(children.iter().map(|child| go(f, child)).collect())
            }
        }
    }
    go(&mut f, tree)
}

/// Fallible [`map`]; stops at the first error.
pub fn try_map<T, U, F>(mut f: F, tree: &NestedNode<T>) -> Result<NestedNode<U>, TensorError>
where
    F: FnMut(&T) -> Result<U, TensorError>,
{
    fn go<T, U, F>(f: &mut F, node: &NestedNode<T>) -> Result<NestedNode<U>, TensorError>
    where
        F: FnMut(&T) -> Result<U, TensorError>,
    {
        match node {
            NestedNode::Leaf(payload) => Ok(NestedNode::Leaf(f(payload)?)),
            NestedNode::Branch(children) => Ok(NestedNode::Branch(
                children
                    .iter()
                    .map(|child| go(f, child))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
    go(&mut f, tree)
}

/// Consuming [`map`].
pub fn map_into<T, U, F>(mut f: F, tree: NestedNode<T>) -> NestedNode<U>
where
    F: FnMut(T) -> U,
{
    fn go<T, U, F: FnMut(T) -> U>(f: &mut F, node: NestedNode<T>) -> NestedNode<U> {
        match node {
            NestedNode::Leaf(payload) => NestedNode::Leaf(f(payload)),
            NestedNode::Branch(children) => {
                NestedNode::Branch(children.into_iter().map(|child| go(f, child)).collect())
            }
        }
    }
    go(&mut f, tree)
}

/// Binary [`map`] over two congruent trees.
///
/// # Errors
///
/// Returns `TensorError::StructureMismatch` if the trees are not congruent.
pub fn map2<A, B, U, F>(mut f: F, a: &NestedNode<A>, b: &NestedNode<B>) -> Result<NestedNode<U>, TensorError>
where
    F: FnMut(&A, &B) -> U,
{
    try_map2(|x, y| Ok(f(x, y)), a, b)
}

/// Fallible binary map over two congruent trees.
pub fn try_map2<A, B, U, F>(
    mut f: F,
    a: &NestedNode<A>,
    b: &NestedNode<B>,
) -> Result<NestedNode<U>, TensorError>
where
    F: FnMut(&A, &B) -> Result<U, TensorError>,
{
    fn go<A, B, U, F>(f: &mut F, a: &NestedNode<A>, b: &NestedNode<B>) -> Result<NestedNode<U>, TensorError>
    where
        F: FnMut(&A, &B) -> Result<U, TensorError>,
    {
        match (a, b) {
            (NestedNode::Leaf(x), NestedNode::Leaf(y)) => Ok(NestedNode::Leaf(f(x, y)?)),
            _ => Ok(NestedNode::Branch(
                a.children()
                    .iter()
                    .zip(b.children())
                    .map(|(ca, cb)| go(f, ca, cb))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
    a.check_congruent(b)?;
    go(&mut f, a, b)
}

/// Ternary [`map`] over three congruent trees.
pub fn map3<A, B, C, U, F>(
    mut f: F,
    a: &NestedNode<A>,
    b: &NestedNode<B>,
    c: &NestedNode<C>,
) -> Result<NestedNode<U>, TensorError>
where
    F: FnMut(&A, &B, &C) -> U,
{
    fn go<A, B, C, U, F>(f: &mut F, a: &NestedNode<A>, b: &NestedNode<B>, c: &NestedNode<C>) -> NestedNode<U>
    where
        F: FnMut(&A, &B, &C) -> U,
    {
        match (a, b, c) {
            (NestedNode::Leaf(x), NestedNode::Leaf(y), NestedNode::Leaf(z)) => NestedNode::Leaf(f(x, y, z)),
            _ => NestedNode::Branch(
                a.children()
                    .iter()
                    .zip(b.children())
                    .zip(c.children())
                    .map(|((ca, cb), cc)| go(f, ca, cb, cc))
                    .collect(),
            ),
        }
    }
    a.check_congruent(b)?;
    a.check_congruent(c)?;
    Ok(go(&mut f, a, b, c))
}

/// Call `f` on every leaf for its side effect.
pub fn apply<T, F>(f: F, tree: &NestedNode<T>)
where
    F: FnMut(&T),
{
    tree.iter().for_each(f);
}

/// Update every leaf in place.
pub fn apply_mut<T, F>(mut f: F, tree: &mut NestedNode<T>)
where
    F: FnMut(&mut T),
{
    for leaf in tree.leaves_mut() {
        f(leaf);
    }
}

/// Pair the leaves of `a` (mutably) and `b`.
///
/// # Errors
///
/// Returns `TensorError::StructureMismatch`, with `a` untouched, if the trees
/// are not congruent.
pub fn apply2<A, B, F>(mut f: F, a: &mut NestedNode<A>, b: &NestedNode<B>) -> Result<(), TensorError>
where
    F: FnMut(&mut A, &B),
{
    a.check_congruent(b)?;
    for (x, y) in a.leaves_mut().into_iter().zip(b.iter()) {
        f(x, y);
    }
    Ok(())
}

/// Pair the leaves of `a` (mutably) with those of `b` and `c`.
pub fn apply3<A, B, C, F>(
    mut f: F,
    a: &mut NestedNode<A>,
    b: &NestedNode<B>,
    c: &NestedNode<C>,
) -> Result<(), TensorError>
where
    F: FnMut(&mut A, &B, &C),
{
    a.check_congruent(b)?;
    a.check_congruent(c)?;
    for ((x, y), z) in a.leaves_mut().into_iter().zip(b.iter()).zip(c.iter()) {
        f(x, y, z);
    }
    Ok(())
}

/// Fold `f` over the leaves in traversal order, starting from `init`.
///
/// # Example
///
/// ```
/// use nestedtensor::nested::{NestedNode, reduce};
///
/// let tree = NestedNode::branch(vec![
///     NestedNode::from_leaves([1, 2]),
///     NestedNode::from_leaves([3]),
/// ]);
/// assert_eq!(reduce(&tree, |acc, x| acc * 10 + x, 0), 123);
/// ```
pub fn reduce<T, A, F>(tree: &NestedNode<T>, f: F, init: A) -> A
where
    F: FnMut(A, &T) -> A,
{
    tree.iter().fold(init, f)
}

/// Clone every leaf into a flat sequence, in traversal order.
pub fn flatten<T: Clone>(tree: &NestedNode<T>) -> Vec<T> {
    tree.iter().cloned().collect()
}

/// Rebuild a tree with the shape of `shape` from a flat sequence of leaves.
///
/// # Errors
///
/// Returns `TensorError::ShapeMismatch` if `leaves` does not have exactly
/// one entry per leaf of `shape`.
pub fn unflatten<S, T>(shape: &NestedNode<S>, leaves: Vec<T>) -> Result<NestedNode<T>, TensorError> {
    if leaves.len() != shape.leaf_count() {
        return Err(TensorError::ShapeMismatch {
            expected: shape.leaf_count(),
            actual: leaves.len(),
        });
    }
    let mut source = leaves.into_iter();
    Ok(map(
        |_| source.next().expect("leaf count checked above"),
        shape,
    ))
}
