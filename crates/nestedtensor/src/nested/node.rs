//! Generic recursive tree container.
//!
//! A [`NestedNode`] is either a leaf holding one payload or an ordered
//! sequence of child trees. Branches may have zero children; such a node
//! has degree 0 and height 1 and stands for an empty batch.

use std::fmt;

use crate::error::TensorError;

/// A tree whose leaves carry payloads of type `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedNode<T> {
    Leaf(T),
    Branch(Vec<NestedNode<T>>),
}

impl<T> NestedNode<T> {
    /// Construct a leaf.
    pub fn leaf(payload: T) -> Self {
        NestedNode::Leaf(payload)
    }

    /// Construct an internal node from its children.
    pub fn branch(children: Vec<NestedNode<T>>) -> Self {
        NestedNode::Branch(children)
    }

    /// Internal node whose children are all leaves.
    pub fn from_leaves(payloads: impl IntoIterator<Item = T>) -> Self {
        NestedNode::Branch(payloads.into_iter().map(NestedNode::Leaf).collect())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NestedNode::Leaf(_))
    }

    /// Number of direct children (0 for a leaf).
    pub fn degree(&self) -> usize {
        match self {
            NestedNode::Leaf(_) => 0,
            NestedNode::Branch(children) => children.len(),
        }
    }

    /// 0 for a leaf, otherwise 1 + the largest child height.
    pub fn height(&self) -> usize {
        match self {
            NestedNode::Leaf(_) => 0,
            NestedNode::Branch(children) => 1 + children.iter().map(Self::height).max().unwrap_or(0),
        }
    }

    /// The payload of a leaf.
    pub fn payload(&self) -> Option<&T> {
        match self {
            NestedNode::Leaf(payload) => Some(payload),
            NestedNode::Branch(_) => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut T> {
        match self {
            NestedNode::Leaf(payload) => Some(payload),
            NestedNode::Branch(_) => None,
        }
    }

    pub fn into_payload(self) -> Option<T> {
        match self {
            NestedNode::Leaf(payload) => Some(payload),
            NestedNode::Branch(_) => None,
        }
    }

    /// Direct children; empty for a leaf.
    pub fn children(&self) -> &[NestedNode<T>] {
        match self {
            NestedNode::Leaf(_) => &[],
            NestedNode::Branch(children) => children,
        }
    }

    pub fn child(&self, index: usize) -> Option<&NestedNode<T>> {
        self.children().get(index)
    }

    /// Split an internal node into its direct children.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` when called on a leaf.
    pub fn unbind(&self) -> Result<Vec<NestedNode<T>>, TensorError>
    where
        T: Clone,
    {
        match self {
            NestedNode::Leaf(_) => Err(TensorError::invalid_argument("cannot unbind a leaf")),
            NestedNode::Branch(children) => Ok(children.clone()),
        }
    }

    /// Owning variant of [`NestedNode::unbind`].
    pub fn into_children(self) -> Result<Vec<NestedNode<T>>, TensorError> {
        match self {
            NestedNode::Leaf(_) => Err(TensorError::invalid_argument("cannot unbind a leaf")),
            NestedNode::Branch(children) => Ok(children),
        }
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            NestedNode::Leaf(_) => 1,
            NestedNode::Branch(children) => children.iter().map(Self::leaf_count).sum(),
        }
    }

    /// First leaf in depth-first, left-to-right order.
    pub fn first_leaf(&self) -> Option<&T> {
        self.iter().next()
    }

    /// Leaves in depth-first, left-to-right order.
    pub fn iter(&self) -> Leaves<'_, T> {
        Leaves { stack: vec![self] }
    }

    /// Mutable references to every leaf, in traversal order.
    pub fn leaves_mut(&mut self) -> Vec<&mut T> {
        fn collect<'a, T>(node: &'a mut NestedNode<T>, out: &mut Vec<&'a mut T>) {
            match node {
                NestedNode::Leaf(payload) => out.push(payload),
                NestedNode::Branch(children) => {
                    for child in children {
                        collect(child, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Consume the tree, yielding its leaves in traversal order.
    pub fn into_leaves(self) -> Vec<T> {
        fn collect<T>(node: NestedNode<T>, out: &mut Vec<T>) {
            match node {
                NestedNode::Leaf(payload) => out.push(payload),
                NestedNode::Branch(children) => {
                    for child in children {
                        collect(child, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Whether `self` and `other` have equal degree and height at every
    /// corresponding node.
    pub fn structurally_congruent<U>(&self, other: &NestedNode<U>) -> bool {
        self.congruence_error(other).is_none()
    }

    /// Describe the first position where `self` and `other` disagree.
    pub(crate) fn congruence_error<U>(&self, other: &NestedNode<U>) -> Option<String> {
        fn walk<T, U>(a: &NestedNode<T>, b: &NestedNode<U>, path: &mut Vec<usize>) -> Option<String> {
            if a.degree() != b.degree() || a.height() != b.height() {
                return Some(format!(
                    "at node {:?}: degree {} / height {} vs degree {} / height {}",
                    path,
                    a.degree(),
                    a.height(),
                    b.degree(),
                    b.height()
                ));
            }
            for (i, (ca, cb)) in a.children().iter().zip(b.children()).enumerate() {
                path.push(i);
                if let Some(err) = walk(ca, cb, path) {
                    return Some(err);
                }
                path.pop();
            }
            None
        }
        walk(self, other, &mut Vec::new())
    }

    /// Fail with `StructureMismatch` unless the trees are congruent.
    pub(crate) fn check_congruent<U>(&self, other: &NestedNode<U>) -> Result<(), TensorError> {
        match self.congruence_error(other) {
            None => Ok(()),
            Some(reason) => Err(TensorError::structure_mismatch(reason)),
        }
    }

    /// Leaf-wise transform preserving the tree shape.
    pub fn map<U, F>(&self, f: F) -> NestedNode<U>
    where
        F: FnMut(&T) -> U,
    {
        crate::nested::map(f, self)
    }
}

/// Depth-first, left-to-right iterator over the leaves of a tree.
pub struct Leaves<'a, T> {
    stack: Vec<&'a NestedNode<T>>,
}

impl<'a, T> Iterator for Leaves<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        while let Some(node) = self.stack.pop() {
            match node {
                NestedNode::Leaf(payload) => return Some(payload),
                NestedNode::Branch(children) => self.stack.extend(children.iter().rev()),
            }
        }
        None
    }
}

impl<'a, T> IntoIterator for &'a NestedNode<T> {
    type Item = &'a T;
    type IntoIter = Leaves<'a, T>;

    fn into_iter(self) -> Leaves<'a, T> {
        self.iter()
    }
}

impl<T: fmt::Display> NestedNode<T> {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "\t".repeat(depth);
        match self {
            NestedNode::Leaf(payload) => write!(f, "{indent}{payload}"),
            NestedNode::Branch(children) => {
                write!(f, "{indent}[")?;
                for (i, child) in children.iter().enumerate() {
                    writeln!(f, "{}", if i == 0 { "" } else { "," })?;
                    child.fmt_indented(f, depth + 1)?;
                }
                if !children.is_empty() {
                    write!(f, "\n{indent}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Renders one leaf per line, indented by depth.
impl<T: fmt::Display> fmt::Display for NestedNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NestedNode<i32> {
        NestedNode::branch(vec![
            NestedNode::from_leaves([1, 2]),
            NestedNode::branch(vec![]),
            NestedNode::from_leaves([3]),
        ])
    }

    #[test]
    fn test_degree_and_height() {
        let leaf = NestedNode::leaf(5);
        assert_eq!(leaf.degree(), 0);
        assert_eq!(leaf.height(), 0);

        let tree = sample();
        assert_eq!(tree.degree(), 3);
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.children()[1].height(), 1);
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn test_empty_branch() {
        let empty: NestedNode<i32> = NestedNode::branch(vec![]);
        assert_eq!(empty.degree(), 0);
        assert_eq!(empty.height(), 1);
        assert_eq!(empty.first_leaf(), None);
        assert_eq!(empty.iter().count(), 0);
    }

    #[test]
    fn test_iter_order() {
        let tree = sample();
        assert_eq!(tree.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(tree.first_leaf(), Some(&1));
        assert_eq!(tree.clone().into_leaves(), vec![1, 2, 3]);
    }

    #[test]
    fn test_leaves_mut() {
        let mut tree = sample();
        for x in tree.leaves_mut() {
            *x *= 10;
        }
        assert_eq!(tree.iter().copied().collect::<Vec<_>>(), vec![10, 20, 30]);
    }

    #[test]
    fn test_payload_accessors() {
        let mut leaf = NestedNode::leaf(1);
        assert_eq!(leaf.payload(), Some(&1));
        *leaf.payload_mut().unwrap() = 2;
        assert_eq!(leaf.into_payload(), Some(2));
        assert_eq!(sample().payload(), None);
    }

    #[test]
    fn test_unbind() {
        let tree = sample();
        let parts = tree.unbind().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], NestedNode::from_leaves([1, 2]));
        assert!(NestedNode::leaf(1).unbind().is_err());
    }

    #[test]
    fn test_congruence() {
        let a = sample();
        let b = sample().map(|x| x.to_string());
        assert!(a.structurally_congruent(&b));

        let c = NestedNode::branch(vec![
            NestedNode::from_leaves([1, 2]),
            NestedNode::from_leaves([9]),
            NestedNode::from_leaves([3]),
        ]);
        assert!(!a.structurally_congruent(&c));
        assert!(matches!(
            a.check_congruent(&c),
            Err(TensorError::StructureMismatch { .. })
        ));

        // Same degree everywhere, but a leaf faces an empty branch.
        let deeper: NestedNode<i32> = NestedNode::branch(vec![NestedNode::branch(vec![])]);
        assert!(!NestedNode::from_leaves([1]).structurally_congruent(&deeper));
    }

    #[test]
    fn test_display() {
        let tree = NestedNode::from_leaves([1, 2]);
        assert_eq!(tree.to_string(), "[\n\t1,\n\t2\n]");
        let empty: NestedNode<i32> = NestedNode::branch(vec![]);
        assert_eq!(empty.to_string(), "[]");
    }
}
