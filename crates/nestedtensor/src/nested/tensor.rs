//! The nested tensor: a tree of dense tensors with ragged outer dimensions.
//!
//! A nested tensor is either *buffered*, in which case every leaf is a
//! row-major view into one flat buffer laid out in traversal order, or
//! *unbuffered*, in which case the tree of leaves is the only source of
//! truth. Both forms answer the same queries; [`NestedTensor::to_contiguous`]
//! converts the latter into the former.
//!
//! The first `nested_dim` dimensions are encoded by tree depth and the
//! remaining `tensor_dim` dimensions by the leaves themselves, so
//! `dim() == nested_dim() + tensor_dim()`.

use std::fmt;
use std::ops::Range;

use crate::backend::{GenericBackend, PackBackend};
use crate::error::TensorError;
use crate::nested::algorithms::{map, reduce, try_map};
use crate::nested::node::NestedNode;
use crate::operations::copy_into;
use crate::scalar::{DType, Scalar};
use crate::strides::wrap_dim;
use crate::tensor::{DenseTensor, Device, Layout};

/// Tree of dense tensors.
pub type TensorNode<T> = NestedNode<DenseTensor<T>>;

/// Tree of per-leaf shape (or stride) vectors.
pub type SizeNode = NestedNode<Vec<usize>>;

/// One dimension of a nested size: the root degree at dimension 0, or a
/// tuple with one entry per child below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeEntry {
    Size(usize),
    Tuple(Vec<SizeEntry>),
}

impl fmt::Display for SizeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeEntry::Size(n) => write!(f, "{n}"),
            SizeEntry::Tuple(entries) => {
                write!(f, "(")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{entry}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A constituent returned by indexing or unbinding: a dense tensor when the
/// nesting is exhausted, otherwise a nested tensor.
#[derive(Debug, Clone)]
pub enum NestedItem<T: Scalar> {
    Tensor(DenseTensor<T>),
    Nested(NestedTensor<T>),
}

impl<T: Scalar> NestedItem<T> {
    pub fn as_tensor(&self) -> Option<&DenseTensor<T>> {
        match self {
            NestedItem::Tensor(t) => Some(t),
            NestedItem::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<&NestedTensor<T>> {
        match self {
            NestedItem::Tensor(_) => None,
            NestedItem::Nested(nt) => Some(nt),
        }
    }

    pub fn into_tensor(self) -> Option<DenseTensor<T>> {
        match self {
            NestedItem::Tensor(t) => Some(t),
            NestedItem::Nested(_) => None,
        }
    }

    pub fn into_nested(self) -> Option<NestedTensor<T>> {
        match self {
            NestedItem::Tensor(_) => None,
            NestedItem::Nested(nt) => Some(nt),
        }
    }

    fn into_node(self) -> TensorNode<T> {
        match self {
            NestedItem::Tensor(t) => NestedNode::Leaf(t),
            NestedItem::Nested(nt) => nt.into_structure(),
        }
    }
}

#[derive(Debug, Clone)]
enum Repr<T: Scalar> {
    /// `views` are contiguous views of the flat `buffer`, in traversal order.
    Buffered { buffer: DenseTensor<T>, views: TensorNode<T> },
    Unbuffered(TensorNode<T>),
}

/// A batch of dense tensors whose shapes may differ along some dimensions.
///
/// # Example
///
/// ```
/// use nestedtensor::{DenseTensor, NestedTensor};
///
/// let nt = NestedTensor::from_tensors([
///     DenseTensor::<f64>::zeros(&[2, 3]),
///     DenseTensor::<f64>::zeros(&[4, 3]),
/// ])
/// .unwrap();
/// assert_eq!(nt.sizes(), vec![Some(2), None, Some(3)]);
/// assert!(nt.to_tensor(None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct NestedTensor<T: Scalar> {
    repr: Repr<T>,
    nested_size: SizeNode,
}

/// Element ranges of each leaf inside a buffer laid out in traversal order.
pub(crate) fn leaf_ranges(nested_size: &SizeNode) -> Vec<(Range<usize>, &[usize])> {
    let mut start = 0;
    nested_size
        .iter()
        .map(|shape| {
            let len: usize = shape.iter().product();
            let range = start..start + len;
            start += len;
            (range, shape.as_slice())
        })
        .collect()
}

fn view_tree<T: Scalar>(buffer: &DenseTensor<T>, nested_size: &SizeNode) -> TensorNode<T> {
    let mut start = 0;
    map(
        |shape: &Vec<usize>| {
            let view = buffer.contiguous_view(start, shape);
            start += view.len();
            view
        },
        nested_size,
    )
}

/// Every leaf must sit at the same depth and have the same rank.
fn validate_tree<X>(root: &NestedNode<X>, rank: &dyn Fn(&X) -> usize) -> Result<(), TensorError> {
    fn walk<X>(
        node: &NestedNode<X>,
        depth: usize,
        height: usize,
        rank: &dyn Fn(&X) -> usize,
        expected: &mut Option<usize>,
    ) -> Result<(), TensorError> {
        match node {
            NestedNode::Leaf(payload) => {
                if depth != height {
                    return Err(TensorError::invalid_argument(format!(
                        "leaf at depth {depth} in a tree of height {height}"
                    )));
                }
                let actual = rank(payload);
                match *expected {
                    Some(expected) if expected != actual => Err(TensorError::IrregularRank { expected, actual }),
                    _ => {
                        *expected = Some(actual);
                        Ok(())
                    }
                }
            }
            NestedNode::Branch(children) => children
                .iter()
                .try_for_each(|child| walk(child, depth + 1, height, rank, expected)),
        }
    }

    if root.is_leaf() {
        return Err(TensorError::invalid_argument(
            "the root of a nested tensor must be an internal node",
        ));
    }
    walk(root, 0, root.height(), rank, &mut None)
}

fn first_irregular(sizes: &[Option<usize>]) -> Option<usize> {
    sizes.iter().position(Option::is_none)
}

fn agree(mut values: impl Iterator<Item = usize>) -> Option<usize> {
    let first = values.next()?;
    values.all(|v| v == first).then_some(first)
}

fn size_entry(node: &SizeNode, dim: usize) -> Result<SizeEntry, TensorError> {
    if dim == 0 {
        return Ok(SizeEntry::Size(node.degree()));
    }
    node.children()
        .iter()
        .map(|child| match child {
            NestedNode::Leaf(shape) => shape
                .get(dim - 1)
                .map(|&n| SizeEntry::Size(n))
                .ok_or(TensorError::DimensionOutOfRange {
                    dim: dim as i64,
                    ndim: shape.len() + 1,
                }),
            NestedNode::Branch(_) => size_entry(child, dim - 1),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(SizeEntry::Tuple)
}

/// Replace every leaf with a branch of its slices along dimension 0.
fn expand_leaves<T: Scalar>(node: TensorNode<T>) -> Result<TensorNode<T>, TensorError> {
    match node {
        NestedNode::Leaf(t) => Ok(NestedNode::from_leaves(t.unbind(0)?)),
        NestedNode::Branch(children) => Ok(NestedNode::Branch(
            children.into_iter().map(expand_leaves).collect::<Result<_, _>>()?,
        )),
    }
}

impl<T: Scalar> NestedTensor<T> {
    /// Wrap a tree of dense tensors.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IrregularRank` if the leaves differ in rank and
    /// `TensorError::InvalidArgument` if the root is a leaf or leaves sit at
    /// different depths.
    pub fn new(structure: TensorNode<T>) -> Result<Self, TensorError> {
        validate_tree(&structure, &|t: &DenseTensor<T>| t.ndim())?;
        Ok(Self::unbuffered(structure))
    }

    /// Nested tensor with one level of nesting over `tensors`.
    pub fn from_tensors(tensors: impl IntoIterator<Item = DenseTensor<T>>) -> Result<Self, TensorError> {
        Self::new(NestedNode::from_leaves(tensors))
    }

    /// Rebuild the view tree described by `nested_size` over `buffer`.
    ///
    /// The buffer is flattened; a non-contiguous buffer is copied first.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the element counts disagree.
    pub fn from_buffer(buffer: DenseTensor<T>, nested_size: SizeNode) -> Result<Self, TensorError> {
        validate_tree(&nested_size, &|shape: &Vec<usize>| shape.len())?;
        let total: usize = nested_size.iter().map(|s| s.iter().product::<usize>()).sum();
        if buffer.len() != total {
            return Err(TensorError::ShapeMismatch {
                expected: total,
                actual: buffer.len(),
            });
        }
        let flat = buffer.reshape(&[total])?;
        Ok(Self::assemble(flat, nested_size))
    }

    /// Nested tensor with one level of nesting over the leading dimension of
    /// `tensor`, backed by its data.
    pub fn from_tensor(tensor: &DenseTensor<T>) -> Result<Self, TensorError> {
        let Some((&batch, item_shape)) = tensor.shape().split_first() else {
            return Err(TensorError::RankMismatch {
                expected: 1,
                actual: 0,
            });
        };
        let nested_size = NestedNode::from_leaves(vec![item_shape.to_vec(); batch]);
        Self::from_buffer(tensor.clone(), nested_size)
    }

    fn unbuffered(structure: TensorNode<T>) -> Self {
        let nested_size = map(|t: &DenseTensor<T>| t.shape().to_vec(), &structure);
        Self {
            repr: Repr::Unbuffered(structure),
            nested_size,
        }
    }

    fn assemble(buffer: DenseTensor<T>, nested_size: SizeNode) -> Self {
        let views = view_tree(&buffer, &nested_size);
        Self {
            repr: Repr::Buffered { buffer, views },
            nested_size,
        }
    }

    /// The tree of leaves.
    pub fn structure(&self) -> &TensorNode<T> {
        match &self.repr {
            Repr::Buffered { views, .. } => views,
            Repr::Unbuffered(structure) => structure,
        }
    }

    pub fn into_structure(self) -> TensorNode<T> {
        match self.repr {
            Repr::Buffered { views, .. } => views,
            Repr::Unbuffered(structure) => structure,
        }
    }

    /// The flat buffer backing all leaves, if any.
    pub fn buffer(&self) -> Option<&DenseTensor<T>> {
        match &self.repr {
            Repr::Buffered { buffer, .. } => Some(buffer),
            Repr::Unbuffered(_) => None,
        }
    }

    /// The leaf answering dtype and autograd queries: the first leaf in
    /// traversal order.
    pub fn first_variable(&self) -> Option<&DenseTensor<T>> {
        self.structure().first_leaf()
    }

    /// Number of direct children of the root.
    pub fn len(&self) -> usize {
        self.nested_size.degree()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dimensions encoded by tree depth.
    pub fn nested_dim(&self) -> usize {
        self.nested_size.height()
    }

    /// Rank shared by all leaves (0 when there are none).
    pub fn tensor_dim(&self) -> usize {
        self.nested_size.first_leaf().map_or(0, Vec::len)
    }

    pub fn dim(&self) -> usize {
        self.nested_dim() + self.tensor_dim()
    }

    /// Total number of elements over all leaves.
    pub fn numel(&self) -> usize {
        reduce(self.structure(), |acc, t| acc + t.len(), 0)
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn element_size(&self) -> usize {
        T::DTYPE.element_size()
    }

    pub fn device(&self) -> Device {
        Device::Cpu
    }

    pub fn layout(&self) -> Layout {
        Layout::Strided
    }

    pub fn requires_grad(&self) -> bool {
        match self.first_variable() {
            Some(first) => first.requires_grad(),
            None => self.buffer().is_some_and(DenseTensor::requires_grad),
        }
    }

    pub fn is_pinned(&self) -> bool {
        match self.buffer() {
            Some(buffer) if self.is_contiguous() => buffer.is_pinned(),
            _ => self.first_variable().is_some_and(DenseTensor::is_pinned),
        }
    }

    /// Whether a buffer is present, is itself contiguous, and every leaf is
    /// contiguous.
    pub fn is_contiguous(&self) -> bool {
        match &self.repr {
            Repr::Buffered { buffer, views } => {
                buffer.is_contiguous() && reduce(views, |acc, t| acc && t.is_contiguous(), true)
            }
            Repr::Unbuffered(_) => false,
        }
    }

    /// Per-dimension size: `Some(n)` where every item agrees, else `None`.
    ///
    /// Dimension 0 is the root degree, the following nested dimensions the
    /// degrees of the nodes at that depth, and the rest the leaf extents.
    pub fn sizes(&self) -> Vec<Option<usize>> {
        let mut sizes = Vec::with_capacity(self.dim());
        sizes.push(Some(self.len()));
        let mut level = vec![&self.nested_size];
        for _ in 1..self.nested_dim() {
            level = level.iter().flat_map(|node| node.children()).collect();
            sizes.push(agree(level.iter().map(|node| node.degree())));
        }
        for d in 0..self.tensor_dim() {
            sizes.push(agree(self.nested_size.iter().map(|shape| shape[d])));
        }
        sizes
    }

    /// Size of one (possibly negative) dimension.
    pub fn size(&self, dim: i64) -> Result<Option<usize>, TensorError> {
        let dim = self.wrap_dim(dim)?;
        Ok(self.sizes()[dim])
    }

    /// Whether every dimension is regular.
    pub fn is_tensor_shape(&self) -> bool {
        self.sizes().iter().all(Option::is_some)
    }

    /// Tree of per-leaf shapes.
    pub fn nested_size(&self) -> &SizeNode {
        &self.nested_size
    }

    /// Nested size along one dimension.
    ///
    /// # Example
    ///
    /// ```
    /// use nestedtensor::{DenseTensor, NestedTensor, SizeEntry};
    ///
    /// let nt = NestedTensor::from_tensors([
    ///     DenseTensor::<f64>::zeros(&[2, 3]),
    ///     DenseTensor::<f64>::zeros(&[4, 3]),
    /// ])
    /// .unwrap();
    /// assert_eq!(nt.nested_size_at(0).unwrap(), SizeEntry::Size(2));
    /// assert_eq!(
    ///     nt.nested_size_at(1).unwrap(),
    ///     SizeEntry::Tuple(vec![SizeEntry::Size(2), SizeEntry::Size(4)])
    /// );
    /// ```
    pub fn nested_size_at(&self, dim: i64) -> Result<SizeEntry, TensorError> {
        let dim = self.wrap_dim(dim)?;
        size_entry(&self.nested_size, dim)
    }

    /// Tree of per-leaf strides.
    pub fn nested_stride(&self) -> SizeNode {
        map(|t: &DenseTensor<T>| t.strides().to_vec(), self.structure())
    }

    pub fn nested_stride_at(&self, dim: i64) -> Result<SizeEntry, TensorError> {
        let dim = self.wrap_dim(dim)?;
        size_entry(&self.nested_stride(), dim)
    }

    /// Wrap a possibly negative dimension index against `dim()`.
    pub(crate) fn wrap_dim(&self, dim: i64) -> Result<usize, TensorError> {
        wrap_dim(dim, self.dim()).ok_or(TensorError::DimensionOutOfRange { dim, ndim: self.dim() })
    }

    /// Copy every leaf into one flat buffer and rebuild the leaves as views
    /// of it. A tensor that is already contiguous is returned as a clone
    /// sharing its buffer.
    pub fn to_contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }
        log::debug!(
            "materializing a {}-element buffer for {} leaves",
            self.numel(),
            self.structure().leaf_count()
        );
        let total = self.numel();
        let data = GenericBackend::pack(self.structure(), total);
        let mut buffer = DenseTensor::from_vec(data, &[total]).expect("buffer length equals its own size");
        buffer.set_requires_grad(self.requires_grad());
        Self::assemble(buffer, self.nested_size.clone())
    }

    /// Collapse nested dimensions into a dense tensor.
    ///
    /// `None` or `Some(0)` collapses everything. `Some(dim)` keeps the outer
    /// `dim` nested dimensions and collapses each subtree below them.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IrregularDimension` if a collapsed dimension is
    /// irregular.
    pub fn to_tensor(&self, dim: Option<i64>) -> Result<NestedItem<T>, TensorError> {
        let dim = match dim {
            None => 0,
            Some(dim) => self.wrap_dim(dim)?,
        };
        if dim == 0 {
            return self.to_dense().map(NestedItem::Tensor);
        }
        self.collapse_below(dim).map(NestedItem::Nested)
    }

    /// Collapse every dimension into one dense tensor.
    pub(crate) fn to_dense(&self) -> Result<DenseTensor<T>, TensorError> {
        let sizes = self.sizes();
        if let Some(dim) = first_irregular(&sizes) {
            return Err(TensorError::IrregularDimension { dim });
        }
        let shape: Vec<usize> = sizes.into_iter().flatten().collect();
        if let Some(buffer) = self.buffer() {
            if self.is_contiguous() {
                return buffer.reshape(&shape);
            }
        }
        DenseTensor::from_vec(GenericBackend::pack(self.structure(), self.numel()), &shape)
    }

    fn collapse_below(&self, dim: usize) -> Result<Self, TensorError> {
        if self.nested_dim() == 1 {
            return Ok(self.clone());
        }
        let children = self
            .structure()
            .children()
            .iter()
            .map(|child| {
                let child = NestedTensor::new(child.clone())?;
                let collapsed = if dim == 1 {
                    child.to_dense().map(NestedNode::Leaf)
                } else {
                    child.collapse_below(dim - 1).map(NestedTensor::into_structure)
                };
                // Child dimensions sit one level below ours.
                collapsed.map_err(|err| match err {
                    TensorError::IrregularDimension { dim } => TensorError::IrregularDimension { dim: dim + 1 },
                    err => err,
                })
            })
            .collect::<Result<Vec<_>, TensorError>>()?;
        NestedTensor::new(NestedNode::Branch(children))
    }

    /// Make dimensions `0..=dim` nested by slicing leaves along their
    /// leading dimension. `None` nests every dimension.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if every leaf is empty along
    /// a dimension that would become nested, since the slices would leave
    /// no leaf to carry the trailing shape.
    pub fn to_nested_tensor(&self, dim: Option<i64>) -> Result<Self, TensorError> {
        let dim = match dim {
            None => self.dim() - 1,
            Some(dim) => self.wrap_dim(dim)?,
        };
        let mut out = self.clone();
        while out.nested_dim() <= dim {
            let before = out.nested_dim();
            let leaves = out.structure().leaf_count();
            if leaves > 0 && out.structure().iter().all(|t| t.shape().first() == Some(&0)) {
                return Err(TensorError::invalid_argument(format!(
                    "cannot nest dimension {before}: every item has size 0 there"
                )));
            }
            out = match out.repr {
                Repr::Buffered { buffer, views } => {
                    let views = expand_leaves(views)?;
                    let nested_size = map(|t: &DenseTensor<T>| t.shape().to_vec(), &views);
                    Self {
                        repr: Repr::Buffered { buffer, views },
                        nested_size,
                    }
                }
                Repr::Unbuffered(structure) => Self::unbuffered(expand_leaves(structure)?),
            };
            // No leaves left to slice.
            if out.nested_dim() == before {
                break;
            }
        }
        Ok(out)
    }

    /// Child `index` of the root.
    pub fn get(&self, index: usize) -> Result<NestedItem<T>, TensorError> {
        let child = self.structure().child(index).ok_or(TensorError::IndexOutOfBounds {
            index,
            dim_size: self.len(),
        })?;
        Self::item(child.clone())
    }

    fn item(node: TensorNode<T>) -> Result<NestedItem<T>, TensorError> {
        match node {
            NestedNode::Leaf(t) => Ok(NestedItem::Tensor(t)),
            branch => NestedTensor::new(branch).map(NestedItem::Nested),
        }
    }

    /// Split along `dim`.
    ///
    /// Dimension 0 yields the children of the root. Any other dimension is
    /// split inside every item and the slices are regrouped by index, so the
    /// `j`-th result holds the `j`-th slice of every item that has one.
    pub fn unbind(&self, dim: i64) -> Result<Vec<NestedItem<T>>, TensorError> {
        let dim = self.wrap_dim(dim)?;
        if dim == 0 {
            return self.structure().children().iter().cloned().map(Self::item).collect();
        }

        let mut unbound: Vec<Vec<TensorNode<T>>> = Vec::new();
        let mut push = |j: usize, node: TensorNode<T>| {
            if unbound.len() <= j {
                unbound.resize_with(j + 1, Vec::new);
            }
            unbound[j].push(node);
        };
        if self.nested_dim() == 1 {
            for leaf in self.structure().iter() {
                for (j, slice) in leaf.unbind(dim - 1)?.into_iter().enumerate() {
                    push(j, NestedNode::Leaf(slice));
                }
            }
        } else {
            for child in self.structure().children() {
                let child = NestedTensor::new(child.clone())?;
                for (j, item) in child.unbind(dim as i64 - 1)?.into_iter().enumerate() {
                    push(j, item.into_node());
                }
            }
        }
        unbound
            .into_iter()
            .map(|nodes| NestedTensor::new(NestedNode::Branch(nodes)).map(NestedItem::Nested))
            .collect()
    }

    /// Set `requires_grad` on every leaf and on the buffer.
    pub fn requires_grad_(&mut self, requires_grad: bool) -> &mut Self {
        match &mut self.repr {
            Repr::Buffered { buffer, views } => {
                buffer.set_requires_grad(requires_grad);
                for leaf in views.leaves_mut() {
                    leaf.set_requires_grad(requires_grad);
                }
            }
            Repr::Unbuffered(structure) => {
                for leaf in structure.leaves_mut() {
                    leaf.set_requires_grad(requires_grad);
                }
            }
        }
        self
    }

    /// Accumulated gradients, shaped like `self`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::UndefinedGradient` if any gradient is missing.
    pub fn grad(&self) -> Result<Self, TensorError> {
        match &self.repr {
            Repr::Buffered { buffer, .. } => {
                let grad = buffer.grad().ok_or(TensorError::UndefinedGradient)?;
                Ok(Self::assemble(grad.clone(), self.nested_size.clone()))
            }
            Repr::Unbuffered(structure) => {
                let grads = try_map(|t| t.grad().cloned().ok_or(TensorError::UndefinedGradient), structure)?;
                Ok(Self::unbuffered(grads))
            }
        }
    }

    /// Accumulate `gradient` into the gradient slots.
    ///
    /// A buffered tensor accumulates into its buffer in one call; otherwise
    /// each leaf accumulates its own gradient. Nothing is accumulated unless
    /// every leaf accepts its gradient.
    pub fn backward(&mut self, gradient: &NestedTensor<T>) -> Result<(), TensorError> {
        self.check_same_nested_size(gradient)?;
        match &mut self.repr {
            Repr::Buffered { buffer, .. } => {
                let gradient = gradient.to_contiguous();
                let flat = gradient.buffer().ok_or(TensorError::UndefinedGradient)?;
                buffer.backward(flat)
            }
            Repr::Unbuffered(structure) => {
                for (leaf, g) in structure.iter().zip(gradient.structure().iter()) {
                    leaf.check_backward(g)?;
                }
                for (leaf, g) in structure.leaves_mut().into_iter().zip(gradient.structure().iter()) {
                    leaf.backward(g)?;
                }
                Ok(())
            }
        }
    }

    /// Same data, detached from gradient tracking.
    pub fn detach(&self) -> Self {
        match &self.repr {
            Repr::Buffered { buffer, .. } => Self::assemble(buffer.detach(), self.nested_size.clone()),
            Repr::Unbuffered(structure) => Self::unbuffered(map(DenseTensor::detach, structure)),
        }
    }

    /// Pinned copy of every leaf.
    pub fn pin_memory(&self) -> Self {
        match &self.repr {
            Repr::Buffered { buffer, .. } if self.is_contiguous() => {
                Self::assemble(buffer.pin_memory(), self.nested_size.clone())
            }
            _ => Self::unbuffered(map(DenseTensor::pin_memory, self.structure())),
        }
    }

    /// Overwrite every leaf with the matching leaf of `source`.
    ///
    /// # Errors
    ///
    /// Fails, leaving `self` untouched, unless both have the same nested
    /// size.
    pub fn copy_(&mut self, source: &NestedTensor<T>) -> Result<(), TensorError> {
        self.check_same_nested_size(source)?;
        let values: Vec<T> = source.structure().iter().flat_map(DenseTensor::to_vec).collect();
        if self.update_buffer(|data, _| data.copy_from_slice(&values)) {
            return Ok(());
        }
        let leaves = self.unbuffered_leaves_mut();
        for (dest, src) in leaves.into_iter().zip(source.structure().iter()) {
            copy_into(dest, src)?;
        }
        Ok(())
    }

    /// Remove regular size-1 tensor dimensions in place.
    ///
    /// `Some(dim)` squeezes that dimension if every leaf has extent 1 there
    /// and is a no-op if none has. `None` squeezes every regular size-1
    /// tensor dimension.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::NestedDimensionUnsupported` for a nested
    /// dimension and `TensorError::IrregularDimension` if only some leaves
    /// have extent 1.
    pub fn squeeze_(&mut self, dim: Option<i64>) -> Result<&mut Self, TensorError> {
        let nested_dim = self.nested_dim();
        let sizes = self.sizes();
        let mut dims: Vec<usize> = match dim {
            Some(dim) => {
                let dim = self.wrap_dim(dim)?;
                if dim < nested_dim {
                    return Err(TensorError::NestedDimensionUnsupported { dim, nested_dim });
                }
                if sizes[dim] == Some(1) {
                    vec![dim - nested_dim]
                } else if self.nested_size.iter().any(|shape| shape[dim - nested_dim] == 1) {
                    return Err(TensorError::IrregularDimension { dim });
                } else {
                    Vec::new()
                }
            }
            None => (nested_dim..sizes.len())
                .filter(|&d| sizes[d] == Some(1))
                .map(|d| d - nested_dim)
                .collect(),
        };
        if dims.is_empty() {
            return Ok(self);
        }
        dims.sort_unstable_by(|a, b| b.cmp(a));

        let structure = match &mut self.repr {
            Repr::Buffered { views, .. } => views,
            Repr::Unbuffered(structure) => structure,
        };
        for leaf in structure.leaves_mut() {
            let mut squeezed = leaf.clone();
            for &d in &dims {
                squeezed = squeezed.squeeze(d)?;
            }
            *leaf = squeezed;
        }
        self.nested_size = map(|t: &DenseTensor<T>| t.shape().to_vec(), self.structure());
        Ok(self)
    }

    /// Fail unless `other` has exactly the same nested size.
    pub(crate) fn check_same_nested_size(&self, other: &NestedTensor<T>) -> Result<(), TensorError> {
        self.nested_size.check_congruent(&other.nested_size)?;
        for (lhs, rhs) in self.nested_size.iter().zip(other.nested_size.iter()) {
            if lhs != rhs {
                return Err(TensorError::IncompatibleShapes {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run `f` over the whole flat buffer, then rebuild the leaf views,
    /// keeping their gradient state. Returns `false` without calling `f` if
    /// the tensor is not buffer-backed.
    pub(crate) fn update_buffer<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut [T], &SizeNode),
    {
        let Repr::Buffered { buffer, views } = &mut self.repr else {
            return false;
        };
        let saved: Vec<_> = views
            .leaves_mut()
            .into_iter()
            .map(|leaf| (leaf.requires_grad(), leaf.take_grad()))
            .collect();
        // Views hold the buffer storage; release them so the write does not copy.
        *views = NestedNode::branch(Vec::new());
        f(buffer.data_mut(), &self.nested_size);
        let mut rebuilt = view_tree(buffer, &self.nested_size);
        for (leaf, (requires_grad, grad)) in rebuilt.leaves_mut().into_iter().zip(saved) {
            leaf.set_requires_grad(requires_grad);
            leaf.restore_grad(grad);
        }
        *views = rebuilt;
        true
    }

    /// Drop the buffer, giving every leaf its own storage, and return the
    /// leaves for in-place updates.
    pub(crate) fn unbuffered_leaves_mut(&mut self) -> Vec<&mut DenseTensor<T>> {
        if let Repr::Buffered { views, .. } = &self.repr {
            log::debug!("dropping the buffer of a nested tensor for a leaf-wise update");
            let owned = map(DenseTensor::deep_clone, views);
            self.repr = Repr::Unbuffered(owned);
        }
        match &mut self.repr {
            Repr::Unbuffered(structure) => structure.leaves_mut(),
            Repr::Buffered { views, .. } => views.leaves_mut(),
        }
    }

    /// Leaf-wise result of a fallible map over the leaves.
    pub(crate) fn try_map_leaves<F>(&self, f: F) -> Result<Self, TensorError>
    where
        F: FnMut(&DenseTensor<T>) -> Result<DenseTensor<T>, TensorError>,
    {
        NestedTensor::new(try_map(f, self.structure())?)
    }
}

impl<T: Scalar> PartialEq for NestedTensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.nested_size == other.nested_size
            && self
                .structure()
                .iter()
                .zip(other.structure().iter())
                .all(|(a, b)| a == b)
    }
}

impl<T: Scalar> fmt::Display for NestedTensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nested_tensor({})", self.structure())
    }
}
