//! Structured indexers used by reference-consuming primitives.
//!
//! Dynamic parts of an indexer do not carry values themselves. They name
//! the position of an equation input holding the scalar, so the lowering
//! can resolve them through its environment like any other operand.

use serde::{Deserialize, Serialize};

/// A scalar index component: a static integer or a dynamic equation input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOperand {
    Static(i64),
    Dynamic(usize),
}

/// Number of elements a slice covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceSize {
    Static(usize),
    Dynamic(usize),
}

/// A strided window `[start, start + size * stride)` along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    pub start: IndexOperand,
    pub size: SliceSize,
    #[serde(default = "unit_stride")]
    pub stride: usize,
}

fn unit_stride() -> usize {
    1
}

impl Slice {
    /// The whole of a dimension of length `size`.
    pub fn full(size: usize) -> Self {
        Slice {
            start: IndexOperand::Static(0),
            size: SliceSize::Static(size),
            stride: 1,
        }
    }

    pub fn new(start: IndexOperand, size: usize, stride: usize) -> Self {
        Slice {
            start,
            size: SliceSize::Static(size),
            stride,
        }
    }
}

/// One entry of an [`NDIndexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Index {
    /// A scalar index; the dimension is squeezed away.
    Scalar(IndexOperand),
    Slice(Slice),
    /// An integer array index (gather-style), given as an equation input.
    Array(usize),
}

impl Index {
    pub fn is_slice(&self) -> bool {
        matches!(self, Index::Slice(_))
    }
}

/// A per-dimension indexer over an array of `shape`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NDIndexer {
    pub indices: Vec<Index>,
    pub shape: Vec<usize>,
}

impl NDIndexer {
    /// Indexer selecting the whole of an array of `shape`.
    pub fn full(shape: &[usize]) -> Self {
        NDIndexer {
            indices: shape.iter().map(|&d| Index::Slice(Slice::full(d))).collect(),
            shape: shape.to_vec(),
        }
    }

    /// True if this indexer selects every element of `shape` in order.
    pub fn is_full(&self, shape: &[usize]) -> bool {
        self.indices.len() == shape.len()
            && self.indices.iter().zip(shape).all(|(idx, &dim)| {
                matches!(idx, Index::Slice(s) if *s == Slice::full(dim))
            })
    }

    /// Static shape of the indexed result, `None` for dynamically sized dims.
    pub fn result_shape(&self) -> Vec<Option<usize>> {
        self.indices
            .iter()
            .filter_map(|idx| match idx {
                Index::Slice(s) => Some(match s.size {
                    SliceSize::Static(n) => Some(n),
                    SliceSize::Dynamic(_) => None,
                }),
                _ => None,
            })
            .collect()
    }
}

/// A reference operand of an equation together with the indexers applied to it.
///
/// Indexers apply in order; all but the last narrow the reference, the last
/// one selects what is accessed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefOperand {
    pub operand: usize,
    #[serde(default)]
    pub indexers: Vec<NDIndexer>,
}

impl RefOperand {
    pub fn whole(operand: usize) -> Self {
        RefOperand {
            operand,
            indexers: Vec::new(),
        }
    }

    pub fn indexed(operand: usize, indexers: Vec<NDIndexer>) -> Self {
        RefOperand { operand, indexers }
    }
}

/// How a device id argument is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceIdType {
    /// Coordinates along every mesh axis.
    Mesh,
    /// An already linear device id.
    Logical,
}

/// Device id operands of a remote synchronization or copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdOperand {
    pub kind: DeviceIdType,
    pub operands: Vec<usize>,
}
