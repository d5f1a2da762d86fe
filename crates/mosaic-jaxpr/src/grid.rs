//! Grid-mapping descriptors handed to the lowering alongside the kernel jaxpr.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::aval::{AbstractRef, MemorySpace};
use crate::dtype::DType;
use crate::jaxpr::{Atom, Jaxpr, Scalar};

/// Size of one grid dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridDim {
    Static(usize),
    /// Only known when the kernel is launched.
    Dynamic,
}

/// One dimension of a block shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockDim {
    /// A size-1 dimension squeezed out of the kernel's view of the block.
    Mapped,
    Block(usize),
}

impl BlockDim {
    /// The block size, counting mapped dims as 1.
    pub fn size(self) -> usize {
        match self {
            BlockDim::Mapped => 1,
            BlockDim::Block(n) => n,
        }
    }
}

impl fmt::Display for BlockDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockDim::Mapped => write!(f, "None"),
            BlockDim::Block(n) => write!(f, "{}", n),
        }
    }
}

/// How index-map outputs address the array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingMode {
    /// Index-map outputs are block indices.
    #[default]
    Blocked,
    /// Index-map outputs are element offsets; the array may be padded.
    Unblocked {
        #[serde(default)]
        padding: Option<Vec<(i64, i64)>>,
    },
}

/// How one kernel operand is windowed at every grid step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMapping {
    pub block_shape: Vec<BlockDim>,
    pub array_shape: Vec<usize>,
    pub array_dtype: DType,
    /// Type of the kernel's view of the block.
    pub block_aval: AbstractRef,
    /// Maps grid indices (and scalar prefetch refs) to block indices.
    pub index_map_jaxpr: Jaxpr,
    #[serde(default)]
    pub indexing_mode: IndexingMode,
    /// Human readable description of the operand, for diagnostics.
    #[serde(default)]
    pub origin: String,
}

impl BlockMapping {
    pub fn memory_space(&self) -> Option<MemorySpace> {
        self.block_aval.memory_space
    }

    /// Whether every grid step sees the whole array at offset zero.
    pub fn has_trivial_window(&self) -> bool {
        let whole = self
            .block_shape
            .iter()
            .zip(&self.array_shape)
            .all(|(bd, &ad)| matches!(bd, BlockDim::Mapped) || bd.size() == ad);
        let at_zero = self.index_map_jaxpr.outvars.iter().all(|out| {
            matches!(out, Atom::Literal(lit) if matches!(lit.value, Scalar::Int(0)))
        });
        whole && at_zero
    }
}

/// Grid geometry and operand layout of one kernel invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMapping {
    pub grid: Vec<GridDim>,
    #[serde(default)]
    pub grid_names: Option<Vec<String>>,
    pub block_mappings: Vec<BlockMapping>,
    /// Grid dimensions introduced by batching rather than by the user.
    #[serde(default)]
    pub vmapped_dims: Vec<usize>,
    #[serde(default)]
    pub num_index_operands: usize,
    pub num_inputs: usize,
    pub num_outputs: usize,
    #[serde(default)]
    pub num_scratch_operands: usize,
}

impl GridMapping {
    /// Kernel invars holding scalar prefetch operands.
    pub fn slice_index_ops(&self) -> Range<usize> {
        0..self.num_index_operands
    }

    /// Kernel invars holding windowed inputs and outputs.
    pub fn slice_block_ops(&self) -> Range<usize> {
        let start = self.num_index_operands;
        start..start + self.num_inputs + self.num_outputs
    }

    /// Kernel invars holding scratch operands.
    pub fn slice_scratch_ops(&self) -> Range<usize> {
        let start = self.slice_block_ops().end;
        start..start + self.num_scratch_operands
    }

    pub fn num_dynamic_grid_bounds(&self) -> usize {
        self.grid
            .iter()
            .filter(|d| matches!(d, GridDim::Dynamic))
            .count()
    }
}

/// A logical device mesh: named axes with sizes, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mesh {
    pub axis_names: Vec<String>,
    pub shape: Vec<usize>,
}

impl Mesh {
    pub fn new(axes: &[(&str, usize)]) -> Self {
        Mesh {
            axis_names: axes.iter().map(|(n, _)| n.to_string()).collect(),
            shape: axes.iter().map(|(_, s)| *s).collect(),
        }
    }
}

/// Scheduling semantics of one grid dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionSemantics {
    Parallel,
    #[default]
    Arbitrary,
}

impl fmt::Display for DimensionSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionSemantics::Parallel => write!(f, "parallel"),
            DimensionSemantics::Arbitrary => write!(f, "arbitrary"),
        }
    }
}

impl std::str::FromStr for DimensionSemantics {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(DimensionSemantics::Parallel),
            "arbitrary" => Ok(DimensionSemantics::Arbitrary),
            other => Err(format!("unknown dimension semantics `{}`", other)),
        }
    }
}
