//! # Lowering Contexts (`mosaic_lowering::context`)
//!
//! Three layers of state travel with a lowering:
//!
//! - [`GridContext`] is fixed for the whole kernel: the grid, its axis
//!   names, which dimensions are mapped, and the mesh. It is shared behind
//!   an `Rc` by every nested context.
//! - [`LoweringContext`] is per jaxpr: the block shapes of its inputs, the
//!   user-visible grid indices, and the name stack it was entered under.
//!   Nested jaxprs get a modified copy; the parent is never mutated.
//! - [`RuleContext`] is per equation: input and output avals, input block
//!   shapes, and the builder to emit into.

use std::rc::Rc;

use mosaic_ir::{Builder, Type, Value};
use mosaic_jaxpr::{AbstractValue, GridDim, Jaxpr, Primitive};

use crate::dispatch::jaxpr_subcomp;
use crate::error::LoweringError;
use crate::grid::MeshContext;
use crate::types::aval_to_ir_type;
use crate::value::{BlockShape, Lowered};

/// Kernel-wide facts shared by every nested context.
#[derive(Debug, Clone, Default)]
pub struct GridContext {
    pub grid_sizes: Vec<GridDim>,
    pub grid_names: Option<Vec<String>>,
    /// Grid dimensions introduced by batching; invisible to the kernel body.
    pub mapped_dims: Vec<usize>,
    pub mesh_context: Option<MeshContext>,
    pub for_verification: bool,
}

impl GridContext {
    /// Position of `name` among the grid axis names.
    pub fn grid_axis(&self, name: &str) -> Option<usize> {
        self.grid_names
            .as_ref()
            .and_then(|names| names.iter().position(|n| n == name))
    }
}

#[derive(Debug, Clone)]
pub struct LoweringContext {
    pub grid: Rc<GridContext>,
    /// Grid indices with mapped dimensions removed. `None` inside index-map
    /// transforms, where grid queries are not meaningful.
    pub user_grid_indices: Option<Vec<Value>>,
    /// One entry per jaxpr input.
    pub block_shapes: Vec<Option<BlockShape>>,
    pub name_stack: Vec<String>,
}

impl LoweringContext {
    pub fn new(grid: Rc<GridContext>, block_shapes: Vec<Option<BlockShape>>) -> Self {
        LoweringContext {
            grid,
            user_grid_indices: None,
            block_shapes,
            name_stack: Vec::new(),
        }
    }

    /// A context for a nested jaxpr with different input block shapes.
    pub fn with_block_shapes(&self, block_shapes: Vec<Option<BlockShape>>) -> Self {
        LoweringContext {
            block_shapes,
            ..self.clone()
        }
    }
}

/// Everything a lowering rule sees about the equation it lowers.
pub struct RuleContext<'a> {
    pub primitive: Primitive,
    pub lowering: &'a LoweringContext,
    pub builder: &'a mut Builder,
    pub avals_in: Vec<AbstractValue>,
    pub avals_out: Vec<AbstractValue>,
    pub block_shapes: Vec<Option<BlockShape>>,
    /// Full name stack of the equation being lowered.
    pub name_stack: Vec<String>,
}

impl<'a> RuleContext<'a> {
    pub fn grid(&self) -> &GridContext {
        &self.lowering.grid
    }

    pub fn in_aval(&self, i: usize) -> Result<&AbstractValue, LoweringError> {
        self.avals_in
            .get(i)
            .ok_or_else(|| LoweringError::internal(format!("missing input aval {}", i)))
    }

    pub fn out_aval(&self) -> Result<&AbstractValue, LoweringError> {
        self.avals_out
            .first()
            .ok_or_else(|| LoweringError::internal("rule has no output aval"))
    }

    /// Dialect type of the single output.
    pub fn out_type(&self) -> Result<Type, LoweringError> {
        aval_to_ir_type(self.out_aval()?, None, None, false)
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.builder.value_type(value).clone()
    }

    /// Block shape of input `i`, which must be known.
    pub fn block_shape(&self, i: usize) -> Result<BlockShape, LoweringError> {
        self.block_shapes
            .get(i)
            .cloned()
            .flatten()
            .ok_or_else(|| LoweringError::internal(format!("no block shape for input {}", i)))
    }

    /// The context a nested jaxpr is lowered under.
    pub fn nested(&self, block_shapes: Vec<Option<BlockShape>>) -> LoweringContext {
        LoweringContext {
            block_shapes,
            name_stack: self.name_stack.clone(),
            ..self.lowering.clone()
        }
    }

    /// Lowers `jaxpr` inline at the current insertion point.
    pub fn subcomp(
        &mut self,
        jaxpr: &Jaxpr,
        block_shapes: Vec<Option<BlockShape>>,
        args: Vec<Lowered>,
    ) -> Result<Vec<Lowered>, LoweringError> {
        let ctx = self.nested(block_shapes);
        jaxpr_subcomp(&ctx, self.builder, jaxpr, args)
    }

    /// Like [`subcomp`](Self::subcomp) but requires every result to be a
    /// plain value.
    pub fn subcomp_values(
        &mut self,
        jaxpr: &Jaxpr,
        block_shapes: Vec<Option<BlockShape>>,
        args: Vec<Lowered>,
    ) -> Result<Vec<Value>, LoweringError> {
        self.subcomp(jaxpr, block_shapes, args)?
            .iter()
            .map(Lowered::value)
            .collect()
    }
}
