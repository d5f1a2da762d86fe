//! # Grid Mapping (`mosaic_lowering::grid`)
//!
//! Derives the kernel function signature from a [`GridMapping`]: one `i32`
//! per grid dimension, then scalar prefetch operands, windowed operands and
//! scratch operands, in that order. Also fixes the per-dimension scheduling
//! semantics and, when the kernel communicates, the mesh geometry.

use mosaic_ir::{Attribute, Type, Value};
use mosaic_jaxpr::{
    AbstractValue, BlockMapping, DimensionSemantics, GridDim, GridMapping, Jaxpr, Mesh,
};

use crate::error::LoweringError;
use crate::types::aval_to_ir_type;
use crate::value::{block_shape_of, BlockShape, Extent};

/// Mesh geometry needed to translate between mesh and logical device ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshContext {
    pub mesh_shape: Vec<usize>,
    pub axis_names: Vec<String>,
    /// Row-major strides of `mesh_shape`.
    pub mesh_strides: Vec<usize>,
}

impl MeshContext {
    pub fn new(mesh: &Mesh) -> Self {
        MeshContext {
            mesh_shape: mesh.shape.clone(),
            axis_names: mesh.axis_names.clone(),
            mesh_strides: strides_from_shape(&mesh.shape),
        }
    }

    pub fn axis(&self, name: &str) -> Option<usize> {
        self.axis_names.iter().position(|n| n == name)
    }
}

pub fn strides_from_shape(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

#[derive(Debug, Clone)]
pub struct MosaicGridMapping {
    pub grid: Vec<GridDim>,
    pub grid_names: Option<Vec<String>>,
    pub block_mappings: Vec<BlockMapping>,
    pub mapped_dims: Vec<usize>,
    pub grid_types: Vec<Type>,
    pub scalar_prefetch_types: Vec<Type>,
    pub operand_types: Vec<Type>,
    pub scratch_types: Vec<Type>,
    pub scalar_prefetch_block_shapes: Vec<Option<BlockShape>>,
    pub operand_block_shapes: Vec<Option<BlockShape>>,
    pub scratch_block_shapes: Vec<Option<BlockShape>>,
    /// One entry per grid dimension, mapped dimensions included.
    pub dimension_semantics: Vec<DimensionSemantics>,
    pub has_communication: bool,
    pub mesh_context: Option<MeshContext>,
}

/// Type and block shape of one kernel operand.
fn arg_type(
    aval: &AbstractValue,
    block_mapping: Option<&BlockMapping>,
) -> Result<(Type, Option<BlockShape>), LoweringError> {
    if let AbstractValue::Semaphore(_) = aval {
        return Ok((aval_to_ir_type(aval, None, None, true)?, None));
    }
    let memory_space = aval.memory_space();
    match block_mapping {
        None => {
            let ty = aval_to_ir_type(aval, None, memory_space, true)?;
            let block_shape = if aval.dtype().is_semaphore() {
                None
            } else {
                Some(block_shape_of(aval.shape()))
            };
            Ok((ty, block_shape))
        }
        Some(bm) => {
            let shape: Vec<usize> = bm.block_shape.iter().map(|b| b.size()).collect();
            let ty = aval_to_ir_type(aval, Some(&shape), memory_space, true)?;
            let block_shape = bm.block_shape.iter().map(|&b| Extent::from(b)).collect();
            Ok((ty, Some(block_shape)))
        }
    }
}

fn nonlocal_axes(jaxpr: &Jaxpr, grid_names: Option<&[String]>) -> Vec<String> {
    jaxpr
        .named_axes()
        .into_iter()
        .filter(|name| grid_names.map_or(true, |names| !names.contains(name)))
        .collect()
}

impl MosaicGridMapping {
    pub fn new(
        jaxpr: &Jaxpr,
        grid_mapping: &GridMapping,
        dimension_semantics: Option<&[DimensionSemantics]>,
        mesh: Option<&Mesh>,
        default_semantics: DimensionSemantics,
    ) -> Result<Self, LoweringError> {
        let in_avals = jaxpr.in_avals();
        let expected = grid_mapping.slice_scratch_ops().end;
        if in_avals.len() != expected {
            return Err(LoweringError::Configuration(format!(
                "kernel takes {} operands but the grid mapping describes {}",
                in_avals.len(),
                expected
            )));
        }
        if grid_mapping.block_mappings.len() != grid_mapping.slice_block_ops().len() {
            return Err(LoweringError::Configuration(format!(
                "{} block mappings for {} windowed operands",
                grid_mapping.block_mappings.len(),
                grid_mapping.slice_block_ops().len()
            )));
        }

        let mapped_dims = grid_mapping.vmapped_dims.clone();
        let user_rank = (0..grid_mapping.grid.len())
            .filter(|i| !mapped_dims.contains(i))
            .count();
        let user_semantics = match dimension_semantics {
            Some(given) if given.len() != user_rank => {
                return Err(LoweringError::Configuration(format!(
                    "Must have dimension semantics for each dimension of the grid: got {} for a grid of rank {}",
                    given.len(),
                    user_rank
                )))
            }
            Some(given) => given.to_vec(),
            None => vec![default_semantics; user_rank],
        };
        let mut user_iter = user_semantics.into_iter();
        let dimension_semantics = (0..grid_mapping.grid.len())
            .map(|i| {
                if mapped_dims.contains(&i) {
                    DimensionSemantics::Parallel
                } else {
                    user_iter.next().unwrap_or(default_semantics)
                }
            })
            .collect();

        let mut scalar_prefetch_types = Vec::new();
        let mut scalar_prefetch_block_shapes = Vec::new();
        for aval in &in_avals[grid_mapping.slice_index_ops()] {
            let (ty, bs) = arg_type(aval, None)?;
            scalar_prefetch_types.push(ty);
            scalar_prefetch_block_shapes.push(bs);
        }
        let mut operand_types = Vec::new();
        let mut operand_block_shapes = Vec::new();
        for (aval, bm) in in_avals[grid_mapping.slice_block_ops()]
            .iter()
            .zip(&grid_mapping.block_mappings)
        {
            let (ty, bs) = arg_type(aval, Some(bm))?;
            operand_types.push(ty);
            operand_block_shapes.push(bs);
        }
        let mut scratch_types = Vec::new();
        let mut scratch_block_shapes = Vec::new();
        for aval in &in_avals[grid_mapping.slice_scratch_ops()] {
            let (ty, bs) = arg_type(aval, None)?;
            scratch_types.push(ty);
            scratch_block_shapes.push(bs);
        }

        let grid_names = grid_mapping.grid_names.clone();
        let mut axes = nonlocal_axes(jaxpr, grid_names.as_deref());
        for bm in &grid_mapping.block_mappings {
            for name in nonlocal_axes(&bm.index_map_jaxpr, grid_names.as_deref()) {
                if !axes.contains(&name) {
                    axes.push(name);
                }
            }
        }
        let has_communication = !axes.is_empty();
        let mesh_context = if has_communication {
            let mesh = mesh.ok_or_else(|| {
                LoweringError::Configuration(format!(
                    "Cannot use communication in pallas_call without shard_map (axes {:?})",
                    axes
                ))
            })?;
            if let Some(names) = &grid_names {
                if let Some(shadowed) = mesh.axis_names.iter().find(|a| names.contains(a)) {
                    return Err(LoweringError::Configuration(format!(
                        "Cannot shadow mesh axis `{}` with a grid name",
                        shadowed
                    )));
                }
            }
            Some(MeshContext::new(mesh))
        } else {
            None
        };

        log::debug!(
            "grid {:?} with {} scalar prefetch, {} windowed and {} scratch operands",
            grid_mapping.grid,
            scalar_prefetch_types.len(),
            operand_types.len(),
            scratch_types.len()
        );

        Ok(MosaicGridMapping {
            grid: grid_mapping.grid.clone(),
            grid_names,
            block_mappings: grid_mapping.block_mappings.clone(),
            mapped_dims,
            grid_types: vec![Type::i32(); grid_mapping.grid.len()],
            scalar_prefetch_types,
            operand_types,
            scratch_types,
            scalar_prefetch_block_shapes,
            operand_block_shapes,
            scratch_block_shapes,
            dimension_semantics,
            has_communication,
            mesh_context,
        })
    }

    /// Types of extra runtime arguments the caller must prepend; none are
    /// needed on this target.
    pub fn extra_args(&self) -> Vec<Type> {
        Vec::new()
    }

    /// Grid indices visible to the kernel body.
    pub fn user_grid_indices(&self, indices: &[Value]) -> Vec<Value> {
        indices
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.mapped_dims.contains(i))
            .map(|(_, &v)| v)
            .collect()
    }

    /// `iteration_bounds` with dynamic dimensions as the dynamic sentinel.
    pub fn static_grid(&self) -> Vec<i64> {
        self.grid
            .iter()
            .map(|d| match d {
                GridDim::Static(n) => *n as i64,
                GridDim::Dynamic => i64::MIN,
            })
            .collect()
    }

    pub fn dimension_semantics_attr(&self) -> Attribute {
        Attribute::Array(
            self.dimension_semantics
                .iter()
                .map(|s| Attribute::opaque(format!("#tpu.dimension_semantics<{}>", s)))
                .collect(),
        )
    }
}
