//! # Grid and Device Queries (`rules::program`)

use mosaic_ir::{Attribute, OpKind, Type, Value};
use mosaic_jaxpr::{Params, Primitive};

use crate::constant::i32_constant;
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::unexpected_params;
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::ProgramId, program_id_rule);
    table.register(Primitive::NumPrograms, num_programs_rule);
    table.register(Primitive::AxisIndex, axis_index_rule);
    table.register(Primitive::DeviceId, device_id_rule);
}

fn grid_axis(params: &Params, primitive: &str) -> Result<usize, LoweringError> {
    match params {
        Params::GridAxis { axis } => Ok(*axis),
        other => Err(unexpected_params(primitive, other)),
    }
}

/// Index of the current program along user grid axis `axis`.
fn program_id(ctx: &RuleContext<'_>, axis: usize) -> Result<Value, LoweringError> {
    let indices = ctx.lowering.user_grid_indices.as_ref().ok_or_else(|| {
        LoweringError::Configuration(format!(
            "program id: {} was passed, but user did not provide a grid.",
            axis
        ))
    })?;
    indices.get(axis).copied().ok_or_else(|| {
        LoweringError::invalid_params(format!(
            "user passed in program id with axis: {}, but grid only has {} axis.",
            axis,
            indices.len()
        ))
    })
}

fn program_id_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let axis = grid_axis(params, "program_id")?;
    Ok(program_id(ctx, axis)?.into())
}

/// Position of user axis `axis` in the full grid, skipping vmapped dims.
fn physical_grid_dim(ctx: &RuleContext<'_>, axis: usize) -> Option<usize> {
    let grid = ctx.grid();
    (0..grid.grid_sizes.len())
        .filter(|dim| !grid.mapped_dims.contains(dim))
        .nth(axis)
}

fn num_programs_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let axis = grid_axis(params, "num_programs")?;
    let dim = physical_grid_dim(ctx, axis).ok_or_else(|| {
        LoweringError::invalid_params(format!(
            "user passed in program id with axis: {}, but grid only has {} axis.",
            axis,
            ctx.grid().grid_sizes.len() - ctx.grid().mapped_dims.len()
        ))
    })?;
    Ok(ctx
        .builder
        .op(OpKind::IterationBound)
        .attr("dimension", Attribute::i32(dim as i64))
        .value(Type::i32())
        .into())
}

fn device_id(ctx: &mut RuleContext<'_>) -> Value {
    ctx.builder.op(OpKind::DeviceId).value(Type::i32())
}

fn device_id_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    Ok(device_id(ctx).into())
}

/// Product of the mesh dimensions minor to `axis`.
fn minor_size(mesh_shape: &[usize], axis: usize) -> usize {
    mesh_shape[axis + 1..].iter().product()
}

fn axis_index_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::AxisIndex { axis_name } = params else {
        return Err(unexpected_params("axis_index", params));
    };
    if let Some(axis) = ctx.grid().grid_axis(axis_name) {
        return Ok(program_id(ctx, axis)?.into());
    }
    let mesh = ctx
        .grid()
        .mesh_context
        .clone()
        .ok_or_else(|| LoweringError::Configuration("Mesh context is not set.".to_string()))?;
    let axis = mesh.axis(axis_name).ok_or_else(|| {
        LoweringError::invalid_params(format!(
            "axis name {} is neither a grid axis nor a mesh axis",
            axis_name
        ))
    })?;
    let device = device_id(ctx);
    let minor = i32_constant(ctx.builder, minor_size(&mesh.mesh_shape, axis) as i64)?;
    let size = i32_constant(ctx.builder, mesh.mesh_shape[axis] as i64)?;
    let major = ctx
        .builder
        .op(OpKind::DivSI)
        .operand(device)
        .operand(minor)
        .value(Type::i32());
    Ok(ctx
        .builder
        .op(OpKind::RemSI)
        .operand(major)
        .operand(size)
        .value(Type::i32())
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_size_multiplies_trailing_axes() {
        assert_eq!(minor_size(&[2, 4, 8], 0), 32);
        assert_eq!(minor_size(&[2, 4, 8], 1), 8);
        assert_eq!(minor_size(&[2, 4, 8], 2), 1);
    }
}
