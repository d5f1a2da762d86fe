//! # Shape Manipulation (`rules::shape`)

use mosaic_ir::{Attribute, OpKind, Type};
use mosaic_jaxpr::{lit_i32, Params, Primitive};

use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::{array_aval, unexpected_params, value_arg};
use crate::types::{dtype_to_ir_type, to_i64};
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::BroadcastInDim, broadcast_in_dim_rule);
    table.register(Primitive::Reshape, reshape_rule);
    table.register(Primitive::Squeeze, squeeze_rule);
    table.register(Primitive::Concatenate, concatenate_rule);
    table.register(Primitive::Iota, iota_rule);
    table.register(Primitive::Transpose, transpose_rule);
    table.register(Primitive::Slice, slice_rule);
    table.register(Primitive::Repeat, repeat_rule);
    table.register(Primitive::Roll, roll_rule);
}

fn broadcast_in_dim_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::BroadcastInDim {
        shape,
        broadcast_dimensions,
    } = params
    else {
        return Err(unexpected_params("broadcast_in_dim", params));
    };
    let in_aval = array_aval(ctx.in_aval(0)?)?.clone();
    let out_aval = array_aval(ctx.out_aval()?)?.clone();

    if in_aval.dtype.is_bool() {
        // Booleans sit in mask registers, which cannot be broadcast. Go
        // through i32 and compare back.
        let (shape, dims) = (shape.clone(), broadcast_dimensions.clone());
        return ctx
            .lower_fun1(args, |t, xs| {
                let as_int = t.select(&xs[0], &lit_i32(0), &lit_i32(1))?;
                let widened = t.broadcast_in_dim(&as_int, &shape, &dims)?;
                t.compare(Primitive::Eq, &widened, &lit_i32(1))
            })
            .map(RuleOutput::from);
    }

    let mut x = value_arg(&args, 0)?;
    if out_aval.shape.is_empty() {
        return Ok(x.into());
    }
    let element = dtype_to_ir_type(&out_aval.dtype, false)?;
    if !broadcast_dimensions.is_empty() {
        let mut expanded = vec![1i64; shape.len()];
        for (&dim, &size) in broadcast_dimensions.iter().zip(&in_aval.shape) {
            let slot = expanded.get_mut(dim).ok_or_else(|| {
                LoweringError::invalid_params(format!(
                    "broadcast dimension {} out of range for {:?}",
                    dim, shape
                ))
            })?;
            *slot = size as i64;
        }
        let ty = Type::vector(expanded.clone(), element.clone());
        x = ctx.builder.op(OpKind::ShapeCast).operand(x).value(ty);
        if expanded == to_i64(&out_aval.shape) {
            return Ok(x.into());
        }
    }
    let ty = Type::vector(to_i64(&out_aval.shape), element);
    Ok(ctx.builder.op(OpKind::VectorBroadcast).operand(x).value(ty).into())
}

/// Extracts the single element of a vector into a scalar register.
fn extract_scalar(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
) -> Result<RuleOutput, LoweringError> {
    let in_aval = array_aval(ctx.in_aval(0)?)?.clone();
    let out_aval = array_aval(ctx.out_aval()?)?.clone();
    if out_aval.dtype.itemsize() != Some(4) {
        return Err(LoweringError::invalid_params(format!(
            "Only arrays with 32-bit element types can be converted to scalars, but got: {}",
            out_aval.dtype
        )));
    }
    let x = value_arg(&args, 0)?;
    let ty = ctx.out_type()?;
    Ok(ctx
        .builder
        .op(OpKind::Extract)
        .operand(x)
        .attr("static_position", Attribute::DenseI64(vec![0; in_aval.ndim()]))
        .value(ty)
        .into())
}

fn reshape_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Reshape { dimensions, .. } = params else {
        return Err(unexpected_params("reshape", params));
    };
    if dimensions.is_some() {
        return Err(LoweringError::unsupported(
            "reshape with a dimension permutation",
        ));
    }
    let in_scalar = ctx.in_aval(0)?.shape().is_empty();
    let out_scalar = ctx.out_aval()?.shape().is_empty();
    match (in_scalar, out_scalar) {
        (true, true) => Ok(value_arg(&args, 0)?.into()),
        (false, true) => extract_scalar(ctx, args),
        (true, false) => {
            let x = value_arg(&args, 0)?;
            let ty = ctx.out_type()?;
            Ok(ctx.builder.op(OpKind::VectorBroadcast).operand(x).value(ty).into())
        }
        (false, false) => {
            let x = value_arg(&args, 0)?;
            let ty = ctx.out_type()?;
            Ok(ctx.builder.op(OpKind::ShapeCast).operand(x).value(ty).into())
        }
    }
}

fn squeeze_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    if ctx.out_aval()?.shape().is_empty() {
        return extract_scalar(ctx, args);
    }
    let x = value_arg(&args, 0)?;
    let ty = ctx.out_type()?;
    Ok(ctx.builder.op(OpKind::ShapeCast).operand(x).value(ty).into())
}

fn concatenate_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Concatenate { dimension } = params else {
        return Err(unexpected_params("concatenate", params));
    };
    let operands = args
        .iter()
        .map(Lowered::value)
        .collect::<Result<Vec<_>, _>>()?;
    let ty = ctx.out_type()?;
    Ok(ctx
        .builder
        .op(OpKind::Concatenate)
        .operands(&operands)
        .attr("dimension", Attribute::i32(*dimension as i64))
        .value(ty)
        .into())
}

fn iota_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Iota { dimension, .. } = params else {
        return Err(unexpected_params("iota", params));
    };
    let ty = ctx.out_type()?;
    Ok(ctx
        .builder
        .op(OpKind::Iota)
        .attr("dimension", Attribute::i32(*dimension as i64))
        .value(ty)
        .into())
}

fn transpose_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Transpose { permutation } = params else {
        return Err(unexpected_params("transpose", params));
    };
    if permutation.as_slice() != [1, 0] {
        return Err(LoweringError::unsupported(format!(
            "transpose with permutation {:?}; only 2D (1, 0) is supported",
            permutation
        )));
    }
    let x = value_arg(&args, 0)?;
    let ty = ctx.out_type()?;
    Ok(ctx
        .builder
        .op(OpKind::VectorTranspose)
        .operand(x)
        .attr("permutation", Attribute::DenseI64(vec![1, 0]))
        .value(ty)
        .into())
}

fn slice_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Slice {
        start_indices,
        limit_indices,
        strides,
    } = params
    else {
        return Err(unexpected_params("slice", params));
    };
    let strides = strides
        .clone()
        .unwrap_or_else(|| vec![1; start_indices.len()]);
    let sizes: Vec<i64> = start_indices
        .iter()
        .zip(limit_indices)
        .map(|(&start, &limit)| limit as i64 - start as i64)
        .collect();
    let x = value_arg(&args, 0)?;
    let ty = ctx.out_type()?;
    Ok(ctx
        .builder
        .op(OpKind::ExtractStridedSlice)
        .operand(x)
        .attr("offsets", Attribute::DenseI64(to_i64(start_indices)))
        .attr("sizes", Attribute::DenseI64(sizes))
        .attr("strides", Attribute::DenseI64(to_i64(&strides)))
        .value(ty)
        .into())
}

fn repeat_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Repeat { repeats, axis } = params else {
        return Err(unexpected_params("repeat", params));
    };
    let x = value_arg(&args, 0)?;
    let ty = ctx.out_type()?;
    Ok(ctx
        .builder
        .op(OpKind::Repeat)
        .operand(x)
        .attr("dimension", Attribute::i32(*axis as i64))
        .attr("times", Attribute::i32(*repeats as i64))
        .value(ty)
        .into())
}

fn roll_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Roll {
        axis,
        stride,
        stride_axis,
    } = params
    else {
        return Err(unexpected_params("roll", params));
    };
    let x = value_arg(&args, 0)?;
    let shift = value_arg(&args, 1)?;
    let ty = ctx.out_type()?;
    let mut op = ctx
        .builder
        .op(OpKind::DynamicRotate)
        .operand(x)
        .operand(shift)
        .attr("dimension", Attribute::i32(*axis as i64));
    if let Some(stride) = stride {
        op = op.attr("stride", Attribute::i32(*stride));
    }
    if let Some(stride_axis) = stride_axis {
        op = op.attr("stride_dimension", Attribute::i32(*stride_axis as i64));
    }
    Ok(op.value(ty).into())
}
