//! # Reductions (`rules::reductions`)
//!
//! Float reductions lower to `vector.multi_reduction` with a splat of the
//! identity as accumulator. Reducing to a scalar goes through a helper that
//! adds a leading unit dimension, reduces everything else and squeezes the
//! result into a scalar register. Boolean `and`/`or` reductions are float
//! `min`/`max` reductions in disguise.

use mosaic_ir::{Attribute, OpKind};
use mosaic_jaxpr::{lit_f32, DType, Params, Primitive, Scalar};

use crate::constant::ir_constant;
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::{array_aval, unexpected_params, value_arg};
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::ReduceMax, reduce_rule);
    table.register(Primitive::ReduceMin, reduce_rule);
    table.register(Primitive::ReduceSum, reduce_rule);
    table.register(Primitive::ReduceAnd, reduce_and_rule);
    table.register(Primitive::ReduceOr, reduce_or_rule);
}

/// Combining kind and identity element of a float reduction.
fn reduction_kind(primitive: Primitive) -> Option<(&'static str, f64)> {
    match primitive {
        Primitive::ReduceMax => Some(("maximumf", f64::NEG_INFINITY)),
        Primitive::ReduceMin => Some(("minimumf", f64::INFINITY)),
        Primitive::ReduceSum => Some(("add", 0.0)),
        _ => None,
    }
}

fn reduce_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Axes { axes } = params else {
        return Err(unexpected_params("reduce", params));
    };
    let primitive = ctx.primitive;
    let x_aval = array_aval(ctx.in_aval(0)?)?.clone();

    if ctx.out_aval()?.shape().is_empty() {
        let mut expanded = vec![1];
        expanded.extend_from_slice(&x_aval.shape);
        let shifted: Vec<usize> = axes.iter().map(|a| a + 1).collect();
        return ctx
            .lower_fun1(args, |t, xs| {
                let x = t.reshape(&xs[0], &expanded)?;
                let reduced = t.reduce(primitive, &x, &shifted)?;
                t.squeeze(&reduced, &[0])
            })
            .map(RuleOutput::from);
    }

    if x_aval.dtype.is_integer() {
        return Err(LoweringError::unsupported(
            "Reductions over integers not implemented.",
        ));
    }
    if !x_aval.dtype.is_float() {
        return Err(LoweringError::unsupported(format!(
            "Reductions over {} not implemented.",
            x_aval.dtype
        )));
    }
    let (kind, identity) = reduction_kind(primitive)
        .ok_or_else(|| LoweringError::internal(format!("{} is not a reduction", primitive)))?;
    let x = value_arg(&args, 0)?;
    let out_ty = ctx.out_type()?;
    let acc = ir_constant(ctx.builder, Scalar::Float(identity), Some(out_ty.clone()))?;
    let axes: Vec<i64> = axes.iter().map(|&a| a as i64).collect();
    Ok(ctx
        .builder
        .op(OpKind::MultiReduction)
        .operand(x)
        .operand(acc)
        .attr("kind", Attribute::opaque(format!("#vector.kind<{}>", kind)))
        .attr("reduction_dims", Attribute::DenseI64(axes))
        .value(out_ty)
        .into())
}

/// Reduces a boolean array as `f32` and compares the result with zero.
fn boolean_reduction(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
    via: Primitive,
) -> Result<RuleOutput, LoweringError> {
    let Params::Axes { axes } = params else {
        return Err(unexpected_params("boolean reduction", params));
    };
    let axes = axes.clone();
    ctx.lower_fun1(args, |t, xs| {
        let as_float = t.convert(&xs[0], DType::F32)?;
        let reduced = t.reduce(via, &as_float, &axes)?;
        t.compare(Primitive::Gt, &reduced, &lit_f32(0.0))
    })
    .map(RuleOutput::from)
}

fn reduce_and_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    boolean_reduction(ctx, args, params, Primitive::ReduceMin)
}

fn reduce_or_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    boolean_reduction(ctx, args, params, Primitive::ReduceMax)
}
