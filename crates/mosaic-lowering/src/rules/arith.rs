//! # Elementwise Arithmetic (`rules::arith`)
//!
//! Binary arithmetic, comparisons and bitwise operations. Most of these are
//! registered raw: a literal operand is only materialized once the type of
//! its peer is known, so that `i + 1` on an `index` loop counter stays in
//! `index` and a weakly typed literal adopts the dtype of the array it is
//! combined with.

use mosaic_ir::{Attribute, OpKind, Type, Value};
use mosaic_jaxpr::{lit, lit_i32, DType, Literal, Params, Primitive, Scalar, ShapedArray};

use crate::constant::ir_constant;
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::{arg, array_aval, value_arg};
use crate::types::{dtype_to_ir_type, to_i64};
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register_raw(Primitive::Add, add_rule);
    table.register_raw(Primitive::AddAny, add_rule);
    table.register_raw(Primitive::Sub, sub_rule);
    table.register_raw(Primitive::Mul, mul_rule);
    table.register_raw(Primitive::Div, div_rule);
    table.register_raw(Primitive::Rem, rem_rule);
    table.register_raw(Primitive::Max, max_rule);
    table.register_raw(Primitive::Min, min_rule);
    table.register_raw(Primitive::And, and_rule);
    table.register_raw(Primitive::Or, or_rule);
    table.register_raw(Primitive::Xor, xor_rule);
    table.register_raw(Primitive::ShiftLeft, shift_left_rule);
    table.register_raw(Primitive::ShiftRightArithmetic, shift_right_arithmetic_rule);
    table.register_raw(Primitive::ShiftRightLogical, shift_right_logical_rule);
    table.register_raw(Primitive::Neg, neg_rule);
    for primitive in [
        Primitive::Eq,
        Primitive::Ne,
        Primitive::Lt,
        Primitive::Le,
        Primitive::Gt,
        Primitive::Ge,
    ] {
        table.register_raw(primitive, compare_rule);
    }
    table.register(Primitive::Not, not_rule);
    table.register(Primitive::SelectN, select_n_rule);
    table.register(Primitive::Sign, sign_rule);
    table.register(Primitive::IntegerPow, integer_pow_rule);
    table.register(Primitive::Clamp, clamp_rule);
}

// --- Operand broadcasting ---

/// Input avals of a binary op with weak types resolved against each other.
fn joined_avals(ctx: &RuleContext<'_>) -> Result<(ShapedArray, ShapedArray), LoweringError> {
    let mut x = array_aval(ctx.in_aval(0)?)?.clone();
    let mut y = array_aval(ctx.in_aval(1)?)?.clone();
    if x.weak_type {
        x.dtype = y.dtype.clone();
    } else if y.weak_type {
        y.dtype = x.dtype.clone();
    }
    Ok((x, y))
}

fn materialize(
    ctx: &mut RuleContext<'_>,
    operand: Lowered,
    aval: &ShapedArray,
    peer: &Lowered,
) -> Result<Value, LoweringError> {
    match operand {
        Lowered::Host(literal) => {
            let ty = match peer {
                Lowered::Value(p) if ctx.value_type(*p).is_index() => Type::Index,
                _ => dtype_to_ir_type(&aval.dtype, false)?,
            };
            ir_constant(ctx.builder, literal.value, Some(ty))
        }
        other => other.value(),
    }
}

fn broadcast_to_out(
    ctx: &mut RuleContext<'_>,
    value: Value,
    aval: &ShapedArray,
    out_shape: &[usize],
) -> Result<Value, LoweringError> {
    if aval.shape == out_shape {
        return Ok(value);
    }
    let ty = Type::vector(to_i64(out_shape), dtype_to_ir_type(&aval.dtype, false)?);
    Ok(ctx.builder.op(OpKind::VectorBroadcast).operand(value).value(ty))
}

/// Materializes and broadcasts both operands of a binary op to its output
/// shape.
pub(crate) fn bcast(
    ctx: &mut RuleContext<'_>,
    x: Lowered,
    y: Lowered,
) -> Result<(Value, Value), LoweringError> {
    let (x_aval, y_aval) = joined_avals(ctx)?;
    let out_shape = ctx.out_aval()?.shape().to_vec();
    let x = materialize(ctx, x, &x_aval, &y)?;
    let y = materialize(ctx, y, &y_aval, &Lowered::Value(x))?;
    let x = broadcast_to_out(ctx, x, &x_aval, &out_shape)?;
    let y = broadcast_to_out(ctx, y, &y_aval, &out_shape)?;
    Ok((x, y))
}

// --- Binary arithmetic ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumericClass {
    Signed,
    Unsigned,
    Float,
}

fn classify(dtype: &DType) -> Result<NumericClass, LoweringError> {
    if dtype.is_float() {
        Ok(NumericClass::Float)
    } else if dtype.is_unsigned_int() {
        Ok(NumericClass::Unsigned)
    } else if dtype.is_signed_int() || dtype.is_bool() {
        Ok(NumericClass::Signed)
    } else {
        Err(LoweringError::UnsupportedType(format!(
            "elementwise arithmetic on {}",
            dtype
        )))
    }
}

fn lower_binary(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    signed: OpKind,
    unsigned: OpKind,
    float: Option<OpKind>,
) -> Result<RuleOutput, LoweringError> {
    let (x_aval, _) = joined_avals(ctx)?;
    let (x, y) = bcast(ctx, arg(&args, 0)?, arg(&args, 1)?)?;
    let kind = match classify(&x_aval.dtype)? {
        NumericClass::Signed => signed,
        NumericClass::Unsigned => unsigned,
        NumericClass::Float => float.ok_or_else(|| {
            LoweringError::UnsupportedType(format!("{} on floating point operands", signed))
        })?,
    };
    let ty = ctx.value_type(x);
    Ok(ctx.builder.op(kind).operand(x).operand(y).value(ty).into())
}

macro_rules! binary_rule {
    ($name:ident, $signed:ident, $unsigned:ident, $float:expr) => {
        fn $name(
            ctx: &mut RuleContext<'_>,
            args: Vec<Lowered>,
            _: &Params,
        ) -> Result<RuleOutput, LoweringError> {
            lower_binary(ctx, args, OpKind::$signed, OpKind::$unsigned, $float)
        }
    };
}

binary_rule!(add_rule, AddI, AddI, Some(OpKind::AddF));
binary_rule!(sub_rule, SubI, SubI, Some(OpKind::SubF));
binary_rule!(mul_rule, MulI, MulI, Some(OpKind::MulF));
binary_rule!(div_rule, DivSI, DivUI, Some(OpKind::DivF));
binary_rule!(rem_rule, RemSI, RemUI, Some(OpKind::RemF));
binary_rule!(max_rule, MaxSI, MaxUI, Some(OpKind::MaximumF));
binary_rule!(min_rule, MinSI, MinUI, Some(OpKind::MinimumF));
binary_rule!(and_rule, AndI, AndI, None);
binary_rule!(or_rule, OrI, OrI, None);
binary_rule!(xor_rule, XOrI, XOrI, None);
binary_rule!(shift_left_rule, ShLI, ShLI, None);
binary_rule!(shift_right_arithmetic_rule, ShRSI, ShRSI, None);
binary_rule!(shift_right_logical_rule, ShRUI, ShRUI, None);

/// `neg(x)` is `0 - x`.
fn neg_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let aval = array_aval(ctx.in_aval(0)?)?.clone();
    let x = materialize(ctx, arg(&args, 0)?, &aval, &Lowered::Host(zero_literal(&aval.dtype)))?;
    let ty = ctx.value_type(x);
    let zero = ir_constant(ctx.builder, zero_literal(&aval.dtype).value, Some(ty.clone()))?;
    let kind = match classify(&aval.dtype)? {
        NumericClass::Float => OpKind::SubF,
        _ => OpKind::SubI,
    };
    Ok(ctx.builder.op(kind).operand(zero).operand(x).value(ty).into())
}

fn zero_literal(dtype: &DType) -> Literal {
    let value = if dtype.is_float() {
        Scalar::Float(0.0)
    } else {
        Scalar::Int(0)
    };
    Literal::new(value, dtype.clone())
}

// --- Comparisons ---

/// `arith.cmpi` predicate for a comparison primitive.
fn cmpi_predicate(primitive: Primitive, unsigned: bool) -> Option<i64> {
    let signed = match primitive {
        Primitive::Eq => return Some(0),
        Primitive::Ne => return Some(1),
        Primitive::Lt => 2,
        Primitive::Le => 3,
        Primitive::Gt => 4,
        Primitive::Ge => 5,
        _ => return None,
    };
    Some(if unsigned { signed + 4 } else { signed })
}

/// Ordered `arith.cmpf` predicate for a comparison primitive.
fn cmpf_predicate(primitive: Primitive) -> Option<i64> {
    match primitive {
        Primitive::Eq => Some(1),
        Primitive::Ne => Some(6),
        Primitive::Lt => Some(4),
        Primitive::Le => Some(5),
        Primitive::Gt => Some(2),
        Primitive::Ge => Some(3),
        _ => None,
    }
}

fn compare_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let primitive = ctx.primitive;
    let (x_aval, y_aval) = joined_avals(ctx)?;
    if x_aval.dtype != y_aval.dtype {
        return Err(LoweringError::invalid_params(format!(
            "Mixed dtype operands in cmp: {}, {}",
            x_aval.dtype, y_aval.dtype
        )));
    }
    if x_aval.dtype.is_bool() {
        // Booleans live in mask registers; compare them as integers.
        return ctx
            .lower_fun1(args, |t, xs| {
                let x = t.select(&xs[0], &lit_i32(0), &lit_i32(1))?;
                let y = t.select(&xs[1], &lit_i32(0), &lit_i32(1))?;
                t.compare(primitive, &x, &y)
            })
            .map(RuleOutput::from);
    }
    let (x, y) = bcast(ctx, arg(&args, 0)?, arg(&args, 1)?)?;
    let out_ty = ctx.out_type()?;
    let (kind, predicate) = match classify(&x_aval.dtype)? {
        NumericClass::Float => (OpKind::CmpF, cmpf_predicate(primitive)),
        class => (
            OpKind::CmpI,
            cmpi_predicate(primitive, class == NumericClass::Unsigned),
        ),
    };
    let predicate = predicate
        .ok_or_else(|| LoweringError::internal(format!("{} is not a comparison", primitive)))?;
    Ok(ctx
        .builder
        .op(kind)
        .operand(x)
        .operand(y)
        .attr("predicate", Attribute::i64(predicate))
        .value(out_ty)
        .into())
}

// --- Bitwise ---

/// `not` is `xor x, -1`, which covers both integers and booleans.
fn not_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let x = value_arg(&args, 0)?;
    let out_ty = ctx.out_type()?;
    let minus_one = ir_constant(ctx.builder, Scalar::Int(-1), Some(out_ty.clone()))?;
    Ok(ctx
        .builder
        .op(OpKind::XOrI)
        .operand(x)
        .operand(minus_one)
        .value(out_ty)
        .into())
}

fn select_n_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    if args.len() > 3 {
        return Err(LoweringError::unsupported(
            "select_n only supported with <= 2 arguments",
        ));
    }
    let pred_aval = array_aval(ctx.in_aval(0)?)?.clone();
    let mut pred = value_arg(&args, 0)?;
    if !pred_aval.dtype.is_bool() {
        let block_shape = ctx.block_shapes.first().cloned().flatten();
        let outs = ctx.lower_fun_with(
            &[pred_aval.clone().into()],
            vec![block_shape],
            vec![Lowered::Value(pred)],
            |t, xs| {
                let zero = lit(Scalar::Int(0), pred_aval.dtype.clone());
                Ok(vec![t.compare(Primitive::Ne, &xs[0], &zero)?])
            },
        )?;
        pred = outs
            .first()
            .ok_or_else(|| LoweringError::internal("predicate helper has no output"))?
            .value()?;
    }
    let on_false = value_arg(&args, 1)?;
    if args.len() == 2 {
        return Ok(on_false.into());
    }
    let on_true = value_arg(&args, 2)?;
    let ty = ctx.value_type(on_false);
    Ok(ctx
        .builder
        .op(OpKind::Select)
        .operand(pred)
        .operand(on_true)
        .operand(on_false)
        .value(ty)
        .into())
}

// --- Helpers lowered through other primitives ---

fn sign_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let dtype = ctx.in_aval(0)?.dtype();
    if !(dtype.is_integer() || dtype.is_float()) {
        return Err(LoweringError::UnsupportedType(format!("sign of {}", dtype)));
    }
    ctx.lower_fun1(args, |t, xs| {
        let x = &xs[0];
        let zero = lit(zero_literal(&dtype).value, dtype.clone());
        if dtype.is_unsigned_int() {
            let is_zero = t.compare(Primitive::Eq, x, &zero)?;
            let one = lit(Scalar::Int(1), dtype.clone());
            return t.select(&is_zero, &one, &zero);
        }
        let positive = t.compare(Primitive::Gt, x, &zero)?;
        let negative = t.compare(Primitive::Lt, x, &zero)?;
        let positive = t.convert(&positive, dtype.clone())?;
        let negative = t.convert(&negative, dtype.clone())?;
        let sign = t.binary(Primitive::Sub, &positive, &negative)?;
        if dtype.is_float() {
            let is_nan = t.compare(Primitive::Ne, x, x)?;
            let nan = lit(Scalar::Float(f64::NAN), dtype.clone());
            return t.select(&is_nan, &sign, &nan);
        }
        Ok(sign)
    })
    .map(RuleOutput::from)
}

/// `x ** y` for a static integer `y`, by repeated squaring.
fn integer_pow_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::IntegerPow { y } = params else {
        return Err(crate::rules::unexpected_params("integer_pow", params));
    };
    let y = *y;
    let aval = array_aval(ctx.in_aval(0)?)?.clone();
    let one = if aval.dtype.is_float() {
        Scalar::Float(1.0)
    } else {
        Scalar::Int(1)
    };
    ctx.lower_fun1(args, |t, xs| {
        let one = lit(one, aval.dtype.clone());
        if y == 0 {
            return t.broadcast_to(&one, &aval.shape);
        }
        let mut base = xs[0].clone();
        let mut exponent = y.unsigned_abs();
        let mut acc = None;
        while exponent > 0 {
            if exponent & 1 == 1 {
                acc = Some(match acc {
                    None => base.clone(),
                    Some(acc) => t.binary(Primitive::Mul, &acc, &base)?,
                });
            }
            exponent >>= 1;
            if exponent > 0 {
                base = t.binary(Primitive::Mul, &base, &base)?;
            }
        }
        let acc = acc.unwrap_or(base);
        if y < 0 {
            t.binary(Primitive::Div, &one, &acc)
        } else {
            Ok(acc)
        }
    })
    .map(RuleOutput::from)
}

/// `clamp(lo, x, hi)` is `min(max(x, lo), hi)`.
fn clamp_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    ctx.lower_fun1(args, |t, xs| {
        let lower = t.binary(Primitive::Max, &xs[1], &xs[0])?;
        t.binary(Primitive::Min, &lower, &xs[2])
    })
    .map(RuleOutput::from)
}
