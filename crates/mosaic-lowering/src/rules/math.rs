//! # Transcendental Functions (`rules::math`)
//!
//! Most unary functions map one-to-one onto the `math` dialect. `exp2`,
//! `erf_inv` and `logistic` are expanded here.

use mosaic_ir::{OpKind, Type};
use mosaic_jaxpr::{lit_f32, DType, Params, Primitive, RoundingMethod, Scalar};

use crate::constant::ir_constant;
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::arith::bcast;
use crate::rules::{arg, unexpected_params, value_arg};
use crate::types::{dtype_to_ir_type, to_i64};
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::Abs, abs_rule);
    table.register(Primitive::Exp, exp_rule);
    table.register(Primitive::Log, log_rule);
    table.register(Primitive::Log1p, log1p_rule);
    table.register(Primitive::Sqrt, sqrt_rule);
    table.register(Primitive::Rsqrt, rsqrt_rule);
    table.register(Primitive::Sin, sin_rule);
    table.register(Primitive::Tanh, tanh_rule);
    table.register(Primitive::Exp2, exp2_rule);
    table.register(Primitive::Logistic, logistic_rule);
    table.register(Primitive::Round, round_rule);
    table.register(Primitive::ErfInv, erf_inv_rule);
    table.register_raw(Primitive::Pow, pow_rule);
}

fn unary(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    kind: OpKind,
) -> Result<RuleOutput, LoweringError> {
    let x = value_arg(&args, 0)?;
    let ty = ctx.out_type()?;
    Ok(ctx.builder.op(kind).operand(x).value(ty).into())
}

macro_rules! unary_rule {
    ($name:ident, $kind:ident) => {
        fn $name(
            ctx: &mut RuleContext<'_>,
            args: Vec<Lowered>,
            _: &Params,
        ) -> Result<RuleOutput, LoweringError> {
            unary(ctx, args, OpKind::$kind)
        }
    };
}

unary_rule!(exp_rule, Exp);
unary_rule!(log_rule, Log);
unary_rule!(log1p_rule, Log1p);
unary_rule!(sqrt_rule, Sqrt);
unary_rule!(rsqrt_rule, Rsqrt);
unary_rule!(sin_rule, Sin);
unary_rule!(tanh_rule, Tanh);

fn abs_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let dtype = ctx.in_aval(0)?.dtype();
    if dtype.is_integer() {
        unary(ctx, args, OpKind::AbsI)
    } else if dtype.is_float() {
        unary(ctx, args, OpKind::AbsF)
    } else {
        Err(LoweringError::UnsupportedType(format!("abs of {}", dtype)))
    }
}

/// `exp2(x)` is `exp(ln 2 * x)`, matching what XLA emits.
fn exp2_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    ctx.lower_fun1(args, |t, xs| {
        let scaled = t.binary(Primitive::Mul, &lit_f32(std::f64::consts::LN_2), &xs[0])?;
        t.unary(Primitive::Exp, &scaled)
    })
    .map(RuleOutput::from)
}

fn logistic_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let x = value_arg(&args, 0)?;
    let out_ty = ctx.out_type()?;
    let neg = ctx.builder.op(OpKind::NegF).operand(x).value(out_ty.clone());
    let exp = ctx.builder.op(OpKind::Exp).operand(neg).value(out_ty.clone());
    let one = ir_constant(ctx.builder, Scalar::Float(1.0), Some(out_ty.clone()))?;
    let denom = ctx
        .builder
        .op(OpKind::AddF)
        .operand(one)
        .operand(exp)
        .value(out_ty.clone());
    Ok(ctx
        .builder
        .op(OpKind::DivF)
        .operand(one)
        .operand(denom)
        .value(out_ty)
        .into())
}

/// `pow(2.0, y)` with a literal base becomes `exp2(y)`.
fn pow_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let base_is_two = matches!(
        args.first(),
        Some(Lowered::Host(lit)) if lit.value.as_f64() == 2.0
    );
    if base_is_two {
        let y_aval = ctx.in_aval(1)?.clone();
        let y = crate::constant::ensure_value(ctx.builder, arg(&args, 1)?, &y_aval)?.value()?;
        let out_aval = ctx.out_aval()?.clone();
        let y = if y_aval.shape() != out_aval.shape() {
            let ty = Type::vector(
                to_i64(out_aval.shape()),
                dtype_to_ir_type(&out_aval.dtype(), false)?,
            );
            ctx.builder.op(OpKind::VectorBroadcast).operand(y).value(ty)
        } else {
            y
        };
        let ty = ctx.out_type()?;
        return Ok(ctx.builder.op(OpKind::Exp2).operand(y).value(ty).into());
    }
    let (x, y) = bcast(ctx, arg(&args, 0)?, arg(&args, 1)?)?;
    let ty = ctx.value_type(x);
    Ok(ctx.builder.op(OpKind::PowF).operand(x).operand(y).value(ty).into())
}

fn round_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Round { method } = params else {
        return Err(unexpected_params("round", params));
    };
    match method {
        RoundingMethod::AwayFromZero => unary(ctx, args, OpKind::Round),
        RoundingMethod::ToNearestEven => unary(ctx, args, OpKind::RoundEven),
    }
}

// Polynomial coefficients of the single precision inverse error function,
// for `w < 5` and `w >= 5` respectively.
const ERF_INV_W_LT_5: [f64; 9] = [
    2.81022636e-08,
    3.43273939e-07,
    -3.5233877e-06,
    -4.39150654e-06,
    0.00021858087,
    -0.00125372503,
    -0.00417768164,
    0.246640727,
    1.50140941,
];
const ERF_INV_W_GT_5: [f64; 9] = [
    -0.000200214257,
    0.000100950558,
    0.00134934322,
    -0.00367342844,
    0.00573950773,
    -0.0076224613,
    0.00943887047,
    1.00167406,
    2.83297682,
];

fn erf_inv_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let dtype = ctx.in_aval(0)?.dtype();
    if dtype != DType::F32 {
        return Err(LoweringError::unsupported(format!(
            "erf_inv is only implemented for float32, got {}",
            dtype
        )));
    }
    ctx.lower_fun1(args, |t, xs| {
        let x = &xs[0];
        let x_sq = t.binary(Primitive::Mul, x, x)?;
        let neg_x_sq = t.unary(Primitive::Neg, &x_sq)?;
        let w = t.unary(Primitive::Log1p, &neg_x_sq)?;
        let w = t.unary(Primitive::Neg, &w)?;
        let small = t.compare(Primitive::Lt, &w, &lit_f32(5.0))?;

        let w_small = t.binary(Primitive::Sub, &w, &lit_f32(2.5))?;
        let w_large = t.unary(Primitive::Sqrt, &w)?;
        let w_large = t.binary(Primitive::Sub, &w_large, &lit_f32(3.0))?;
        let w = t.select(&small, &w_large, &w_small)?;

        let coefficient = |t: &mut mosaic_jaxpr::Tracer, i: usize| {
            t.select(&small, &lit_f32(ERF_INV_W_GT_5[i]), &lit_f32(ERF_INV_W_LT_5[i]))
        };
        let mut p = coefficient(t, 0)?;
        for i in 1..ERF_INV_W_LT_5.len() {
            let c = coefficient(t, i)?;
            let pw = t.binary(Primitive::Mul, &p, &w)?;
            p = t.binary(Primitive::Add, &c, &pw)?;
        }

        // erf_inv(+-1) is +-inf.
        let abs_x = t.unary(Primitive::Abs, x)?;
        let at_pole = t.compare(Primitive::Eq, &abs_x, &lit_f32(1.0))?;
        let inf = t.binary(Primitive::Mul, &lit_f32(f64::INFINITY), x)?;
        let px = t.binary(Primitive::Mul, &p, x)?;
        t.select(&at_pole, &px, &inf)
    })
    .map(RuleOutput::from)
}
