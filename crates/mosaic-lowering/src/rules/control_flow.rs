//! # Structured Control Flow (`rules::control_flow`)
//!
//! Every loop kind funnels into [`lower_jaxpr_to_for_loop`], which either
//! unrolls a static loop completely or emits one `scf.for`:
//!
//! - `for` discharges value-typed state and unrolls in software.
//! - `scan` must be a counted loop in disguise, see
//!   [`match_scan_to_fori`](crate::patterns::match_scan_to_fori).
//! - `while` is tried as a counted loop first and otherwise becomes an
//!   `scf.while` with a condition region and a body region.
//!
//! `cond` becomes a cascade of two-way `scf.if`s. Calls are inlined, and
//! `run_scoped` allocates its temporaries inside a `tpu.region` so their
//! lifetime ends with the region.

use mosaic_ir::{Attribute, OpKind, Type, Value};
use mosaic_jaxpr::{AbstractValue, DType, Jaxpr, Params, Primitive, Scalar};

use crate::constant::{ensure_value, int_constant, ir_constant};
use crate::context::RuleContext;
use crate::discharge::discharge_iteration;
use crate::error::LoweringError;
use crate::patterns::{match_scan_to_fori, match_while_to_fori};
use crate::registry::RuleTable;
use crate::rules::{unexpected_params, value_arg};
use crate::types::{aval_to_ir_type, dtype_to_ir_type};
use crate::value::{block_shape_of, BlockShape, Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::For, for_rule);
    table.register_raw(Primitive::Scan, scan_rule);
    table.register(Primitive::While, while_rule);
    table.register(Primitive::Cond, cond_rule);
    table.register(Primitive::Pjit, call_rule);
    table.register(Primitive::ClosedCall, call_rule);
    table.register(Primitive::CustomJvpCall, call_rule);
    table.register(Primitive::RunScoped, run_scoped_rule);
}

/// A loop bound known either at compile time or only at run time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Bound {
    Static(i64),
    Dynamic(Value),
}

impl Bound {
    fn from_lowered(lowered: &Lowered) -> Result<Bound, LoweringError> {
        match lowered {
            Lowered::Host(lit) => lit.value.as_i64().map(Bound::Static).ok_or_else(|| {
                LoweringError::invalid_params(format!("non-integer loop bound {}", lit.value))
            }),
            other => Ok(Bound::Dynamic(other.value()?)),
        }
    }

    fn materialize(self, ctx: &mut RuleContext<'_>, ty: &Type) -> Result<Value, LoweringError> {
        match self {
            Bound::Static(n) => int_constant(ctx.builder, n, ty.clone()),
            Bound::Dynamic(v) => Ok(v),
        }
    }
}

fn yield_values(ctx: &mut RuleContext<'_>, kind: OpKind, values: &[Value]) {
    ctx.builder.op(kind).operands(values).build();
}

fn value_types(ctx: &RuleContext<'_>, values: &[Value]) -> Vec<Type> {
    values.iter().map(|v| ctx.value_type(*v)).collect()
}

fn values(lowered: &[Lowered]) -> Result<Vec<Value>, LoweringError> {
    lowered.iter().map(Lowered::value).collect()
}

struct LoopBody<'j> {
    jaxpr: &'j Jaxpr,
    block_shapes: &'j [Option<BlockShape>],
    consts: &'j [Lowered],
    has_loop_index: bool,
}

impl LoopBody<'_> {
    /// Lowers one iteration with loop index `i`, returning the next carries.
    fn run(
        &self,
        ctx: &mut RuleContext<'_>,
        i: Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, LoweringError> {
        let mut inputs = self.consts.to_vec();
        if self.has_loop_index {
            inputs.push(Lowered::Value(i));
        }
        inputs.extend(args.into_iter().map(Lowered::Value));
        ctx.subcomp_values(self.jaxpr, self.block_shapes.to_vec(), inputs)
    }
}

/// Lowers a counted loop running `jaxpr` for `num_steps` iterations.
///
/// The body takes `[consts, index, carries]`, or `[consts, carries]` when
/// `has_loop_index` is false, and returns the next carries. `block_shapes`
/// lines up with the body inputs.
#[allow(clippy::too_many_arguments)]
pub(crate) fn lower_jaxpr_to_for_loop(
    ctx: &mut RuleContext<'_>,
    jaxpr: &Jaxpr,
    block_shapes: Vec<Option<BlockShape>>,
    start: Bound,
    num_steps: Bound,
    consts: &[Lowered],
    args: Vec<Value>,
    has_loop_index: bool,
    unroll: usize,
) -> Result<Vec<Value>, LoweringError> {
    let body = LoopBody {
        jaxpr,
        block_shapes: &block_shapes,
        consts,
        has_loop_index,
    };
    // The index takes the type of a dynamic bound, else the body's index input.
    let index_ty = match (start, num_steps) {
        (Bound::Dynamic(v), _) | (_, Bound::Dynamic(v)) => ctx.value_type(v),
        _ => match jaxpr.invars.get(consts.len()).filter(|_| has_loop_index) {
            Some(index) => dtype_to_ir_type(&index.aval.dtype(), false)?,
            None => Type::i32(),
        },
    };

    if let (Bound::Static(start), Bound::Static(steps)) = (start, num_steps) {
        if steps >= 0 && steps as usize == unroll {
            log::debug!("fully unrolling a loop of {} steps", steps);
            let mut args = args;
            for i in start..start + steps {
                let index = int_constant(ctx.builder, i, index_ty.clone())?;
                args = body.run(ctx, index, args)?;
            }
            return Ok(args);
        }
    }
    if unroll != 1 {
        let steps = match num_steps {
            Bound::Static(n) => n.to_string(),
            Bound::Dynamic(_) => "<dynamic>".to_string(),
        };
        return Err(LoweringError::UnimplementedUnroll(format!(
            "Only unroll={} and unroll=1 supported. Got unroll={}.",
            steps, unroll
        )));
    }

    let lower = start.materialize(ctx, &index_ty)?;
    let steps = num_steps.materialize(ctx, &index_ty)?;
    let upper = ctx
        .builder
        .op(OpKind::AddI)
        .operand(lower)
        .operand(steps)
        .value(index_ty.clone());
    let step = int_constant(ctx.builder, 1, index_ty.clone())?;

    let carry_types = value_types(ctx, &args);
    let mut block_types = vec![index_ty];
    block_types.extend(carry_types.iter().cloned());
    let block_args = ctx.builder.open_block(&block_types);
    let out = body.run(ctx, block_args[0], block_args[1..].to_vec())?;
    yield_values(ctx, OpKind::Yield, &out);
    let region = ctx.builder.close_region()?;

    Ok(ctx
        .builder
        .op(OpKind::For)
        .operand(lower)
        .operand(upper)
        .operand(step)
        .operands(&args)
        .region(region)
        .results(carry_types)
        .build())
}

// --- Loops ---

fn for_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::For {
        jaxpr,
        nsteps,
        reverse,
        unroll,
    } = params
    else {
        return Err(unexpected_params("for", params));
    };
    if *unroll != 1 && unroll != nsteps {
        return Err(LoweringError::UnimplementedUnroll(format!(
            "Only unroll={} and unroll=1 supported. Got unroll={}.",
            nsteps, unroll
        )));
    }
    let should_discharge: Vec<bool> = ctx.avals_in.iter().map(|a| !a.is_ref()).collect();
    let mut mask = vec![false];
    mask.extend_from_slice(&should_discharge);
    let block_shapes = ctx.block_shapes.clone();

    let mut args = args;
    for step in 0..*nsteps {
        let i = if *reverse { nsteps - step - 1 } else { step };
        let body = discharge_iteration(jaxpr, &mask, i as i64)?;
        let discharged = ctx.subcomp(&body, block_shapes.clone(), args.clone())?;
        let mut discharged = discharged.into_iter();
        args = args
            .into_iter()
            .zip(&should_discharge)
            .map(|(arg, &replaced)| {
                if replaced {
                    discharged.next().ok_or_else(|| {
                        LoweringError::internal("discharged loop body returned too few values")
                    })
                } else {
                    Ok(arg)
                }
            })
            .collect::<Result<_, _>>()?;
    }
    Ok(args.into())
}

fn scan_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Scan {
        jaxpr,
        num_consts,
        num_carry,
        length,
        reverse,
        unroll,
    } = params
    else {
        return Err(unexpected_params("scan", params));
    };
    let (num_consts, num_carry) = (*num_consts, *num_carry);
    if args.len() != num_consts + num_carry {
        return Err(LoweringError::UnimplementedScan(format!(
            "scan with {} extensive inputs",
            args.len().saturating_sub(num_consts + num_carry)
        )));
    }
    if *reverse {
        return Err(LoweringError::UnimplementedScan(
            "reverse scans are not supported".to_string(),
        ));
    }
    let (body, has_loop_index) = match_scan_to_fori(jaxpr, num_consts, num_carry)?;

    let avals = ctx.avals_in.clone();
    let mut consts = Vec::with_capacity(num_consts);
    for (arg, aval) in args[..num_consts].iter().zip(&avals) {
        consts.push(ensure_value(ctx.builder, arg.clone(), aval)?);
    }
    let mut carry = &args[num_consts..];
    let mut carry_avals = &avals[num_consts..];
    let start = if has_loop_index {
        let start = Bound::from_lowered(&carry[0])?;
        carry = &carry[1..];
        carry_avals = &carry_avals[1..];
        start
    } else {
        Bound::Static(0)
    };
    let mut carried = Vec::with_capacity(carry.len());
    for (arg, aval) in carry.iter().zip(carry_avals) {
        carried.push(ensure_value(ctx.builder, arg.clone(), aval)?.value()?);
    }

    let block_shapes = ctx.block_shapes.clone();
    let out = lower_jaxpr_to_for_loop(
        ctx,
        &body,
        block_shapes,
        start,
        Bound::Static(*length as i64),
        &consts,
        carried,
        has_loop_index,
        *unroll,
    )?;
    if !has_loop_index {
        return Ok(out.into());
    }
    let index_ty = dtype_to_ir_type(&avals[num_consts].dtype(), false)?;
    let end = match start {
        Bound::Static(s) => int_constant(ctx.builder, s + *length as i64, index_ty)?,
        Bound::Dynamic(v) => {
            let length = int_constant(ctx.builder, *length as i64, index_ty)?;
            let ty = ctx.value_type(v);
            ctx.builder.op(OpKind::AddI).operand(v).operand(length).value(ty)
        }
    };
    let mut results = vec![end];
    results.extend(out);
    Ok(results.into())
}

fn while_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::While {
        cond_jaxpr,
        body_jaxpr,
        cond_nconsts,
        body_nconsts,
    } = params
    else {
        return Err(unexpected_params("while", params));
    };
    let (cn, bn) = (*cond_nconsts, *body_nconsts);
    if args.len() < cn + bn {
        return Err(LoweringError::internal("while loop with too few operands"));
    }

    match match_while_to_fori(cond_jaxpr, cn, body_jaxpr, bn) {
        Ok(fori) => {
            let carry = values(&args[cn + bn..])?;
            let (lower, upper) = match carry.as_slice() {
                [lower, upper, ..] => (*lower, *upper),
                _ => return Err(LoweringError::internal("fori loop without bounds")),
            };
            let ty = ctx.value_type(upper);
            let steps = ctx
                .builder
                .op(OpKind::SubI)
                .operand(upper)
                .operand(lower)
                .value(ty);
            let mut block_shapes: Vec<_> = ctx.block_shapes[cn..cn + bn + 1].to_vec();
            block_shapes.extend(ctx.block_shapes[cn + bn + 2..].iter().cloned());
            let consts = args[cn..cn + bn].to_vec();
            let out = lower_jaxpr_to_for_loop(
                ctx,
                &fori,
                block_shapes,
                Bound::Dynamic(lower),
                Bound::Dynamic(steps),
                &consts,
                carry[2..].to_vec(),
                true,
                1,
            )?;
            let mut results = vec![upper, upper];
            results.extend(out);
            return Ok(results.into());
        }
        Err(reason) => log::debug!("lowering while loop as scf.while: {}", reason),
    }

    let cond_consts = &args[..cn];
    let body_consts = &args[cn..cn + bn];
    let carry = values(&args[cn + bn..])?;
    let cond_const_shapes = &ctx.block_shapes[..cn];
    let body_const_shapes = &ctx.block_shapes[cn..cn + bn];
    let carry_shapes = &ctx.block_shapes[cn + bn..];
    let cond_shapes: Vec<_> = cond_const_shapes.iter().chain(carry_shapes).cloned().collect();
    let body_shapes: Vec<_> = body_const_shapes.iter().chain(carry_shapes).cloned().collect();
    let carry_types = value_types(ctx, &carry);

    let before_args = ctx.builder.open_block(&carry_types);
    let mut cond_inputs = cond_consts.to_vec();
    cond_inputs.extend(before_args.iter().map(|v| Lowered::Value(*v)));
    let keep_going = match ctx.subcomp_values(cond_jaxpr, cond_shapes, cond_inputs)?.as_slice() {
        [single] => *single,
        other => {
            return Err(LoweringError::internal(format!(
                "while condition returned {} values",
                other.len()
            )))
        }
    };
    ctx.builder
        .op(OpKind::Condition)
        .operand(keep_going)
        .operands(&before_args)
        .build();
    let before = ctx.builder.close_region()?;

    let after_args = ctx.builder.open_block(&carry_types);
    let mut body_inputs = body_consts.to_vec();
    body_inputs.extend(after_args.iter().map(|v| Lowered::Value(*v)));
    let next = ctx.subcomp_values(body_jaxpr, body_shapes, body_inputs)?;
    yield_values(ctx, OpKind::Yield, &next);
    let after = ctx.builder.close_region()?;

    Ok(ctx
        .builder
        .op(OpKind::While)
        .operands(&carry)
        .region(before)
        .region(after)
        .results(carry_types)
        .build()
        .into())
}

// --- Branches and calls ---

fn out_types(ctx: &RuleContext<'_>) -> Result<Vec<Type>, LoweringError> {
    ctx.avals_out
        .iter()
        .map(|a| aval_to_ir_type(a, None, None, false))
        .collect()
}

/// Lowers `branches` as nested `scf.if`s selecting branch `index`.
fn lower_cond_cascade(
    ctx: &mut RuleContext<'_>,
    index: Value,
    args: &[Lowered],
    branches: &[Jaxpr],
    block_shapes: &[Option<BlockShape>],
    result_types: &[Type],
) -> Result<Vec<Value>, LoweringError> {
    let index_ty = ctx.value_type(index);
    let zero = ir_constant(ctx.builder, Scalar::Int(0), Some(index_ty.clone()))?;
    let pred = ctx
        .builder
        .op(OpKind::CmpI)
        .operand(index)
        .operand(zero)
        .attr("predicate", Attribute::i64(1))
        .value(Type::i1());

    ctx.builder.open_block(&[]);
    let taken = if branches.len() > 2 {
        let one = ir_constant(ctx.builder, Scalar::Int(1), Some(index_ty.clone()))?;
        let rest = ctx
            .builder
            .op(OpKind::SubI)
            .operand(index)
            .operand(one)
            .value(index_ty);
        lower_cond_cascade(ctx, rest, args, &branches[1..], block_shapes, result_types)?
    } else {
        ctx.subcomp_values(&branches[1], block_shapes.to_vec(), args.to_vec())?
    };
    yield_values(ctx, OpKind::Yield, &taken);
    let then_region = ctx.builder.close_region()?;

    ctx.builder.open_block(&[]);
    let fallthrough = ctx.subcomp_values(&branches[0], block_shapes.to_vec(), args.to_vec())?;
    yield_values(ctx, OpKind::Yield, &fallthrough);
    let else_region = ctx.builder.close_region()?;

    Ok(ctx
        .builder
        .op(OpKind::If)
        .operand(pred)
        .region(then_region)
        .region(else_region)
        .results(result_types.iter().cloned())
        .build())
}

fn cond_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Cond { branches } = params else {
        return Err(unexpected_params("cond", params));
    };
    let block_shapes = ctx.block_shapes.get(1..).unwrap_or_default().to_vec();
    let operands = args.get(1..).unwrap_or_default().to_vec();
    match branches.as_slice() {
        [] => Err(LoweringError::invalid_params("cond without branches")),
        [only] => Ok(ctx.subcomp(only, block_shapes, operands)?.into()),
        _ => {
            let index = value_arg(&args, 0)?;
            let result_types = out_types(ctx)?;
            let out =
                lower_cond_cascade(ctx, index, &operands, branches, &block_shapes, &result_types)?;
            Ok(out.into())
        }
    }
}

/// `pjit`, `closed_call` and `custom_jvp_call` are inlined.
fn call_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Call {
        jaxpr,
        num_consts,
        symbolic_zeros,
    } = params
    else {
        return Err(unexpected_params("call", params));
    };
    if ctx.primitive == Primitive::CustomJvpCall {
        if *symbolic_zeros {
            return Err(LoweringError::unsupported(
                "custom_jvp_call with symbolic zeros",
            ));
        }
        if *num_consts != 0 {
            return Err(LoweringError::unsupported("custom_jvp_call with consts"));
        }
    }
    let block_shapes = ctx.block_shapes.clone();
    Ok(ctx.subcomp(jaxpr, block_shapes, args)?.into())
}

// --- Scoped allocation ---

/// Allocates storage for one scoped temporary.
fn alloc_value(ctx: &mut RuleContext<'_>, aval: &AbstractValue) -> Result<Value, LoweringError> {
    match aval {
        AbstractValue::Ref(r) if matches!(r.inner.dtype, DType::Semaphore(_)) => {
            let ty = aval_to_ir_type(aval, None, None, true)?;
            Ok(ctx.builder.op(OpKind::SemAlloc).value(ty))
        }
        AbstractValue::Semaphore(_) => {
            let ty = aval_to_ir_type(aval, None, None, true)?;
            Ok(ctx.builder.op(OpKind::SemAlloc).value(ty))
        }
        AbstractValue::Ref(r) => {
            // Validates the element type before allocating.
            dtype_to_ir_type(&r.inner.dtype, true)?;
            let ty = aval_to_ir_type(aval, None, None, true)?;
            Ok(ctx.builder.op(OpKind::Alloca).value(ty))
        }
        AbstractValue::Array(_) => Err(LoweringError::unsupported(format!(
            "Cannot allocate {}.",
            aval
        ))),
    }
}

fn run_scoped_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::RunScoped { jaxpr } = params else {
        return Err(unexpected_params("run_scoped", params));
    };
    let result_types = out_types(ctx)?;
    let scoped = jaxpr.invars.get(args.len()..).unwrap_or_default();

    ctx.builder.open_block(&[]);
    let mut inputs = args;
    let mut block_shapes = ctx.block_shapes.clone();
    for var in scoped {
        inputs.push(Lowered::Value(alloc_value(ctx, &var.aval)?));
        block_shapes.push(Some(block_shape_of(var.aval.shape())));
    }
    let out = ctx.subcomp_values(jaxpr, block_shapes, inputs)?;
    yield_values(ctx, OpKind::TpuYield, &out);
    let body = ctx.builder.close_region()?;

    Ok(ctx
        .builder
        .op(OpKind::Region)
        .region(body)
        .results(result_types)
        .build()
        .into())
}
