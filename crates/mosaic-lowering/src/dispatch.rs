//! # Equation Dispatch (`mosaic_lowering::dispatch`)
//!
//! [`jaxpr_subcomp`] lowers a jaxpr inline at the builder's insertion
//! point. It walks the equations in order, looks up each primitive's rule,
//! materializes literal operands, and binds the rule's results to the
//! equation's outputs.
//!
//! ## Name stacks
//!
//! Every equation carries the scopes it was traced under. Entering and
//! leaving scopes between consecutive equations is mirrored with
//! `tpu.trace_start` and `tpu.trace_stop`, and the stack is drained back to
//! the context's initial stack at the end, so markers always balance.
//!
//! ## Errors
//!
//! A failure while lowering an equation is wrapped once in a
//! [`LoweringException`] recording the equation, its inputs and the
//! enclosing jaxpr. Errors that are already wrapped pass through untouched,
//! so nested lowerings report the innermost equation.

use mosaic_ir::{Attribute, Builder, OpKind};
use mosaic_jaxpr::{Atom, Equation, Jaxpr};
use rustc_hash::FxHashMap;

use crate::constant::{ensure_value, ir_constant};
use crate::context::{LoweringContext, RuleContext};
use crate::error::{LoweringError, LoweringException};
use crate::registry;
use crate::types::dtype_to_ir_type;
use crate::value::{BlockShape, Lowered, RuleOutput};

/// Trace level of name-stack markers.
const TRACE_LEVEL: i64 = 10;

/// Scopes to close and scopes to open when moving from `from` to `to`.
pub fn name_stack_updates<'s>(from: &[String], to: &'s [String]) -> (usize, &'s [String]) {
    let common = from
        .iter()
        .zip(to)
        .take_while(|(a, b)| a == b)
        .count();
    (from.len() - common, &to[common..])
}

fn emit_name_stack_updates(builder: &mut Builder, from: &[String], to: &[String]) {
    let (popped, pushed) = name_stack_updates(from, to);
    for _ in 0..popped {
        builder.op(OpKind::TraceStop).build();
    }
    for name in pushed {
        builder
            .op(OpKind::TraceStart)
            .attr("message", Attribute::string(name.clone()))
            .attr("level", Attribute::i32(TRACE_LEVEL))
            .build();
    }
}

struct Env {
    values: FxHashMap<u32, Lowered>,
    block_shapes: FxHashMap<u32, Option<BlockShape>>,
}

impl Env {
    fn read(&self, atom: &Atom) -> Result<Lowered, LoweringError> {
        match atom {
            Atom::Var(var) => self.values.get(&var.id).cloned().ok_or_else(|| {
                LoweringError::internal(format!("v{} used before it is defined", var.id))
            }),
            Atom::Literal(lit) => Ok(Lowered::Host(lit.clone())),
        }
    }

    fn block_shape(&self, atom: &Atom) -> Option<BlockShape> {
        match atom {
            Atom::Var(var) => self.block_shapes.get(&var.id).cloned().flatten(),
            Atom::Literal(_) => None,
        }
    }
}

/// Lowers `jaxpr` with `args` bound to its inputs and returns its outputs.
pub fn jaxpr_subcomp(
    ctx: &LoweringContext,
    builder: &mut Builder,
    jaxpr: &Jaxpr,
    args: Vec<Lowered>,
) -> Result<Vec<Lowered>, LoweringError> {
    if args.len() != jaxpr.invars.len() || ctx.block_shapes.len() != jaxpr.invars.len() {
        return Err(LoweringError::internal(format!(
            "jaxpr with {} inputs lowered with {} arguments and {} block shapes",
            jaxpr.invars.len(),
            args.len(),
            ctx.block_shapes.len()
        )));
    }
    let mut env = Env {
        values: FxHashMap::default(),
        block_shapes: FxHashMap::default(),
    };
    for ((var, arg), bs) in jaxpr.invars.iter().zip(args).zip(&ctx.block_shapes) {
        env.values.insert(var.id, arg);
        env.block_shapes.insert(var.id, bs.clone());
    }

    let mut current_stack = ctx.name_stack.clone();
    for eqn in &jaxpr.eqns {
        let outputs = lower_equation(ctx, builder, &env, eqn, &mut current_stack)
            .map_err(|err| wrap(err, ctx, &env, eqn, jaxpr))?;
        for (var, value) in eqn.outputs.iter().zip(outputs) {
            env.values.insert(var.id, value);
        }
    }
    emit_name_stack_updates(builder, &current_stack, &ctx.name_stack);

    jaxpr
        .outvars
        .iter()
        .map(|out| match out {
            Atom::Var(_) => env.read(out),
            Atom::Literal(lit) => {
                let ty = dtype_to_ir_type(&lit.aval.dtype, false)?;
                Ok(Lowered::Value(ir_constant(builder, lit.value, Some(ty))?))
            }
        })
        .collect()
}

fn lower_equation(
    ctx: &LoweringContext,
    builder: &mut Builder,
    env: &Env,
    eqn: &Equation,
    current_stack: &mut Vec<String>,
) -> Result<Vec<Lowered>, LoweringError> {
    let rule = registry::rule_for(eqn.primitive)
        .ok_or_else(|| LoweringError::UnsupportedPrimitive(eqn.primitive.name().to_string()))?;

    let mut invals = eqn
        .inputs
        .iter()
        .map(|a| env.read(a))
        .collect::<Result<Vec<_>, _>>()?;
    let avals_in: Vec<_> = eqn.inputs.iter().map(Atom::aval).collect();
    if !registry::skips_materialization(eqn.primitive) {
        invals = invals
            .into_iter()
            .zip(&avals_in)
            .map(|(v, aval)| ensure_value(builder, v, aval))
            .collect::<Result<_, _>>()?;
    }

    let mut eqn_stack = ctx.name_stack.clone();
    eqn_stack.extend(eqn.source.name_stack.iter().cloned());
    emit_name_stack_updates(builder, current_stack, &eqn_stack);
    *current_stack = eqn_stack.clone();

    log::trace!("lowering {}", eqn.primitive);
    let mut rule_ctx = RuleContext {
        primitive: eqn.primitive,
        lowering: ctx,
        builder,
        avals_in,
        avals_out: eqn.outputs.iter().map(|v| v.aval.clone()).collect(),
        block_shapes: eqn.inputs.iter().map(|a| env.block_shape(a)).collect(),
        name_stack: eqn_stack,
    };
    let output = rule(&mut rule_ctx, invals, &eqn.params)?;

    match output {
        RuleOutput::Multiple(values) if eqn.primitive.multiple_results() => {
            if values.len() != eqn.outputs.len() {
                return Err(LoweringError::internal(format!(
                    "rule for {} returned {} results for {} outputs",
                    eqn.primitive,
                    values.len(),
                    eqn.outputs.len()
                )));
            }
            Ok(values)
        }
        RuleOutput::Single(value) if !eqn.primitive.multiple_results() => Ok(vec![value]),
        _ => Err(LoweringError::internal(format!(
            "rule for {} returned the wrong result arity",
            eqn.primitive
        ))),
    }
}

fn wrap(
    err: LoweringError,
    ctx: &LoweringContext,
    env: &Env,
    eqn: &Equation,
    jaxpr: &Jaxpr,
) -> LoweringError {
    if err.is_wrapped() {
        return err;
    }
    log::debug!("lowering of `{}` failed: {}", eqn.primitive, err);
    let block_shapes: Vec<String> = eqn
        .inputs
        .iter()
        .map(|a| match env.block_shape(a) {
            Some(bs) => {
                let dims: Vec<String> = bs.iter().map(|d| d.to_string()).collect();
                format!("({})", dims.join(", "))
            }
            None => "None".to_string(),
        })
        .collect();
    let grid: Vec<String> = ctx.grid.grid_sizes.iter().map(|g| format!("{:?}", g)).collect();
    LoweringError::Exception(Box::new(LoweringException {
        equation: eqn.to_string(),
        context: format!(
            "grid=[{}], block_shapes=[{}], name_stack=[{}]",
            grid.join(", "),
            block_shapes.join(", "),
            ctx.name_stack.join("/")
        ),
        input_shapes: eqn
            .inputs
            .iter()
            .map(|a| format!("{:?}", a.aval().shape()))
            .collect(),
        input_types: eqn.inputs.iter().map(|a| a.aval().to_string()).collect(),
        jaxpr: jaxpr.to_string(),
        cause: Box::new(err),
    }))
}
