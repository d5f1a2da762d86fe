//! # Synchronization and Debugging (`rules::sync`)
//!
//! Semaphore and DMA rules resolve each reference operand through its
//! indexers first. Semaphores are indexed against their own shape, data
//! references against their block shape.
//!
//! Remote devices are named either by a logical id or by coordinates along
//! every mesh axis; coordinates are linearized with the mesh strides.

use mosaic_ir::{Attribute, OpKind, Type, Value};
use mosaic_jaxpr::{
    lit_i32, AbstractValue, DType, DeviceIdOperand, DeviceIdType, Params, Primitive, RefOperand,
};

use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::indexing::index_ref;
use crate::registry::RuleTable;
use crate::rules::{unexpected_params, value_arg};
use crate::value::{block_shape_of, BlockShape, Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::SemaphoreRead, semaphore_read_rule);
    table.register(Primitive::SemaphoreSignal, semaphore_signal_rule);
    table.register(Primitive::SemaphoreWait, semaphore_wait_rule);
    table.register(Primitive::DmaStart, dma_start_rule);
    table.register(Primitive::DmaWait, dma_wait_rule);
    table.register(Primitive::GetBarrierSemaphore, get_barrier_semaphore_rule);
    table.register(Primitive::Delay, delay_rule);
    table.register(Primitive::DebugPrint, debug_print_rule);
    table.register(Primitive::DebugCallback, debug_callback_rule);
}

/// Which shape a reference operand is indexed against.
enum Window {
    /// The full shape of the referenced array.
    Aval,
    /// The operand's block shape, falling back to the array shape.
    Block,
}

fn resolve_ref(
    ctx: &mut RuleContext<'_>,
    target: &RefOperand,
    args: &[Lowered],
    window: Window,
) -> Result<Value, LoweringError> {
    let reference = value_arg(args, target.operand)?;
    let aval_shape = block_shape_of(ctx.in_aval(target.operand)?.shape());
    let block_shape: BlockShape = match window {
        Window::Aval => aval_shape,
        Window::Block => ctx
            .block_shapes
            .get(target.operand)
            .cloned()
            .flatten()
            .unwrap_or(aval_shape),
    };
    let (reference, _) = index_ref(ctx.builder, reference, block_shape, &target.indexers, args)?;
    Ok(reference)
}

/// A logical device id for `device_id`, linearizing mesh coordinates.
fn device_id_to_logical(
    ctx: &mut RuleContext<'_>,
    device_id: &DeviceIdOperand,
    args: &[Lowered],
) -> Result<Value, LoweringError> {
    let ids = device_id
        .operands
        .iter()
        .map(|&i| value_arg(args, i).map(Lowered::Value))
        .collect::<Result<Vec<_>, _>>()?;
    match device_id.kind {
        DeviceIdType::Logical => match ids.as_slice() {
            [single] => single.value(),
            _ => Err(LoweringError::invalid_params(format!(
                "a logical device id is a single scalar, got {} operands",
                ids.len()
            ))),
        },
        DeviceIdType::Mesh => {
            let strides = ctx
                .grid()
                .mesh_context
                .as_ref()
                .map(|m| m.mesh_strides.clone())
                .ok_or_else(|| {
                    LoweringError::Configuration(
                        "mesh device ids need a mesh context".to_string(),
                    )
                })?;
            if strides.len() != ids.len() {
                return Err(LoweringError::invalid_params(format!(
                    "{} mesh coordinates for a mesh of rank {}",
                    ids.len(),
                    strides.len()
                )));
            }
            let avals = vec![AbstractValue::scalar(DType::I32); ids.len()];
            let block_shapes = vec![None; ids.len()];
            let out = ctx.lower_fun_with(&avals, block_shapes, ids, |t, coords| {
                let mut linear = lit_i32(0);
                for (coord, stride) in coords.iter().zip(&strides) {
                    let term = t.binary(Primitive::Mul, coord, &lit_i32(*stride as i64))?;
                    linear = t.binary(Primitive::Add, &linear, &term)?;
                }
                Ok(vec![linear])
            })?;
            match out.as_slice() {
                [single] => single.value(),
                _ => Err(LoweringError::internal("device id helper must have one output")),
            }
        }
    }
}

// --- Semaphores ---

fn semaphore_read_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::SemaphoreRead { target } = params else {
        return Err(unexpected_params("semaphore_read", params));
    };
    let sem = resolve_ref(ctx, target, &args, Window::Aval)?;
    Ok(ctx
        .builder
        .op(OpKind::SemRead)
        .operand(sem)
        .value(Type::i32())
        .into())
}

fn semaphore_signal_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::SemaphoreSignal {
        target,
        value,
        device_id,
        core_index,
    } = params
    else {
        return Err(unexpected_params("semaphore_signal", params));
    };
    let sem = resolve_ref(ctx, target, &args, Window::Aval)?;
    let increment = value_arg(&args, *value)?;
    let device = device_id
        .as_ref()
        .map(|d| device_id_to_logical(ctx, d, &args))
        .transpose()?;
    let core = core_index.map(|i| value_arg(&args, i)).transpose()?;
    let segments = vec![1, 1, device.is_some() as i64, core.is_some() as i64];
    ctx.builder
        .op(OpKind::SemSignal)
        .operand(sem)
        .operand(increment)
        .operands(device.as_slice())
        .operands(core.as_slice())
        .attr("operandSegmentSizes", Attribute::DenseI64(segments))
        .build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

fn semaphore_wait_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::SemaphoreWait { target, value } = params else {
        return Err(unexpected_params("semaphore_wait", params));
    };
    let sem = resolve_ref(ctx, target, &args, Window::Aval)?;
    let decrement = value_arg(&args, *value)?;
    ctx.builder
        .op(OpKind::SemWait)
        .operand(sem)
        .operand(decrement)
        .build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

fn get_barrier_semaphore_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let ty = ctx.out_type()?;
    Ok(ctx.builder.op(OpKind::SemBarrier).value(ty).into())
}

// --- DMAs ---

fn dma_start_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::DmaStart {
        src,
        dst,
        sem,
        src_sem,
        device_id,
    } = params
    else {
        return Err(unexpected_params("dma_start", params));
    };
    if ctx.in_aval(src.operand)?.dtype().is_bool() {
        return Err(LoweringError::UnsupportedTransferType(
            "DMAs with bool dtypes are not supported.".to_string(),
        ));
    }
    let source = resolve_ref(ctx, src, &args, Window::Block)?;
    let source_sem = src_sem
        .as_ref()
        .map(|s| resolve_ref(ctx, s, &args, Window::Aval))
        .transpose()?;
    let target = resolve_ref(ctx, dst, &args, Window::Block)?;
    let target_sem = resolve_ref(ctx, sem, &args, Window::Aval)?;
    let device = device_id
        .as_ref()
        .map(|d| device_id_to_logical(ctx, d, &args))
        .transpose()?;
    let segments = vec![
        1,
        source_sem.is_some() as i64,
        1,
        1,
        device.is_some() as i64,
    ];
    ctx.builder
        .op(OpKind::EnqueueDma)
        .operand(source)
        .operands(source_sem.as_slice())
        .operand(target)
        .operand(target_sem)
        .operands(device.as_slice())
        .attr("operandSegmentSizes", Attribute::DenseI64(segments))
        .build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

fn dma_wait_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::DmaWait { sem, target } = params else {
        return Err(unexpected_params("dma_wait", params));
    };
    let reference = resolve_ref(ctx, target, &args, Window::Block)?;
    let sem = resolve_ref(ctx, sem, &args, Window::Aval)?;
    ctx.builder
        .op(OpKind::WaitDma)
        .operand(sem)
        .operand(reference)
        .build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

fn delay_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let nanos = value_arg(&args, 0)?;
    ctx.builder.op(OpKind::Delay).operand(nanos).build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

// --- Debugging ---

/// Rewrites `{...}` placeholders into the positional `$N` form the target
/// expects. Returns the rewritten format and the number of placeholders.
fn positional_format(format: &str) -> Result<(String, usize), LoweringError> {
    let mut out = String::with_capacity(format.len());
    let mut count = 0;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(_) => continue,
                        None => {
                            return Err(LoweringError::invalid_params(format!(
                                "unterminated placeholder in debug_print format {:?}",
                                format
                            )))
                        }
                    }
                }
                out.push('$');
                out.push_str(&count.to_string());
                count += 1;
            }
            '}' => {
                return Err(LoweringError::invalid_params(format!(
                    "single '}}' in debug_print format {:?}",
                    format
                )))
            }
            other => out.push(other),
        }
    }
    Ok((out, count))
}

fn debug_print_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::DebugPrint {
        format,
        has_placeholders,
    } = params
    else {
        return Err(unexpected_params("debug_print", params));
    };
    if ctx.grid().for_verification {
        return Ok(RuleOutput::Multiple(Vec::new()));
    }
    let values = args
        .iter()
        .map(Lowered::value)
        .collect::<Result<Vec<_>, _>>()?;
    let tag = if *has_placeholders {
        if values
            .iter()
            .any(|v| ctx.value_type(*v) != Type::Integer(32))
        {
            return Err(LoweringError::invalid_params(
                "All arguments must be 32-bit integers when using placeholders (`{...}`). \
                 If you need to print values of other types, remove placeholders from the \
                 format string.",
            ));
        }
        let (rewritten, count) = positional_format(format)?;
        if count != values.len() {
            return Err(LoweringError::invalid_params(format!(
                "debug_print format has {} placeholders for {} arguments",
                count,
                values.len()
            )));
        }
        rewritten
    } else {
        format.clone()
    };
    ctx.builder
        .op(OpKind::TpuLog)
        .operands(&values)
        .attr("tag", Attribute::string(tag))
        .attr("formatted", Attribute::Bool(*has_placeholders))
        .build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

/// Host callbacks have no device-side effect.
fn debug_callback_rule(
    _: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    Ok(RuleOutput::Multiple(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_become_positional() {
        let (fmt, n) = positional_format("x={} y={}").unwrap();
        assert_eq!(fmt, "x=$0 y=$1");
        assert_eq!(n, 2);
    }

    #[test]
    fn escaped_braces_are_literal() {
        let (fmt, n) = positional_format("{{set}} {}").unwrap();
        assert_eq!(fmt, "{set} $0");
        assert_eq!(n, 1);
    }

    #[test]
    fn broken_formats_are_rejected() {
        assert!(positional_format("value={").is_err());
        assert!(positional_format("value=}").is_err());
    }
}
