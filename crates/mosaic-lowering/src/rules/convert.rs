//! # Casts (`rules::convert`)
//!
//! `convert_element_type` emits a single `arith` cast when the target dialect
//! has one for the pair of dtypes. Everything else is routed through 32-bit
//! intermediates, each step of which is again a direct cast.

use mosaic_ir::{Attribute, OpKind, Type, Value};
use mosaic_jaxpr::{lit, DType, Params, Primitive, Scalar};

use crate::constant::ir_constant;
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::{unexpected_params, value_arg};
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::ConvertElementType, convert_element_type_rule);
    table.register(Primitive::Bitcast, bitcast_rule);
    table.register(Primitive::BitcastConvertType, bitcast_convert_type_rule);
}

/// Width of a dtype in bytes as far as conversions are concerned; booleans
/// count as one byte here, unlike in memory.
fn byte_width(dtype: &DType) -> u32 {
    match dtype {
        DType::Bool => 1,
        other => other.itemsize().unwrap_or(0),
    }
}

/// The single cast op converting `from` to `to`, if there is one.
fn direct_cast(from: &DType, to: &DType) -> Option<OpKind> {
    let (fw, tw) = (byte_width(from), byte_width(to));
    if from.is_float() && to.is_float() {
        if fw < tw && tw == 4 {
            return Some(OpKind::ExtF);
        }
        if fw > tw && fw == 4 {
            return Some(OpKind::TruncF);
        }
    } else if from.is_signed_int() && to.is_signed_int() {
        if fw < tw && tw == 4 {
            return Some(OpKind::ExtSI);
        }
        if fw > tw && fw == 4 {
            return Some(OpKind::TruncI);
        }
    } else if from.is_float() && to.is_signed_int() && fw == 4 && tw == 4 {
        return Some(OpKind::FPToSI);
    } else if from.is_signed_int() && to.is_float() && fw == 4 && tw == 4 {
        return Some(OpKind::SIToFP);
    } else if from.is_bool() && to.is_integer() && tw == 4 {
        return Some(OpKind::ExtUI);
    } else if from.is_integer() && to.is_bool() && fw == 4 {
        return Some(OpKind::CmpI);
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Convert(DType),
    /// Saturate a float to the range of a narrow integer before truncation.
    Clip(f64, f64),
}

fn int_range(dtype: &DType) -> (f64, f64) {
    match dtype {
        DType::I8 => (i8::MIN as f64, i8::MAX as f64),
        DType::I16 => (i16::MIN as f64, i16::MAX as f64),
        _ => (i32::MIN as f64, i32::MAX as f64),
    }
}

/// Intermediate conversions taking `from` to `to`.
fn conversion_chain(from: &DType, to: &DType) -> Result<Vec<Step>, LoweringError> {
    let unsupported = || LoweringError::unsupported(format!("Unsupported cast: {} -> {}", from, to));
    let origin = from.clone();
    let mut steps = Vec::new();
    let mut from = from.clone();
    if from.is_bool() {
        steps.push(Step::Convert(DType::I32));
        from = DType::I32;
    }
    if from.is_signed_int() {
        if byte_width(&from) < 4 {
            steps.push(Step::Convert(DType::I32));
        }
        if to.is_float() && byte_width(to) < 4 {
            steps.push(Step::Convert(DType::F32));
        }
    } else if from.is_float() {
        if byte_width(&from) < 4 && !to.is_float() {
            steps.push(Step::Convert(DType::F32));
        }
        if to.is_signed_int() && byte_width(to) < 4 {
            let (lo, hi) = int_range(to);
            steps.push(Step::Clip(lo, hi));
            steps.push(Step::Convert(DType::I32));
        } else if to.is_bool() {
            steps.push(Step::Convert(DType::I32));
        } else if to.is_float() {
            steps.push(Step::Convert(DType::F32));
        }
    } else {
        return Err(unsupported());
    }
    steps.push(Step::Convert(to.clone()));

    // Drop conversions to the dtype already held.
    let mut current = origin;
    steps.retain(|step| match step {
        Step::Convert(dtype) if *dtype == current => false,
        Step::Convert(dtype) => {
            current = dtype.clone();
            true
        }
        Step::Clip(..) => true,
    });
    if steps.len() == 1 {
        // A single step is this very conversion again.
        return Err(unsupported());
    }
    Ok(steps)
}

fn convert_element_type_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::ConvertElementType { new_dtype } = params else {
        return Err(unexpected_params("convert_element_type", params));
    };
    // Unsigned integers share the representation of signed ones.
    let new_dtype = new_dtype.to_signed();
    let old_dtype = ctx.in_aval(0)?.dtype().to_signed();
    let x = value_arg(&args, 0)?;
    if old_dtype == new_dtype {
        return Ok(x.into());
    }
    let out_ty = ctx.out_type()?;
    match direct_cast(&old_dtype, &new_dtype) {
        Some(OpKind::CmpI) => {
            let zero_ty = ctx.value_type(x);
            let zero = ir_constant(ctx.builder, Scalar::Int(0), Some(zero_ty))?;
            Ok(ctx
                .builder
                .op(OpKind::CmpI)
                .operand(x)
                .operand(zero)
                .attr("predicate", Attribute::i64(1))
                .value(out_ty)
                .into())
        }
        Some(kind) => Ok(ctx.builder.op(kind).operand(x).value(out_ty).into()),
        None => {
            let steps = conversion_chain(&old_dtype, &new_dtype)?;
            log::trace!("casting {} -> {} via {:?}", old_dtype, new_dtype, steps);
            ctx.lower_fun1(args, |t, xs| {
                let mut current = xs[0].clone();
                for step in &steps {
                    current = match step {
                        Step::Convert(dtype) => t.convert(&current, dtype.clone())?,
                        Step::Clip(lo, hi) => {
                            let lo = lit(Scalar::Float(*lo), DType::F32);
                            let hi = lit(Scalar::Float(*hi), DType::F32);
                            let clipped = t.binary(Primitive::Max, &current, &lo)?;
                            t.binary(Primitive::Min, &clipped, &hi)?
                        }
                    };
                }
                Ok(current)
            })
            .map(RuleOutput::from)
        }
    }
}

fn emit_bitcast(ctx: &mut RuleContext<'_>, x: Value) -> Result<RuleOutput, LoweringError> {
    let ty: Type = ctx.out_type()?;
    Ok(ctx.builder.op(OpKind::Bitcast).operand(x).value(ty).into())
}

fn bitcast_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let x = value_arg(&args, 0)?;
    emit_bitcast(ctx, x)
}

fn bitcast_convert_type_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let old = ctx.in_aval(0)?.dtype();
    let new = ctx.out_aval()?.dtype();
    if old.bit_width() != new.bit_width() {
        return Err(LoweringError::unsupported("Changing bitwidths not supported."));
    }
    let x = value_arg(&args, 0)?;
    emit_bitcast(ctx, x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_casts_need_a_32_bit_side() {
        assert_eq!(direct_cast(&DType::BF16, &DType::F32), Some(OpKind::ExtF));
        assert_eq!(direct_cast(&DType::F32, &DType::BF16), Some(OpKind::TruncF));
        assert_eq!(direct_cast(&DType::BF16, &DType::F16), None);
        assert_eq!(direct_cast(&DType::I8, &DType::I32), Some(OpKind::ExtSI));
        assert_eq!(direct_cast(&DType::I8, &DType::I16), None);
        assert_eq!(direct_cast(&DType::F32, &DType::I32), Some(OpKind::FPToSI));
        assert_eq!(direct_cast(&DType::Bool, &DType::I32), Some(OpKind::ExtUI));
        assert_eq!(direct_cast(&DType::I32, &DType::Bool), Some(OpKind::CmpI));
    }

    #[test]
    fn narrow_float_to_int_saturates() {
        let steps = conversion_chain(&DType::BF16, &DType::I8).unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Convert(DType::F32),
                Step::Clip(-128.0, 127.0),
                Step::Convert(DType::I32),
                Step::Convert(DType::I8),
            ]
        );
    }

    #[test]
    fn every_chain_step_is_direct() {
        let dtypes = [
            DType::Bool,
            DType::I8,
            DType::I16,
            DType::I32,
            DType::BF16,
            DType::F16,
            DType::F32,
        ];
        for from in &dtypes {
            for to in &dtypes {
                if from == to || direct_cast(from, to).is_some() {
                    continue;
                }
                let steps = conversion_chain(from, to).unwrap();
                let mut current = from.clone();
                for step in steps {
                    if let Step::Convert(next) = step {
                        if next != current {
                            assert!(
                                direct_cast(&current, &next).is_some(),
                                "{} -> {} is not direct in {} -> {}",
                                current,
                                next,
                                from,
                                to
                            );
                        }
                        current = next;
                    }
                }
                assert_eq!(&current, to);
            }
        }
    }

    #[test]
    fn wide_types_have_no_chain() {
        assert!(conversion_chain(&DType::I64, &DType::I32).is_err());
        assert!(conversion_chain(&DType::F32, &DType::F64).is_err());
    }
}
