//! Materializing host scalars as IR constants.

use mosaic_ir::{Attribute, Builder, FloatType, OpKind, Type, Value};
use mosaic_jaxpr::{AbstractValue, Scalar};

use crate::error::LoweringError;
use crate::types::dtype_to_ir_type;
use crate::value::Lowered;

fn check_element(ty: &Type) -> Result<(), LoweringError> {
    match ty {
        Type::Integer(1) | Type::Integer(8) | Type::Integer(32) | Type::Index => Ok(()),
        Type::Float(FloatType::F32) | Type::Float(FloatType::BF16) | Type::Float(FloatType::F16) => {
            Ok(())
        }
        other => Err(LoweringError::UnsupportedType(format!(
            "Unsupported constant type: {}",
            other
        ))),
    }
}

fn scalar_attr(value: Scalar, ty: &Type) -> Attribute {
    if ty.is_float() {
        Attribute::Float {
            value: value.as_f64(),
            ty: ty.clone(),
        }
    } else {
        let int = match value {
            Scalar::Float(f) => f.trunc() as i64,
            other => other.as_i64().unwrap_or_default(),
        };
        let int = if *ty == Type::i1() { (int != 0) as i64 } else { int };
        Attribute::Int {
            value: int,
            ty: ty.clone(),
        }
    }
}

/// Emits a constant holding `value`.
///
/// Without a type the constant is `i32`, `f32` or `i1` depending on the kind
/// of scalar. A vector type yields a splat.
pub fn ir_constant(
    builder: &mut Builder,
    value: Scalar,
    ty: Option<Type>,
) -> Result<Value, LoweringError> {
    let ty = ty.unwrap_or_else(|| match value {
        Scalar::Int(_) => Type::i32(),
        Scalar::Float(_) => Type::f32(),
        Scalar::Bool(_) => Type::i1(),
    });
    check_element(ty.element_type())?;
    let attr = if ty.is_vector() {
        Attribute::Splat {
            value: Box::new(scalar_attr(value, ty.element_type())),
            ty: ty.clone(),
        }
    } else {
        scalar_attr(value, &ty)
    };
    Ok(builder.op(OpKind::Constant).attr("value", attr).value(ty))
}

pub fn i32_constant(builder: &mut Builder, value: i64) -> Result<Value, LoweringError> {
    ir_constant(builder, Scalar::Int(value), Some(Type::i32()))
}

/// A host integer at any integer or `index` type, e.g. a 64-bit loop index.
pub fn int_constant(builder: &mut Builder, value: i64, ty: Type) -> Result<Value, LoweringError> {
    if !matches!(ty, Type::Integer(_) | Type::Index) {
        return Err(LoweringError::UnsupportedType(format!(
            "{} is not an integer type",
            ty
        )));
    }
    let attr = Attribute::Int {
        value,
        ty: ty.clone(),
    };
    Ok(builder.op(OpKind::Constant).attr("value", attr).value(ty))
}

pub fn index_constant(builder: &mut Builder, value: i64) -> Result<Value, LoweringError> {
    ir_constant(builder, Scalar::Int(value), Some(Type::Index))
}

/// Turns a host literal into an IR value typed after `aval`; values pass
/// through.
pub fn ensure_value(
    builder: &mut Builder,
    lowered: Lowered,
    aval: &AbstractValue,
) -> Result<Lowered, LoweringError> {
    match lowered {
        Lowered::Host(lit) => {
            let ty = dtype_to_ir_type(&aval.dtype(), false)?;
            Ok(Lowered::Value(ir_constant(builder, lit.value, Some(ty))?))
        }
        other => Ok(other),
    }
}
