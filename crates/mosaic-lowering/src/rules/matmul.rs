//! # Matrix Multiplication (`rules::matmul`)
//!
//! `dot_general` over 2-D operands becomes `tpu.matmul`, with transposition
//! flags derived from the contracting dimensions. A product against a
//! single-row right-hand side is really a matrix-vector product and is
//! lowered as a multiply followed by a row reduction.

use mosaic_ir::{Attribute, OpKind, Type};
use mosaic_jaxpr::{Params, Precision, Primitive, Scalar};

use crate::constant::ir_constant;
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::{unexpected_params, value_arg};
use crate::types::{dtype_to_ir_type, to_i64};
use crate::value::{Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::DotGeneral, dot_general_rule);
}

/// Numpy-style broadcast of two shapes of equal rank.
fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>, LoweringError> {
    if a.len() != b.len() {
        return Err(LoweringError::internal(format!(
            "cannot broadcast {:?} with {:?}",
            a, b
        )));
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| match (x, y) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            _ => Err(LoweringError::internal(format!(
                "cannot broadcast {:?} with {:?}",
                a, b
            ))),
        })
        .collect()
}

fn precision_attr(precision: &Option<[Precision; 2]>) -> Result<Option<Attribute>, LoweringError> {
    let precision = match precision {
        None => return Ok(None),
        Some([lhs, rhs]) if lhs != rhs => {
            return Err(LoweringError::unsupported(
                "Per-operand dot precision unsupported",
            ))
        }
        Some([p, _]) => *p,
    };
    match precision {
        Precision::Default => Ok(None),
        Precision::Highest => Ok(Some(Attribute::opaque("#tpu.contract_precision<fp32>"))),
        other => Err(LoweringError::unsupported(format!(
            "Unsupported dot precision: {:?}",
            other
        ))),
    }
}

fn dot_general_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::DotGeneral {
        lhs_contracting,
        rhs_contracting,
        precision,
        ..
    } = params
    else {
        return Err(unexpected_params("dot_general", params));
    };
    let out_aval = ctx.out_aval()?.clone();
    let out_ty = ctx.out_type()?;
    let element = out_ty.element_type().clone();
    let zero = if element.is_float() {
        Scalar::Float(0.0)
    } else if element.is_integer() {
        Scalar::Int(0)
    } else {
        return Err(LoweringError::UnsupportedType(format!(
            "dot_general producing {}",
            out_aval.dtype()
        )));
    };
    let lhs_shape = ctx.in_aval(0)?.shape().to_vec();
    let rhs_shape = ctx.in_aval(1)?.shape().to_vec();
    if lhs_shape.len() != 2 || rhs_shape.len() != 2 {
        return Err(LoweringError::unsupported(format!(
            "Only 2D tensors supported in dot; received: {:?} and {:?}",
            lhs_shape, rhs_shape
        )));
    }
    let mut x = value_arg(&args, 0)?;
    let mut y = value_arg(&args, 1)?;

    if lhs_contracting.as_slice() == [1] && rhs_contracting.as_slice() == [1] && rhs_shape[0] == 1
    {
        // Matrix-vector product: broadcast, multiply and reduce rows.
        let bcast_shape = broadcast_shapes(&lhs_shape, out_aval.shape())?;
        let bcast_shape = broadcast_shapes(&bcast_shape, &rhs_shape)?;
        let bcast_ty = Type::vector(
            to_i64(&bcast_shape),
            dtype_to_ir_type(&out_aval.dtype(), false)?,
        );
        if lhs_shape != bcast_shape {
            x = ctx.builder.op(OpKind::VectorBroadcast).operand(x).value(bcast_ty.clone());
        }
        if rhs_shape != bcast_shape {
            y = ctx.builder.op(OpKind::VectorBroadcast).operand(y).value(bcast_ty.clone());
        }
        let product = ctx
            .builder
            .op(OpKind::MulF)
            .operand(x)
            .operand(y)
            .value(bcast_ty);
        let red_ty = Type::vector(vec![lhs_shape[0] as i64], element);
        let acc = ir_constant(ctx.builder, zero, Some(red_ty.clone()))?;
        let reduced = ctx
            .builder
            .op(OpKind::MultiReduction)
            .operand(product)
            .operand(acc)
            .attr("kind", Attribute::opaque("#vector.kind<add>"))
            .attr("reduction_dims", Attribute::DenseI64(vec![1]))
            .value(red_ty);
        return Ok(ctx
            .builder
            .op(OpKind::ShapeCast)
            .operand(reduced)
            .value(out_ty)
            .into());
    }

    let transpose_lhs = match lhs_contracting.as_slice() {
        [1] => false,
        [0] => true,
        other => {
            return Err(LoweringError::unsupported(format!(
                "dot_general with lhs contracting dims {:?}",
                other
            )))
        }
    };
    let transpose_rhs = match rhs_contracting.as_slice() {
        [0] => false,
        [1] => true,
        other => {
            return Err(LoweringError::unsupported(format!(
                "dot_general with rhs contracting dims {:?}",
                other
            )))
        }
    };
    let precision = precision_attr(precision)?;
    let acc = ir_constant(ctx.builder, zero, Some(out_ty.clone()))?;
    let mut op = ctx
        .builder
        .op(OpKind::Matmul)
        .operand(x)
        .operand(y)
        .operand(acc)
        .attr("transpose_lhs", Attribute::Bool(transpose_lhs))
        .attr("transpose_rhs", Attribute::Bool(transpose_rhs));
    if let Some(precision) = precision {
        op = op.attr("precision", precision);
    }
    Ok(op.value(out_ty).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_broadcast_along_unit_dims() {
        assert_eq!(broadcast_shapes(&[8, 128], &[8, 1]).unwrap(), vec![8, 128]);
        assert_eq!(broadcast_shapes(&[1, 128], &[8, 128]).unwrap(), vec![8, 128]);
        assert!(broadcast_shapes(&[8, 128], &[4, 128]).is_err());
    }

    #[test]
    fn only_matching_highest_precision_is_annotated() {
        assert_eq!(precision_attr(&None).unwrap(), None);
        assert_eq!(
            precision_attr(&Some([Precision::Default, Precision::Default])).unwrap(),
            None
        );
        assert!(precision_attr(&Some([Precision::Highest, Precision::Highest]))
            .unwrap()
            .is_some());
        assert!(precision_attr(&Some([Precision::High, Precision::Highest])).is_err());
        assert!(precision_attr(&Some([Precision::High, Precision::High])).is_err());
    }
}
