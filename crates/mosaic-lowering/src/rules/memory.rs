//! # Loads and Stores (`rules::memory`)
//!
//! `get`/`load` and `swap`/`masked_swap` share one implementation each. The
//! reference operand is first narrowed by all but the last indexer; the last
//! indexer then selects what is accessed. The access strategy depends on
//! where the reference lives:
//!
//! | memory | shape  | lowering                                   |
//! |--------|--------|--------------------------------------------|
//! | SMEM   | scalar | `memref.load` / `memref.store`             |
//! | SMEM   | vector | rejected                                   |
//! | VMEM   | any    | `vector.load` / `vector.store`, or the strided `tpu` variants |
//!
//! Booleans are stored as `i32` words: loads compare against zero and stores
//! zero-extend.

use mosaic_ir::{Attribute, MemorySpace, OpKind, Type, Value};
use mosaic_jaxpr::{DType, Index, NDIndexer, Params, Primitive, RefOperand, Scalar};

use crate::constant::{index_constant, ir_constant};
use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::indexing::{index_ref, indexer_to_start_size_stride, split_access, StartSizeStride};
use crate::registry::RuleTable;
use crate::rules::{arg, unexpected_params, value_arg};
use crate::types::{dtype_to_ir_type, to_i64};
use crate::value::{BlockShape, Extent, KeyScalarBundle, Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register_raw(Primitive::Get, load_rule);
    table.register_raw(Primitive::Load, load_rule);
    table.register_raw(Primitive::Swap, swap_rule);
    table.register_raw(Primitive::MaskedSwap, swap_rule);
    table.register(Primitive::MultipleOf, multiple_of_rule);
}

/// A reference narrowed down to the window an access touches.
struct Access {
    reference: Value,
    block_shape: BlockShape,
    indexer: NDIndexer,
    in_smem: bool,
}

fn prepare_access(
    ctx: &mut RuleContext<'_>,
    target: &RefOperand,
    args: &[Lowered],
) -> Result<Access, LoweringError> {
    let reference = value_arg(args, target.operand)?;
    let ref_aval = ctx.in_aval(target.operand)?.clone();
    let block_shape = ctx.block_shape(target.operand)?;
    let (prefix, indexer) = split_access(&target.indexers, ref_aval.shape());
    let (reference, block_shape) = index_ref(ctx.builder, reference, block_shape, prefix, args)?;
    let in_smem = ctx.value_type(reference).memory_space() == Some(MemorySpace::Smem);
    Ok(Access {
        reference,
        block_shape,
        indexer,
        in_smem,
    })
}

fn check_indexer(access: &Access) -> Result<(), LoweringError> {
    if access
        .indexer
        .indices
        .iter()
        .any(|i| matches!(i, Index::Array(_)))
    {
        return Err(LoweringError::InvalidAccess(
            "Cannot do int indexing on TPU".to_string(),
        ));
    }
    if !access.in_smem && access.block_shape.is_empty() {
        return Err(LoweringError::UnimplementedAccess(
            "Indexing into a ()-shaped Ref not yet supported on TPU.".to_string(),
        ));
    }
    Ok(())
}

fn starts_and_strides(
    ctx: &mut RuleContext<'_>,
    access: &Access,
    args: &[Lowered],
) -> Result<(StartSizeStride, bool), LoweringError> {
    let sss =
        indexer_to_start_size_stride(ctx.builder, &access.indexer, args, &access.block_shape, true)?;
    let strided = sss.strides.iter().any(|&s| s != 1);
    Ok((sss, strided))
}

fn element_of(ctx: &RuleContext<'_>, reference: Value) -> Type {
    ctx.value_type(reference).element_type().clone()
}

/// Recovers a boolean from its `i32` memory representation.
fn cast_load_to_bool(
    ctx: &mut RuleContext<'_>,
    dtype: &DType,
    shape: &[usize],
    loaded: Value,
) -> Result<Value, LoweringError> {
    if !dtype.is_bool() {
        return Ok(loaded);
    }
    let loaded_ty = ctx.value_type(loaded);
    let zero = ir_constant(ctx.builder, Scalar::Int(0), Some(loaded_ty))?;
    let out_ty = if shape.is_empty() {
        Type::i1()
    } else {
        Type::vector(to_i64(shape), Type::i1())
    };
    Ok(ctx
        .builder
        .op(OpKind::CmpI)
        .operand(loaded)
        .operand(zero)
        .attr("predicate", Attribute::i64(1))
        .value(out_ty))
}

/// Widens a boolean to the `i32` memory representation.
fn cast_store_to_memref_type(
    ctx: &mut RuleContext<'_>,
    dtype: &DType,
    shape: &[usize],
    value: Value,
) -> Result<Value, LoweringError> {
    if !dtype.is_bool() {
        return Ok(value);
    }
    let boundary = dtype_to_ir_type(dtype, true)?;
    let ty = if shape.is_empty() {
        boundary
    } else {
        Type::vector(to_i64(shape), boundary)
    };
    Ok(ctx.builder.op(OpKind::ExtUI).operand(value).value(ty))
}

fn static_sizes(sss: &StartSizeStride) -> Result<Vec<usize>, LoweringError> {
    sss.sizes
        .iter()
        .map(|s| match s {
            Extent::Static(n) => Ok(*n as usize),
            _ => Err(LoweringError::UnsupportedIndexing(
                "vector accesses need static sizes".to_string(),
            )),
        })
        .collect()
}

fn strides_attr(sss: &StartSizeStride, strided: bool) -> Option<Attribute> {
    strided.then(|| Attribute::DenseI64(sss.strides.iter().map(|&s| s as i64).collect()))
}

// --- Loads ---

fn load_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Load { target, mask } = params else {
        return Err(unexpected_params("load", params));
    };
    if mask.is_some() {
        return Err(LoweringError::UnsupportedMasking(
            "masked loads are not supported".to_string(),
        ));
    }
    let access = prepare_access(ctx, target, &args)?;
    let out_aval = ctx.out_aval()?.clone();
    let out_dtype = out_aval.dtype();

    if let DType::Key(key) = &out_dtype {
        if !access.in_smem {
            return Err(LoweringError::InvalidPlacement(
                "PRNG keys must be loaded from SMEM. Did you set the memory space to SMEM \
                 in the BlockSpec for the PRNG key input?"
                    .to_string(),
            ));
        }
        return load_key(ctx, access.reference, &key.key_shape);
    }
    check_indexer(&access)?;
    let (sss, strided) = starts_and_strides(ctx, &access, &args)?;

    if access.in_smem {
        if !out_aval.shape().is_empty() {
            return Err(LoweringError::InvalidAccess(
                "Can only load scalars from SMEM".to_string(),
            ));
        }
        let element = element_of(ctx, access.reference);
        let loaded = ctx
            .builder
            .op(OpKind::MemRefLoad)
            .operand(access.reference)
            .operands(&sss.starts)
            .value(element);
        return Ok(cast_load_to_bool(ctx, &out_dtype, &[], loaded)?.into());
    }

    let sizes = static_sizes(&sss)?;
    let boundary = dtype_to_ir_type(&out_dtype, true)?;
    let load_ty = Type::vector(to_i64(&sizes), boundary.clone());
    let mut op = ctx
        .builder
        .op(if strided { OpKind::StridedLoad } else { OpKind::VectorLoad })
        .operand(access.reference)
        .operands(&sss.starts);
    if let Some(strides) = strides_attr(&sss, strided) {
        op = op.attr("strides", strides);
    }
    let mut loaded = op.value(load_ty);
    let out_shape = out_aval.shape().to_vec();
    if sizes != out_shape {
        loaded = if out_shape.is_empty() {
            ctx.builder
                .op(OpKind::Extract)
                .operand(loaded)
                .attr("static_position", Attribute::DenseI64(vec![0; sizes.len()]))
                .value(boundary)
        } else {
            let ty = Type::vector(to_i64(&out_shape), boundary);
            ctx.builder.op(OpKind::ShapeCast).operand(loaded).value(ty)
        };
    }
    Ok(cast_load_to_bool(ctx, &out_dtype, &out_shape, loaded)?.into())
}

/// Loads a PRNG key from SMEM as a bundle of scalar words.
fn load_key(
    ctx: &mut RuleContext<'_>,
    reference: Value,
    key_shape: &[usize],
) -> Result<RuleOutput, LoweringError> {
    if key_shape.len() != 2 {
        return Err(LoweringError::unsupported("Seed key_data must be 2D."));
    }
    if key_shape != [1, 1] {
        return Err(LoweringError::unsupported(format!(
            "Seed key_data of shape != (1, 1) not supported. Got: {:?}",
            key_shape
        )));
    }
    let element = element_of(ctx, reference);
    let mut scalars = Vec::with_capacity(key_shape[1]);
    for i in 0..key_shape[1] {
        let row = index_constant(ctx.builder, 0)?;
        let col = index_constant(ctx.builder, i as i64)?;
        scalars.push(
            ctx.builder
                .op(OpKind::MemRefLoad)
                .operand(reference)
                .operand(row)
                .operand(col)
                .value(element.clone()),
        );
    }
    Ok(Lowered::Bundle(KeyScalarBundle {
        key_shape: key_shape.to_vec(),
        scalars,
    })
    .into())
}

// --- Stores ---

fn swap_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Swap {
        target,
        value,
        mask,
    } = params
    else {
        return Err(unexpected_params("swap", params));
    };
    if mask.is_some() {
        return Err(LoweringError::UnsupportedMasking(
            "masked stores are not implemented".to_string(),
        ));
    }
    let access = prepare_access(ctx, target, &args)?;
    let val_aval = ctx.in_aval(*value)?.clone();
    let val_dtype = val_aval.dtype();
    let val_shape = val_aval.shape().to_vec();
    let mut val = match arg(&args, *value)? {
        Lowered::Host(literal) => {
            let ty = dtype_to_ir_type(&val_dtype, false)?;
            ir_constant(ctx.builder, literal.value, Some(ty))?
        }
        other => other.value()?,
    };
    check_indexer(&access)?;
    let (sss, strided) = starts_and_strides(ctx, &access, &args)?;

    if access.in_smem {
        if !val_shape.is_empty() {
            return Err(LoweringError::InvalidAccess(
                "Can only store scalars to SMEM".to_string(),
            ));
        }
        let element = element_of(ctx, access.reference);
        let old = ctx
            .builder
            .op(OpKind::MemRefLoad)
            .operand(access.reference)
            .operands(&sss.starts)
            .value(element);
        let old = cast_load_to_bool(ctx, &val_dtype, &[], old)?;
        let val = cast_store_to_memref_type(ctx, &val_dtype, &[], val)?;
        ctx.builder
            .op(OpKind::MemRefStore)
            .operand(val)
            .operand(access.reference)
            .operands(&sss.starts)
            .build();
        return Ok(old.into());
    }

    // Shape of the touched window: the value's shape with unit dims where
    // the indexer or the grid squeezed one away.
    let out_shape = ctx.out_aval()?.shape().to_vec();
    let mut window = out_shape.clone();
    for (i, index) in access.indexer.indices.iter().enumerate() {
        if !index.is_slice() {
            window.insert(i.min(window.len()), 1);
        }
    }
    let mut window_iter = window.into_iter();
    let mem_shape: Vec<usize> = access
        .block_shape
        .iter()
        .map(|b| match b {
            Extent::Mapped => 1,
            _ => window_iter.next().unwrap_or(1),
        })
        .collect();

    let boundary = dtype_to_ir_type(&val_dtype, true)?;
    let mem_ty = Type::vector(to_i64(&mem_shape), boundary.clone());
    let strides = strides_attr(&sss, strided);
    let mut load = ctx
        .builder
        .op(if strided { OpKind::StridedLoad } else { OpKind::VectorLoad })
        .operand(access.reference)
        .operands(&sss.starts);
    if let Some(strides) = &strides {
        load = load.attr("strides", strides.clone());
    }
    let mut old = load.value(mem_ty.clone());
    val = cast_store_to_memref_type(ctx, &val_dtype, &val_shape, val)?;
    if mem_shape != out_shape {
        let out_ty = if out_shape.is_empty() {
            boundary
        } else {
            Type::vector(to_i64(&out_shape), boundary)
        };
        old = if out_shape.is_empty() {
            ctx.builder
                .op(OpKind::Extract)
                .operand(old)
                .attr("static_position", Attribute::DenseI64(vec![0; mem_shape.len()]))
                .value(out_ty)
        } else {
            ctx.builder.op(OpKind::ShapeCast).operand(old).value(out_ty)
        };
        let cast_kind = if val_shape.is_empty() {
            OpKind::VectorBroadcast
        } else {
            OpKind::ShapeCast
        };
        val = ctx.builder.op(cast_kind).operand(val).value(mem_ty);
    }
    let old = cast_load_to_bool(ctx, &val_dtype, &out_shape, old)?;

    let mut store = ctx
        .builder
        .op(if strided { OpKind::StridedStore } else { OpKind::VectorStore })
        .operand(val)
        .operand(access.reference)
        .operands(&sss.starts);
    if let Some(strides) = strides {
        store = store.attr("strides", strides);
    }
    store.build();
    Ok(old.into())
}

fn multiple_of_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::MultipleOf { values } = params else {
        return Err(unexpected_params("multiple_of", params));
    };
    let mut val = value_arg(&args, 0)?;
    for &multiple in values {
        let ty = ctx.value_type(val);
        val = ctx
            .builder
            .op(OpKind::AssumeMultiple)
            .operand(val)
            .attr("multiple", Attribute::i32(multiple))
            .value(ty);
    }
    Ok(val.into())
}
