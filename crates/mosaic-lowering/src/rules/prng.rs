//! # Random Numbers (`rules::prng`)
//!
//! The hardware generator is stateful: `tpu.prng_set_seed_32` seeds it and
//! `tpu.prng_random_bits` draws a block of bits. Typed keys of the
//! TPU-internal implementation are held in scalar registers as a
//! [`KeyScalarBundle`] and are lowered in terms of these two operations.

use mosaic_ir::{Attribute, OpKind, Type};
use mosaic_jaxpr::{AbstractValue, DType, KeyImpl, Params, Primitive, ShapedArray};

use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::rules::{arg, unexpected_params};
use crate::value::{KeyScalarBundle, Lowered, RuleOutput};

pub(super) fn register(table: &mut RuleTable) {
    table.register(Primitive::PrngSeed, prng_seed_rule);
    table.register(Primitive::PrngRandomBits, prng_random_bits_rule);
    table.register(Primitive::RandomSeed, random_seed_rule);
    table.register(Primitive::RandomBits, random_bits_rule);
    table.register(Primitive::RandomFoldIn, random_fold_in_rule);
    table.register(Primitive::RandomWrap, random_wrap_rule);
    table.register(Primitive::RandomUnwrap, random_unwrap_rule);
}

/// Shape of the key data of the TPU-internal implementation.
const KEY_DATA_SHAPE: [usize; 2] = [1, 1];

fn key_data_aval() -> ShapedArray {
    ShapedArray::new(KEY_DATA_SHAPE.to_vec(), DType::I32)
}

fn require_tpu_key(key_impl: &KeyImpl) -> Result<(), LoweringError> {
    if key_impl.is_tpu_internal() {
        Ok(())
    } else {
        Err(LoweringError::unsupported(format!(
            "PRNG key implementation `{}` is not supported; use the TPU-internal implementation",
            key_impl.name
        )))
    }
}

fn key_impl_of(aval: &AbstractValue) -> Result<KeyImpl, LoweringError> {
    match aval.dtype() {
        DType::Key(key_impl) => Ok(key_impl),
        other => Err(LoweringError::internal(format!(
            "expected a key operand, found {}",
            other
        ))),
    }
}

fn single(outs: Vec<Lowered>) -> Result<RuleOutput, LoweringError> {
    match <[Lowered; 1]>::try_from(outs) {
        Ok([out]) => Ok(out.into()),
        Err(outs) => Err(LoweringError::internal(format!(
            "helper jaxpr returned {} results instead of one",
            outs.len()
        ))),
    }
}

fn prng_seed_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let seeds = match args.as_slice() {
        [Lowered::Bundle(bundle)] => bundle.scalars.clone(),
        _ => {
            let seeds = args
                .iter()
                .map(Lowered::value)
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(bad) = seeds.iter().find(|s| !ctx.value_type(**s).is_integer()) {
                return Err(LoweringError::invalid_params(format!(
                    "All seed data must be scalar integers. Got {}",
                    ctx.value_type(*bad)
                )));
            }
            seeds
        }
    };
    ctx.builder.op(OpKind::PrngSetSeed32).operands(&seeds).build();
    Ok(RuleOutput::Multiple(Vec::new()))
}

fn prng_random_bits_rule(
    ctx: &mut RuleContext<'_>,
    _: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::PrngRandomBits { shape } = params else {
        return Err(unexpected_params("prng_random_bits", params));
    };
    if shape.len() <= 1 {
        return Err(LoweringError::unsupported(
            "random_bits only supports rank>=2 outputs.",
        ));
    }
    let ty = ctx.out_type()?;
    Ok(ctx.builder.op(OpKind::PrngRandomBits).value(ty).into())
}

/// A key whose data is the seed broadcast over the key shape.
fn random_seed_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::Key { key_impl } = params else {
        return Err(unexpected_params("random_seed", params));
    };
    require_tpu_key(key_impl)?;
    let key_aval = ctx.out_aval()?.clone();
    let wrap = Params::Key {
        key_impl: key_impl.clone(),
    };
    let outs = ctx.lower_fun(args, |t, xs| {
        let seed = t.convert(&xs[0], DType::I32)?;
        let data = t.broadcast_in_dim(&seed, &KEY_DATA_SHAPE, &[])?;
        Ok(vec![t.bind1(Primitive::RandomWrap, wrap, vec![data], key_aval)])
    })?;
    single(outs)
}

/// Seeds the generator with the key and draws the requested bits.
fn random_bits_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    params: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Params::RandomBits { bit_width, shape } = params else {
        return Err(unexpected_params("random_bits", params));
    };
    if *bit_width != 32 {
        return Err(LoweringError::unsupported(format!(
            "Only 32-bit PRNG supported, got bit_width={}",
            bit_width
        )));
    }
    require_tpu_key(&key_impl_of(ctx.in_aval(0)?)?)?;
    let out_aval = ctx.out_aval()?.clone();
    let shape = shape.clone();
    let outs = ctx.lower_fun(args, |t, xs| {
        t.bind(Primitive::PrngSeed, Params::None, vec![xs[0].clone()], vec![]);
        Ok(vec![t.bind1(
            Primitive::PrngRandomBits,
            Params::PrngRandomBits { shape },
            vec![],
            out_aval,
        )])
    })?;
    single(outs)
}

/// Derives a key from the first word drawn after seeding with the key data
/// and the message.
fn random_fold_in_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let key_aval = ctx.in_aval(0)?.clone();
    let key_impl = key_impl_of(&key_aval)?;
    require_tpu_key(&key_impl)?;
    let outs = ctx.lower_fun(args, |t, xs| {
        let data = t.bind1(Primitive::RandomUnwrap, Params::None, vec![xs[0].clone()], key_data_aval());
        let word = t.reshape(&data, &[])?;
        let msg = t.convert(&xs[1], DType::I32)?;
        t.bind(Primitive::PrngSeed, Params::None, vec![word, msg], vec![]);
        let bits = t.bind1(
            Primitive::PrngRandomBits,
            Params::PrngRandomBits {
                shape: KEY_DATA_SHAPE.to_vec(),
            },
            vec![],
            key_data_aval(),
        );
        Ok(vec![t.bind1(
            Primitive::RandomWrap,
            Params::Key { key_impl },
            vec![bits],
            key_aval,
        )])
    })?;
    single(outs)
}

fn random_wrap_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let key_data = arg(&args, 0)?;
    let value = match key_data {
        Lowered::Bundle(_) => return Ok(key_data.into()),
        Lowered::Value(v) => v,
        Lowered::Host(_) => {
            return Err(LoweringError::unsupported("key_data wrap of a host constant"))
        }
    };
    let ty = ctx.value_type(value);
    let Some(shape) = ty.vector_shape().map(<[i64]>::to_vec) else {
        return Err(LoweringError::unsupported(format!("key_data wrap {}", ty)));
    };
    if shape.len() != 2 {
        return Err(LoweringError::unsupported("Seed key_data must be 2D."));
    }
    if shape != [1, 1] {
        return Err(LoweringError::unsupported(format!(
            "Seed key_data of shape != (1, 1) not supported. Got: {:?}",
            shape
        )));
    }
    let element = ty.element_type().clone();
    let scalars = (0..shape[1])
        .map(|i| {
            ctx.builder
                .op(OpKind::Extract)
                .operand(value)
                .attr("static_position", Attribute::DenseI64(vec![0, i]))
                .value(element.clone())
        })
        .collect();
    Ok(Lowered::Bundle(KeyScalarBundle {
        key_shape: KEY_DATA_SHAPE.to_vec(),
        scalars,
    })
    .into())
}

fn random_unwrap_rule(
    ctx: &mut RuleContext<'_>,
    args: Vec<Lowered>,
    _: &Params,
) -> Result<RuleOutput, LoweringError> {
    let Lowered::Bundle(key) = arg(&args, 0)? else {
        return Err(LoweringError::internal(
            "random_unwrap expects a key held in scalar registers",
        ));
    };
    if key.key_shape != KEY_DATA_SHAPE {
        return Err(LoweringError::unsupported(format!(
            "Seed key_data of shape != (1, 1) not supported. Got: {:?}",
            key.key_shape
        )));
    }
    let scalar = key
        .scalars
        .first()
        .copied()
        .ok_or_else(|| LoweringError::internal("empty key scalar bundle"))?;
    let ty = Type::vector(vec![1, 1], Type::i32());
    Ok(ctx
        .builder
        .op(OpKind::VectorBroadcast)
        .operand(scalar)
        .value(ty)
        .into())
}
