use mosaic_ir::OpKind;
use mosaic_jaxpr::{AbstractValue, Atom, DType, Jaxpr, KeyImpl, Params, Primitive, Tracer};

use super::helpers::lower_standalone;
use crate::error::LoweringError;

fn key_aval(key_impl: KeyImpl) -> AbstractValue {
    AbstractValue::scalar(DType::Key(key_impl))
}

fn random_seed(t: &mut Tracer, seed: Atom, key_impl: KeyImpl) -> Atom {
    t.bind1(
        Primitive::RandomSeed,
        Params::Key {
            key_impl: key_impl.clone(),
        },
        vec![seed],
        key_aval(key_impl),
    )
}

fn seeded_bits(key_impl: KeyImpl, shape: Vec<usize>) -> Jaxpr {
    let mut t = Tracer::new();
    let seed = t.input(AbstractValue::scalar(DType::I32));
    let key = random_seed(&mut t, seed, key_impl);
    let bits = t.bind1(
        Primitive::RandomBits,
        Params::RandomBits {
            bit_width: 32,
            shape: shape.clone(),
        },
        vec![key],
        AbstractValue::array(shape, DType::U32),
    );
    t.finish(vec![bits])
}

#[test]
fn random_bits_seed_the_hardware_generator() {
    let module = lower_standalone(&seeded_bits(KeyImpl::tpu_internal(), vec![8, 128])).unwrap();
    assert_eq!(module.count(OpKind::PrngSetSeed32), 1);
    assert_eq!(module.count(OpKind::PrngRandomBits), 1);
    // The key never leaves scalar registers.
    assert_eq!(module.count(OpKind::Extract), 1);
}

#[test]
fn random_bits_need_two_dimensions() {
    let err = lower_standalone(&seeded_bits(KeyImpl::tpu_internal(), vec![128])).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        LoweringError::UnsupportedOperation(msg) if msg.contains("rank>=2")
    ));
}

#[test]
fn other_key_implementations_are_rejected() {
    let threefry = KeyImpl {
        name: "threefry2x32".to_string(),
        key_shape: vec![2],
    };
    let err = lower_standalone(&seeded_bits(threefry, vec![8, 128])).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        LoweringError::UnsupportedOperation(msg) if msg.contains("threefry2x32")
    ));
}

#[test]
fn wrap_then_unwrap_round_trips_through_scalars() {
    let mut t = Tracer::new();
    let data = t.input(AbstractValue::array(vec![1, 1], DType::I32));
    let key = t.bind1(
        Primitive::RandomWrap,
        Params::Key {
            key_impl: KeyImpl::tpu_internal(),
        },
        vec![data],
        key_aval(KeyImpl::tpu_internal()),
    );
    let unwrapped = t.bind1(
        Primitive::RandomUnwrap,
        Params::None,
        vec![key],
        AbstractValue::array(vec![1, 1], DType::I32),
    );
    let module = lower_standalone(&t.finish(vec![unwrapped])).unwrap();
    assert_eq!(module.count(OpKind::Extract), 1);
    assert_eq!(module.count(OpKind::VectorBroadcast), 1);
}

#[test]
fn wrapped_key_data_must_be_one_by_one() {
    let mut t = Tracer::new();
    let data = t.input(AbstractValue::array(vec![1, 2], DType::I32));
    let key = t.bind1(
        Primitive::RandomWrap,
        Params::Key {
            key_impl: KeyImpl::tpu_internal(),
        },
        vec![data],
        key_aval(KeyImpl::tpu_internal()),
    );
    let unwrapped = t.bind1(
        Primitive::RandomUnwrap,
        Params::None,
        vec![key],
        AbstractValue::array(vec![1, 2], DType::I32),
    );
    let err = lower_standalone(&t.finish(vec![unwrapped])).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        LoweringError::UnsupportedOperation(_)
    ));
}

#[test]
fn integer_seeds_set_the_generator_directly() {
    let mut t = Tracer::new();
    let a = t.input(AbstractValue::scalar(DType::I32));
    let b = t.input(AbstractValue::scalar(DType::I32));
    t.bind(Primitive::PrngSeed, Params::None, vec![a, b], vec![]);
    let module = lower_standalone(&t.finish(vec![])).unwrap();
    assert_eq!(module.count(OpKind::PrngSetSeed32), 1);
}
