use mosaic_ir::{Attribute, Interpreter, OpKind, RtValue, Type};
use mosaic_jaxpr::{
    AbstractValue, DType, Index, IndexOperand, Jaxpr, MemorySpace, NDIndexer, Params, Primitive,
    RefOperand, Slice, Tracer,
};

use super::helpers::{lower_standalone, run};
use crate::error::LoweringError;

fn get(t: &mut Tracer, reference: &mosaic_jaxpr::Atom, out: AbstractValue) -> mosaic_jaxpr::Atom {
    t.bind1(
        Primitive::Get,
        Params::Load {
            target: RefOperand::whole(0),
            mask: None,
        },
        vec![reference.clone()],
        out,
    )
}

fn bool_smem_swap() -> Jaxpr {
    let mut t = Tracer::new();
    let flag = t.input(AbstractValue::reference(
        Vec::new(),
        DType::Bool,
        Some(MemorySpace::Smem),
    ));
    let x = t.input(AbstractValue::scalar(DType::Bool));
    let old = t.bind1(
        Primitive::Swap,
        Params::Swap {
            target: RefOperand::whole(0),
            value: 1,
            mask: None,
        },
        vec![flag.clone(), x],
        AbstractValue::scalar(DType::Bool),
    );
    let new = get(&mut t, &flag, AbstractValue::scalar(DType::Bool));
    t.finish(vec![old, new])
}

#[test]
fn smem_booleans_are_stored_as_words() {
    let module = lower_standalone(&bool_smem_swap()).unwrap();
    assert_eq!(module.count(OpKind::ExtUI), 1);
    assert_eq!(module.count(OpKind::MemRefStore), 1);

    for (stored, written) in [(1, RtValue::Int(1)), (0, RtValue::Int(0))] {
        let mut interp = Interpreter::new(&module);
        let flag = interp.alloc(&[], vec![RtValue::Int(1 - stored)]);
        let out = interp.call("main", &[flag, RtValue::Int(stored)]).unwrap();
        assert_eq!(out, vec![RtValue::Int(1 - stored), RtValue::Int(stored)]);
        assert_eq!(interp.buffer(flag).unwrap(), &[written]);
    }
}

#[test]
fn vmem_booleans_round_trip_through_words() {
    let mut t = Tracer::new();
    let flags = t.input(AbstractValue::reference(
        vec![8, 128],
        DType::Bool,
        Some(MemorySpace::Vmem),
    ));
    let x = t.input(AbstractValue::array(vec![8, 128], DType::Bool));
    let mask = AbstractValue::array(vec![8, 128], DType::Bool);
    let old = t.bind1(
        Primitive::Swap,
        Params::Swap {
            target: RefOperand::whole(0),
            value: 1,
            mask: None,
        },
        vec![flags.clone(), x],
        mask.clone(),
    );
    let new = get(&mut t, &flags, mask);
    let module = lower_standalone(&t.finish(vec![old, new])).unwrap();
    assert_eq!(module.count(OpKind::ExtUI), 1);
    assert_eq!(module.count(OpKind::CmpI), 2);

    let words = Type::vector(vec![8, 128], Type::i32());
    let main = module.function("main").unwrap();
    main.walk(&mut |op| match op.kind {
        OpKind::ExtUI => assert_eq!(module.value_type(op.results[0]), Some(&words)),
        OpKind::VectorStore => assert_eq!(module.value_type(op.operands[0]), Some(&words)),
        OpKind::CmpI => {
            assert_eq!(op.attr("predicate").and_then(Attribute::as_int), Some(1));
            assert_eq!(module.value_type(op.operands[0]), Some(&words));
        }
        _ => {}
    });
}

#[test]
fn zero_rank_vmem_refs_cannot_be_indexed() {
    let mut t = Tracer::new();
    let r = t.input(AbstractValue::reference(
        Vec::new(),
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    let x = get(&mut t, &r, AbstractValue::scalar(DType::F32));
    let err = lower_standalone(&t.finish(vec![x])).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        LoweringError::UnimplementedAccess(_)
    ));
}

#[test]
fn smem_scalars_are_loaded_by_index() {
    let mut t = Tracer::new();
    let table = t.input(AbstractValue::reference(
        vec![4],
        DType::I32,
        Some(MemorySpace::Smem),
    ));
    let i = t.input(AbstractValue::scalar(DType::I32));
    let x = t.bind1(
        Primitive::Get,
        Params::Load {
            target: RefOperand::indexed(
                0,
                vec![NDIndexer {
                    indices: vec![Index::Scalar(IndexOperand::Dynamic(1))],
                    shape: vec![4],
                }],
            ),
            mask: None,
        },
        vec![table, i],
        AbstractValue::scalar(DType::I32),
    );
    let module = lower_standalone(&t.finish(vec![x])).unwrap();

    let mut interp = Interpreter::new(&module);
    let data = (10..14).map(RtValue::Int).collect();
    let table = interp.alloc(&[4], data);
    let out = interp.call("main", &[table, RtValue::Int(2)]).unwrap();
    assert_eq!(out, vec![RtValue::Int(12)]);
}

#[test]
fn vectors_cannot_be_loaded_from_smem() {
    let mut t = Tracer::new();
    let r = t.input(AbstractValue::reference(
        vec![8, 128],
        DType::F32,
        Some(MemorySpace::Smem),
    ));
    let x = get(&mut t, &r, AbstractValue::array(vec![8, 128], DType::F32));
    let err = lower_standalone(&t.finish(vec![x])).unwrap_err();
    assert!(matches!(err.root_cause(), LoweringError::InvalidAccess(_)));
}

#[test]
fn whole_vmem_loads_are_plain_vector_loads() {
    let mut t = Tracer::new();
    let r = t.input(AbstractValue::reference(
        vec![8, 128],
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    let x = get(&mut t, &r, AbstractValue::array(vec![8, 128], DType::F32));
    let module = lower_standalone(&t.finish(vec![x])).unwrap();
    assert_eq!(module.count(OpKind::VectorLoad), 1);
    assert_eq!(module.count(OpKind::StridedLoad), 0);
}

#[test]
fn strided_loads_record_their_strides() {
    let mut t = Tracer::new();
    let r = t.input(AbstractValue::reference(
        vec![16, 128],
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    let indexer = NDIndexer {
        indices: vec![
            Index::Slice(Slice::new(IndexOperand::Static(0), 8, 2)),
            Index::Slice(Slice::full(128)),
        ],
        shape: vec![16, 128],
    };
    let x = t.bind1(
        Primitive::Get,
        Params::Load {
            target: RefOperand::indexed(0, vec![indexer]),
            mask: None,
        },
        vec![r],
        AbstractValue::array(vec![8, 128], DType::F32),
    );
    let module = lower_standalone(&t.finish(vec![x])).unwrap();

    let main = module.function("main").unwrap();
    let load = main
        .body
        .operations
        .iter()
        .find(|op| op.kind == OpKind::StridedLoad)
        .expect("a strided load");
    assert_eq!(
        load.attributes.get("strides"),
        Some(&Attribute::DenseI64(vec![2, 1]))
    );
}

#[test]
fn masked_accesses_are_rejected() {
    let mut t = Tracer::new();
    let r = t.input(AbstractValue::reference(
        vec![8, 128],
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    let mask = t.input(AbstractValue::array(vec![8, 128], DType::Bool));
    let x = t.bind1(
        Primitive::Load,
        Params::Load {
            target: RefOperand::whole(0),
            mask: Some(1),
        },
        vec![r, mask],
        AbstractValue::array(vec![8, 128], DType::F32),
    );
    let err = lower_standalone(&t.finish(vec![x])).unwrap_err();
    assert!(matches!(err.root_cause(), LoweringError::UnsupportedMasking(_)));
}

#[test]
fn gather_indexing_is_rejected() {
    let mut t = Tracer::new();
    let r = t.input(AbstractValue::reference(
        vec![8, 128],
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    let idx = t.input(AbstractValue::array(vec![8], DType::I32));
    let indexer = NDIndexer {
        indices: vec![Index::Array(1), Index::Slice(Slice::full(128))],
        shape: vec![8, 128],
    };
    let x = t.bind1(
        Primitive::Get,
        Params::Load {
            target: RefOperand::indexed(0, vec![indexer]),
            mask: None,
        },
        vec![r, idx],
        AbstractValue::array(vec![8, 128], DType::F32),
    );
    let err = lower_standalone(&t.finish(vec![x])).unwrap_err();
    assert!(matches!(err.root_cause(), LoweringError::InvalidAccess(_)));
}

#[test]
fn multiple_of_passes_the_value_through() {
    let mut t = Tracer::new();
    let x = t.input(AbstractValue::scalar(DType::I32));
    let y = t.bind1(
        Primitive::MultipleOf,
        Params::MultipleOf { values: vec![8] },
        vec![x],
        AbstractValue::scalar(DType::I32),
    );
    let module = lower_standalone(&t.finish(vec![y])).unwrap();
    assert_eq!(module.count(OpKind::AssumeMultiple), 1);
    assert_eq!(run(&module, &[RtValue::Int(24)]), vec![RtValue::Int(24)]);
}
