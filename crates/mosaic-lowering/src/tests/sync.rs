use mosaic_ir::{Attribute, Module, OpKind, Operation};
use mosaic_jaxpr::{
    AbstractValue, DType, DeviceIdOperand, DeviceIdType, MemorySpace, Params, Primitive,
    RefOperand, SemaphoreKind, Tracer,
};

use super::helpers::{lower_standalone, lower_with, mesh_grid};
use crate::context::GridContext;
use crate::error::LoweringError;

fn find(module: &Module, kind: OpKind) -> Operation {
    let mut found = None;
    module.function("main").unwrap().walk(&mut |op| {
        if op.kind == kind && found.is_none() {
            found = Some(op.clone());
        }
    });
    found.unwrap_or_else(|| panic!("no {} in module", kind))
}

fn int() -> AbstractValue {
    AbstractValue::scalar(DType::I32)
}

/// `semaphore_signal(sem, 1)` on the device at mesh coordinates `(x, y)`.
fn remote_signal() -> mosaic_jaxpr::Jaxpr {
    let mut t = Tracer::new();
    let sem = t.input(AbstractValue::Semaphore(SemaphoreKind::Regular));
    let inc = t.input(int());
    let x = t.input(int());
    let y = t.input(int());
    t.bind(
        Primitive::SemaphoreSignal,
        Params::SemaphoreSignal {
            target: RefOperand::whole(0),
            value: 1,
            device_id: Some(DeviceIdOperand {
                kind: DeviceIdType::Mesh,
                operands: vec![2, 3],
            }),
            core_index: None,
        },
        vec![sem, inc, x, y],
        vec![],
    );
    t.finish(vec![])
}

#[test]
fn mesh_coordinates_are_linearized() {
    let module = lower_with(mesh_grid(&[("x", 2), ("y", 4)]), &remote_signal()).unwrap();
    assert_eq!(module.count(OpKind::MulI), 2);
    assert_eq!(module.count(OpKind::AddI), 2);

    let signal = find(&module, OpKind::SemSignal);
    assert_eq!(signal.operands.len(), 3);
    assert_eq!(
        signal.attributes.get("operandSegmentSizes"),
        Some(&Attribute::DenseI64(vec![1, 1, 1, 0]))
    );
}

#[test]
fn mesh_device_ids_need_a_mesh() {
    let err = lower_standalone(&remote_signal()).unwrap_err();
    assert!(matches!(err.root_cause(), LoweringError::Configuration(_)));
}

#[test]
fn mesh_rank_must_match_the_coordinates() {
    let err = lower_with(mesh_grid(&[("x", 8)]), &remote_signal()).unwrap_err();
    assert!(matches!(err.root_cause(), LoweringError::InvalidParams(_)));
}

fn local_copy(dtype: DType) -> mosaic_jaxpr::Jaxpr {
    let mut t = Tracer::new();
    let src = t.input(AbstractValue::reference(
        vec![8, 128],
        dtype.clone(),
        Some(MemorySpace::Any),
    ));
    let dst = t.input(AbstractValue::reference(
        vec![8, 128],
        dtype,
        Some(MemorySpace::Vmem),
    ));
    let sem = t.input(AbstractValue::Semaphore(SemaphoreKind::Dma));
    t.bind(
        Primitive::DmaStart,
        Params::DmaStart {
            src: RefOperand::whole(0),
            dst: RefOperand::whole(1),
            sem: RefOperand::whole(2),
            src_sem: None,
            device_id: None,
        },
        vec![src, dst.clone(), sem.clone()],
        vec![],
    );
    t.bind(
        Primitive::DmaWait,
        Params::DmaWait {
            sem: RefOperand::whole(1),
            target: RefOperand::whole(0),
        },
        vec![dst, sem],
        vec![],
    );
    t.finish(vec![])
}

#[test]
fn local_dma_has_no_optional_operands() {
    let module = lower_standalone(&local_copy(DType::F32)).unwrap();
    let start = find(&module, OpKind::EnqueueDma);
    assert_eq!(start.operands.len(), 3);
    assert_eq!(
        start.attributes.get("operandSegmentSizes"),
        Some(&Attribute::DenseI64(vec![1, 0, 1, 1, 0]))
    );
    let wait = find(&module, OpKind::WaitDma);
    let main = module.function("main").unwrap();
    assert_eq!(wait.operands, vec![main.arguments()[2], main.arguments()[1]]);
}

#[test]
fn boolean_dmas_are_rejected() {
    let err = lower_standalone(&local_copy(DType::Bool)).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        LoweringError::UnsupportedTransferType(_)
    ));
}

fn print_jaxpr(format: &str, has_placeholders: bool, arg: AbstractValue) -> mosaic_jaxpr::Jaxpr {
    let mut t = Tracer::new();
    let x = t.input(arg);
    t.bind(
        Primitive::DebugPrint,
        Params::DebugPrint {
            format: format.to_string(),
            has_placeholders,
        },
        vec![x],
        vec![],
    );
    t.finish(vec![])
}

#[test]
fn debug_print_uses_positional_placeholders() {
    let module = lower_standalone(&print_jaxpr("i={}", true, int())).unwrap();
    let log = find(&module, OpKind::TpuLog);
    assert_eq!(log.attributes.get("tag"), Some(&Attribute::string("i=$0")));
    assert_eq!(log.attributes.get("formatted"), Some(&Attribute::Bool(true)));
}

#[test]
fn debug_print_placeholders_need_i32_arguments() {
    let jaxpr = print_jaxpr("x={}", true, AbstractValue::scalar(DType::F32));
    let err = lower_standalone(&jaxpr).unwrap_err();
    assert!(matches!(err.root_cause(), LoweringError::InvalidParams(_)));
}

#[test]
fn debug_print_is_dropped_for_verification() {
    let grid = GridContext {
        for_verification: true,
        ..GridContext::default()
    };
    let module = lower_with(grid, &print_jaxpr("i={}", true, int())).unwrap();
    assert_eq!(module.count(OpKind::TpuLog), 0);
}
