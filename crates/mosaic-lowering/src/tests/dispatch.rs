use expect_test::expect;
use mosaic_ir::{OpKind, Operation, RtValue};
use mosaic_jaxpr::{lit_f32, lit_i32, AbstractValue, DType, Params, Primitive, Tracer};

use super::helpers::{init_logging, lower_standalone, run};
use crate::dispatch::name_stack_updates;
use crate::error::LoweringError;

fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

#[test]
fn add_then_mul_lowers_in_order() {
    init_logging();
    let mut t = Tracer::new();
    let x = t.input(AbstractValue::scalar(DType::F32));
    let y = t.binary(Primitive::Add, &x, &lit_f32(1.0)).unwrap();
    let z = t.binary(Primitive::Mul, &y, &lit_f32(2.0)).unwrap();
    let module = lower_standalone(&t.finish(vec![z])).unwrap();

    let main = module.function("main").unwrap();
    let arith: Vec<&Operation> = main
        .body
        .operations
        .iter()
        .filter(|op| matches!(op.kind, OpKind::AddF | OpKind::MulF))
        .collect();
    assert_eq!(arith.len(), 2);
    assert_eq!(arith[0].kind, OpKind::AddF);
    assert_eq!(arith[1].kind, OpKind::MulF);
    assert_eq!(arith[1].operands[0], arith[0].results[0]);

    assert_eq!(run(&module, &[RtValue::Float(3.0)]), vec![RtValue::Float(8.0)]);

    expect![[r#"
        module @test {
          func.func @main(%0: f32) -> (f32) {
            %1 = "arith.constant"() {value = 1e0 : f32} : () -> (f32)
            %2 = "arith.addf"(%0, %1) : (f32, f32) -> (f32)
            %3 = "arith.constant"() {value = 2e0 : f32} : () -> (f32)
            %4 = "arith.mulf"(%2, %3) : (f32, f32) -> (f32)
            "func.return"(%4) : (f32) -> ()
          }
        }
    "#]]
    .assert_eq(&module.to_string());
}

#[test]
fn name_stack_diff_uses_the_common_prefix() {
    let from = names(&["a", "b", "c"]);
    let to = names(&["a", "x"]);
    let (popped, pushed) = name_stack_updates(&from, &to);
    assert_eq!(popped, 2);
    assert_eq!(pushed, &names(&["x"])[..]);

    let (popped, pushed) = name_stack_updates(&to, &to);
    assert_eq!(popped, 0);
    assert!(pushed.is_empty());
}

#[test]
fn scope_markers_are_balanced() {
    let mut t = Tracer::new();
    let x = t.input(AbstractValue::scalar(DType::I32));
    t.push_scope("outer");
    let a = t.binary(Primitive::Add, &x, &lit_i32(1)).unwrap();
    t.push_scope("inner");
    let b = t.binary(Primitive::Mul, &a, &a).unwrap();
    t.pop_scope();
    t.pop_scope();
    t.push_scope("sibling");
    let c = t.binary(Primitive::Sub, &b, &x).unwrap();
    let module = lower_standalone(&t.finish(vec![c])).unwrap();

    let starts = module.count(OpKind::TraceStart);
    let stops = module.count(OpKind::TraceStop);
    assert_eq!(starts, 3);
    assert_eq!(starts, stops);
    // (x + 1)^2 - x
    assert_eq!(run(&module, &[RtValue::Int(3)]), vec![RtValue::Int(13)]);
}

#[test]
fn unregistered_primitives_are_wrapped_once() {
    let mut t = Tracer::new();
    let x = t.input(AbstractValue::array(vec![8, 128], DType::F32));
    let y = t.bind1(
        Primitive::Cumsum,
        Params::Axes { axes: vec![1] },
        vec![x],
        AbstractValue::array(vec![8, 128], DType::F32),
    );
    let err = lower_standalone(&t.finish(vec![y])).unwrap_err();
    let LoweringError::Exception(exc) = &err else {
        panic!("expected a wrapped error, got {err:?}");
    };
    assert!(matches!(
        exc.cause.as_ref(),
        LoweringError::UnsupportedPrimitive(name) if name == "cumsum"
    ));
    assert!(exc.equation.contains("cumsum"));
    let source = std::error::Error::source(exc.as_ref()).expect("the cause is the source");
    assert_eq!(source.to_string(), exc.cause.to_string());
}

#[test]
fn failures_in_loop_bodies_are_not_wrapped_twice() {
    let mut body = Tracer::new();
    let i = body.input(AbstractValue::scalar(DType::I32));
    let acc = body.input(AbstractValue::array(vec![8, 128], DType::F32));
    let next_i = body.binary(Primitive::Add, &i, &lit_i32(1)).unwrap();
    let next_acc = body.bind1(
        Primitive::Cumsum,
        Params::Axes { axes: vec![0] },
        vec![acc],
        AbstractValue::array(vec![8, 128], DType::F32),
    );
    let body = body.finish(vec![next_i, next_acc]);

    let mut t = Tracer::new();
    let x = t.input(AbstractValue::array(vec![8, 128], DType::F32));
    let outs = t.bind(
        Primitive::Scan,
        Params::Scan {
            jaxpr: Box::new(body),
            num_consts: 0,
            num_carry: 2,
            length: 4,
            reverse: false,
            unroll: 1,
        },
        vec![lit_i32(0), x],
        vec![
            AbstractValue::scalar(DType::I32),
            AbstractValue::array(vec![8, 128], DType::F32),
        ],
    );
    let err = lower_standalone(&t.finish(vec![outs[1].clone()])).unwrap_err();
    let LoweringError::Exception(exc) = &err else {
        panic!("expected a wrapped error, got {err:?}");
    };
    assert!(!exc.cause.is_wrapped());
    assert!(matches!(
        err.root_cause(),
        LoweringError::UnsupportedPrimitive(name) if name == "cumsum"
    ));
}

#[test]
fn literal_outputs_are_materialized() {
    let mut t = Tracer::new();
    let _x = t.input(AbstractValue::scalar(DType::I32));
    let module = lower_standalone(&t.finish(vec![lit_i32(7)])).unwrap();
    assert_eq!(run(&module, &[RtValue::Int(0)]), vec![RtValue::Int(7)]);
}
