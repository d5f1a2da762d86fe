use std::rc::Rc;

use indexmap::IndexMap;
use mosaic_ir::{verify::verify_module, Builder, Interpreter, Module, OpKind, RtValue, Type};
use mosaic_jaxpr::{AbstractValue, Jaxpr};

use crate::context::{GridContext, LoweringContext};
use crate::dispatch::jaxpr_subcomp;
use crate::error::LoweringError;
use crate::grid::MeshContext;
use crate::types::aval_to_ir_type;
use crate::value::{block_shape_of, BlockShape, Lowered};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn arg_type(aval: &AbstractValue) -> Result<Type, LoweringError> {
    aval_to_ir_type(aval, None, None, aval.is_ref())
}

fn arg_block_shape(aval: &AbstractValue) -> Option<BlockShape> {
    aval.is_ref().then(|| block_shape_of(aval.shape()))
}

/// Lowers `jaxpr` into a module whose `main` takes the jaxpr inputs and
/// returns its outputs. References see their whole array as the block.
pub(crate) fn lower_with(grid: GridContext, jaxpr: &Jaxpr) -> Result<Module, LoweringError> {
    let avals = jaxpr.in_avals();
    let arg_types = avals.iter().map(arg_type).collect::<Result<Vec<_>, _>>()?;
    let block_shapes = avals.iter().map(arg_block_shape).collect();

    let mut builder = Builder::new("test");
    let args = builder.open_block(&arg_types);
    let ctx = LoweringContext::new(Rc::new(grid), block_shapes);
    let outputs = jaxpr_subcomp(
        &ctx,
        &mut builder,
        jaxpr,
        args.into_iter().map(Lowered::Value).collect(),
    )?;
    let values = outputs
        .iter()
        .map(Lowered::value)
        .collect::<Result<Vec<_>, _>>()?;
    let results = values
        .iter()
        .map(|v| builder.value_type(*v).clone())
        .collect();
    builder.op(OpKind::Return).operands(&values).build();
    let body = builder.close_block()?;
    builder.add_function("main", body, results, IndexMap::new())?;
    let module = builder.finish()?;
    verify_module(&module)?;
    Ok(module)
}

pub(crate) fn lower_standalone(jaxpr: &Jaxpr) -> Result<Module, LoweringError> {
    lower_with(GridContext::default(), jaxpr)
}

/// A grid context running on a mesh with the given named axes.
pub(crate) fn mesh_grid(axes: &[(&str, usize)]) -> GridContext {
    GridContext {
        mesh_context: Some(MeshContext::new(&mosaic_jaxpr::Mesh::new(axes))),
        ..GridContext::default()
    }
}

pub(crate) fn run(module: &Module, args: &[RtValue]) -> Vec<RtValue> {
    Interpreter::new(module).call("main", args).unwrap()
}
