//! # Module Assembly (`mosaic_lowering::module`)
//!
//! [`lower_jaxpr_to_module`] is the entry point of the crate. It validates
//! the block mappings, derives the kernel signature from the grid mapping,
//! lowers the kernel body into `main` and every index map into a
//! `transform_<i>` function, and annotates `main` with the metadata the
//! runtime needs to schedule the grid:
//!
//! | attribute             | contents                                           |
//! |-----------------------|----------------------------------------------------|
//! | `window_params`       | per windowed operand: bounds and transform symbol  |
//! | `iteration_bounds`    | grid sizes, dynamic dims as `i64::MIN`             |
//! | `scalar_prefetch`     | number of scalar prefetch operands                 |
//! | `scratch_operands`    | number of scratch operands                         |
//! | `dimension_semantics` | `#tpu.dimension_semantics<..>` per grid dim        |

use std::rc::Rc;

use indexmap::IndexMap;
use mosaic_ir::{verify::verify_func, Attribute, Block, Builder, Module, OpKind, Type, Value};
use mosaic_jaxpr::{
    BlockMapping, DimensionSemantics, GridMapping, IndexingMode, Jaxpr, Mesh, MemorySpace,
};

use crate::block_spec::check_block_mappings;
use crate::config::LoweringConfig;
use crate::constant::i32_constant;
use crate::context::{GridContext, LoweringContext};
use crate::dispatch::jaxpr_subcomp;
use crate::error::LoweringError;
use crate::grid::MosaicGridMapping;
use crate::value::{BlockShape, Lowered};

/// Name of the kernel body function.
pub const MAIN: &str = "main";

/// Everything about a kernel besides its body and grid mapping.
#[derive(Debug, Clone, Default)]
pub struct KernelOptions<'a> {
    /// Module symbol name.
    pub name: &'a str,
    pub dimension_semantics: Option<&'a [DimensionSemantics]>,
    pub mesh: Option<&'a Mesh>,
}

pub fn transform_name(i: usize) -> String {
    format!("transform_{}", i)
}

/// Validates block specs and communication requirements without emitting
/// any IR.
pub fn check_kernel(
    grid_mapping: &GridMapping,
    jaxpr: &Jaxpr,
    options: &KernelOptions<'_>,
    config: &LoweringConfig,
) -> Result<MosaicGridMapping, LoweringError> {
    check_block_mappings(grid_mapping, config.forward_compat)?;
    let mapping = MosaicGridMapping::new(
        jaxpr,
        grid_mapping,
        options.dimension_semantics,
        options.mesh,
        config.default_dimension_semantics,
    )?;
    if mapping.has_communication {
        log::info!("kernel `{}` communicates across devices", options.name);
    }
    Ok(mapping)
}

/// Lowers a kernel into a module.
///
/// Returns the module and the types of the extra runtime arguments the
/// caller must supply.
pub fn lower_jaxpr_to_module(
    grid_mapping: &GridMapping,
    jaxpr: &Jaxpr,
    options: &KernelOptions<'_>,
    config: &LoweringConfig,
) -> Result<(Module, Vec<Type>), LoweringError> {
    let mapping = check_kernel(grid_mapping, jaxpr, options, config)?;
    let grid = Rc::new(GridContext {
        grid_sizes: mapping.grid.clone(),
        grid_names: mapping.grid_names.clone(),
        mapped_dims: mapping.mapped_dims.clone(),
        mesh_context: mapping.mesh_context.clone(),
        for_verification: config.for_verification,
    });
    let mut builder = Builder::new(options.name);

    let (main_body, main_results) = lower_main(&mut builder, &grid, &mapping, jaxpr)?;
    log::debug!("lowered kernel body of `{}`", options.name);

    let mut attributes = IndexMap::new();
    let mut transforms = Vec::new();
    if !mapping.grid.is_empty() {
        let mut window_params = Vec::with_capacity(mapping.block_mappings.len());
        for (i, bm) in mapping.block_mappings.iter().enumerate() {
            if bm.memory_space() == Some(MemorySpace::Any) {
                window_params.push(Attribute::Dict(IndexMap::new()));
                continue;
            }
            let name = transform_name(i);
            let (body, results) = lower_transform(&mut builder, &grid, &mapping, bm)?;
            window_params.push(window_param(bm, &name));
            transforms.push((name, body, results));
        }
        attributes.insert("window_params".to_string(), Attribute::Array(window_params));
        attributes.insert(
            "iteration_bounds".to_string(),
            Attribute::DenseI64(mapping.static_grid()),
        );
    }
    attributes.insert(
        "scalar_prefetch".to_string(),
        Attribute::i64(mapping.scalar_prefetch_types.len() as i64),
    );
    attributes.insert(
        "scratch_operands".to_string(),
        Attribute::i64(mapping.scratch_types.len() as i64),
    );
    attributes.insert(
        "dimension_semantics".to_string(),
        mapping.dimension_semantics_attr(),
    );

    builder.add_function(MAIN, main_body, main_results, attributes)?;
    let mut names = vec![MAIN.to_string()];
    for (name, body, results) in transforms {
        builder.add_function(name.clone(), body, results, IndexMap::new())?;
        names.push(name);
    }
    if config.verify {
        let module = builder.module();
        for name in &names {
            let func = module
                .function(name)
                .ok_or_else(|| LoweringError::internal(format!("`{}` vanished", name)))?;
            verify_func(module, func)?;
        }
    }
    log::info!(
        "lowered `{}` into {} functions",
        options.name,
        names.len()
    );
    Ok((builder.finish()?, mapping.extra_args()))
}

/// Entry in `window_params` for one windowed operand.
fn window_param(bm: &BlockMapping, transform: &str) -> Attribute {
    let mut bounds: Vec<i64> = bm.block_shape.iter().map(|b| b.size() as i64).collect();
    bounds.extend(
        bm.block_aval
            .inner
            .dtype
            .physical_shape()
            .iter()
            .map(|&d| d as i64),
    );
    let mut params = IndexMap::new();
    params.insert("window_bounds".to_string(), Attribute::DenseI64(bounds));
    params.insert(
        "transform_indices".to_string(),
        Attribute::SymbolRef(transform.to_string()),
    );
    if let IndexingMode::Unblocked { padding } = &bm.indexing_mode {
        let (low, high): (Vec<i64>, Vec<i64>) = match padding {
            Some(pads) => pads.iter().copied().unzip(),
            None => (vec![0; bm.block_shape.len()], vec![0; bm.block_shape.len()]),
        };
        params.insert(
            "window_kind".to_string(),
            Attribute::opaque(format!("#tpu.element_window<{:?},{:?}>", low, high)),
        );
    }
    Attribute::Dict(params)
}

/// Closes the function body, returning `outputs`.
fn finish_body(
    builder: &mut Builder,
    outputs: Vec<Lowered>,
) -> Result<(Block, Vec<Type>), LoweringError> {
    let values = outputs
        .iter()
        .map(Lowered::value)
        .collect::<Result<Vec<Value>, _>>()?;
    let results = values
        .iter()
        .map(|v| builder.value_type(*v).clone())
        .collect();
    builder.op(OpKind::Return).operands(&values).build();
    Ok((builder.close_block()?, results))
}

fn lower_main(
    builder: &mut Builder,
    grid: &Rc<GridContext>,
    mapping: &MosaicGridMapping,
    jaxpr: &Jaxpr,
) -> Result<(Block, Vec<Type>), LoweringError> {
    let num_grid = mapping.grid_types.len();
    let arg_types: Vec<Type> = mapping
        .grid_types
        .iter()
        .chain(&mapping.scalar_prefetch_types)
        .chain(&mapping.operand_types)
        .chain(&mapping.scratch_types)
        .cloned()
        .collect();
    let block_shapes: Vec<Option<BlockShape>> = mapping
        .scalar_prefetch_block_shapes
        .iter()
        .chain(&mapping.operand_block_shapes)
        .chain(&mapping.scratch_block_shapes)
        .cloned()
        .collect();

    let args = builder.open_block(&arg_types);
    let (grid_indices, operands) = args.split_at(num_grid);
    let mut ctx = LoweringContext::new(Rc::clone(grid), block_shapes);
    ctx.user_grid_indices = Some(mapping.user_grid_indices(grid_indices));
    let outputs = jaxpr_subcomp(
        &ctx,
        builder,
        jaxpr,
        operands.iter().copied().map(Lowered::Value).collect(),
    )?;
    finish_body(builder, outputs)
}

fn lower_transform(
    builder: &mut Builder,
    grid: &Rc<GridContext>,
    mapping: &MosaicGridMapping,
    bm: &BlockMapping,
) -> Result<(Block, Vec<Type>), LoweringError> {
    let num_grid = mapping.grid_types.len();
    let arg_types: Vec<Type> = mapping
        .grid_types
        .iter()
        .chain(&mapping.scalar_prefetch_types)
        .cloned()
        .collect();
    let block_shapes: Vec<Option<BlockShape>> = std::iter::repeat(Some(Vec::new()))
        .take(num_grid)
        .chain(mapping.scalar_prefetch_block_shapes.iter().cloned())
        .collect();

    let args = builder.open_block(&arg_types);
    let ctx = LoweringContext::new(Rc::clone(grid), block_shapes);
    let mut outputs = jaxpr_subcomp(
        &ctx,
        builder,
        &bm.index_map_jaxpr,
        args.into_iter().map(Lowered::Value).collect(),
    )?;
    for _ in bm.block_aval.inner.dtype.physical_shape() {
        outputs.push(Lowered::Value(i32_constant(builder, 0)?));
    }
    finish_body(builder, outputs)
}
