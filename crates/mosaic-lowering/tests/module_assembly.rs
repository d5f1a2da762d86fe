use indexmap::IndexMap;
use mosaic_ir::{Attribute, Interpreter, OpKind, RtValue, Type};
use mosaic_jaxpr::{
    AbstractValue, DType, DimensionSemantics, Effect, GridDim, IndexingMode, MemorySpace, Mesh,
    Tracer,
};
use mosaic_lowering::{
    lower_jaxpr_to_module, transform_name, KernelOptions, LoweringConfig, LoweringError, MAIN,
};

mod common;
use common::{
    add_one_call, block_mapping, grid_mapping, identity_index_map, init_logging, zero_index_map,
};

fn options(name: &str) -> KernelOptions<'_> {
    KernelOptions {
        name,
        ..KernelOptions::default()
    }
}

fn window(bounds: Vec<i64>, transform: &str) -> Attribute {
    let mut params = IndexMap::new();
    params.insert("window_bounds".to_string(), Attribute::DenseI64(bounds));
    params.insert(
        "transform_indices".to_string(),
        Attribute::SymbolRef(transform.to_string()),
    );
    Attribute::Dict(params)
}

fn semantics(names: &[&str]) -> Attribute {
    Attribute::Array(
        names
            .iter()
            .map(|n| Attribute::opaque(format!("#tpu.dimension_semantics<{}>", n)))
            .collect(),
    )
}

#[test]
fn test_add_one_kernel_module() -> Result<(), LoweringError> {
    init_logging();
    let (gm, kernel) = add_one_call();
    let (module, extra_args) =
        lower_jaxpr_to_module(&gm, &kernel, &options("add_one"), &LoweringConfig::default())?;

    assert!(extra_args.is_empty());
    assert_eq!(module.name, "add_one");
    let names: Vec<&str> = module.functions().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec![MAIN, "transform_0", "transform_1"]);

    let main = module.function(MAIN).expect("main");
    let arg_types = module.argument_types(main);
    assert_eq!(arg_types.len(), 4);
    assert_eq!(arg_types[0], Type::i32());
    assert_eq!(arg_types[1], Type::i32());
    assert_eq!(arg_types[2].to_string(), "memref<128x128xf32, #tpu.memory_space<vmem>>");

    assert_eq!(
        main.attr("window_params"),
        Some(&Attribute::Array(vec![
            window(vec![128, 128], "transform_0"),
            window(vec![128, 128], "transform_1"),
        ]))
    );
    assert_eq!(
        main.attr("iteration_bounds"),
        Some(&Attribute::DenseI64(vec![2, 2]))
    );
    assert_eq!(main.attr("scalar_prefetch"), Some(&Attribute::i64(0)));
    assert_eq!(main.attr("scratch_operands"), Some(&Attribute::i64(0)));
    assert_eq!(
        main.attr("dimension_semantics"),
        Some(&semantics(&["arbitrary", "arbitrary"]))
    );

    assert_eq!(main.count(OpKind::AddF), 1);
    assert_eq!(main.count(OpKind::VectorStore), 1);
    assert_eq!(main.count(OpKind::TraceStart), 1);
    assert_eq!(main.count(OpKind::TraceStop), 1);
    Ok(())
}

#[test]
fn test_transforms_evaluate_the_index_map() -> Result<(), LoweringError> {
    let (gm, kernel) = add_one_call();
    let (module, _) =
        lower_jaxpr_to_module(&gm, &kernel, &options("add_one"), &LoweringConfig::default())?;

    let mut interp = Interpreter::new(&module);
    let out = interp
        .call(&transform_name(1), &[RtValue::Int(1), RtValue::Int(0)])
        .expect("transform evaluates");
    assert_eq!(out, vec![RtValue::Int(1), RtValue::Int(0)]);
    Ok(())
}

#[test]
fn test_explicit_dimension_semantics() -> Result<(), LoweringError> {
    let (gm, kernel) = add_one_call();
    let given = [DimensionSemantics::Parallel, DimensionSemantics::Arbitrary];
    let opts = KernelOptions {
        name: "add_one",
        dimension_semantics: Some(&given),
        mesh: None,
    };
    let (module, _) = lower_jaxpr_to_module(&gm, &kernel, &opts, &LoweringConfig::default())?;
    let main = module.function(MAIN).expect("main");
    assert_eq!(
        main.attr("dimension_semantics"),
        Some(&semantics(&["parallel", "arbitrary"]))
    );
    Ok(())
}

#[test]
fn test_dimension_semantics_must_cover_the_grid() {
    let (gm, kernel) = add_one_call();
    let given = [DimensionSemantics::Parallel];
    let opts = KernelOptions {
        name: "add_one",
        dimension_semantics: Some(&given),
        mesh: None,
    };
    let err = lower_jaxpr_to_module(&gm, &kernel, &opts, &LoweringConfig::default()).unwrap_err();
    assert!(matches!(err, LoweringError::Configuration(_)));
}

#[test]
fn test_configured_default_semantics() -> Result<(), LoweringError> {
    let (gm, kernel) = add_one_call();
    let config = LoweringConfig::from_toml_str("default_dimension_semantics = \"parallel\"")?;
    let (module, _) = lower_jaxpr_to_module(&gm, &kernel, &options("add_one"), &config)?;
    let main = module.function(MAIN).expect("main");
    assert_eq!(
        main.attr("dimension_semantics"),
        Some(&semantics(&["parallel", "parallel"]))
    );
    Ok(())
}

/// Two refs with no equations: `x` is left in HBM, `o` is windowed.
fn copy_kernel() -> mosaic_jaxpr::Jaxpr {
    let mut t = Tracer::new();
    t.input(AbstractValue::reference(
        vec![256, 256],
        DType::F32,
        Some(MemorySpace::Any),
    ));
    t.input(AbstractValue::reference(
        vec![128, 128],
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    t.finish(vec![])
}

#[test]
fn test_any_space_operands_get_no_window() -> Result<(), LoweringError> {
    let gm = grid_mapping(
        &[2, 2],
        vec![
            block_mapping(&[256, 256], &[256, 256], MemorySpace::Any, zero_index_map(2, 2)),
            block_mapping(&[128, 128], &[256, 256], MemorySpace::Vmem, identity_index_map(2)),
        ],
        1,
    );
    let (module, _) =
        lower_jaxpr_to_module(&gm, &copy_kernel(), &options("copy"), &LoweringConfig::default())?;

    let names: Vec<&str> = module.functions().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec![MAIN, "transform_1"]);
    let main = module.function(MAIN).expect("main");
    assert_eq!(
        main.attr("window_params"),
        Some(&Attribute::Array(vec![
            Attribute::Dict(IndexMap::new()),
            window(vec![128, 128], "transform_1"),
        ]))
    );
    Ok(())
}

#[test]
fn test_unblocked_operands_record_their_padding() -> Result<(), LoweringError> {
    let mut padded = block_mapping(&[128, 128], &[256, 256], MemorySpace::Vmem, identity_index_map(2));
    padded.indexing_mode = IndexingMode::Unblocked {
        padding: Some(vec![(0, 0), (4, 4)]),
    };
    let (_, kernel) = add_one_call();
    let gm = grid_mapping(
        &[2, 2],
        vec![
            padded,
            block_mapping(&[128, 128], &[256, 256], MemorySpace::Vmem, identity_index_map(2)),
        ],
        1,
    );
    let (module, _) =
        lower_jaxpr_to_module(&gm, &kernel, &options("padded"), &LoweringConfig::default())?;
    let main = module.function(MAIN).expect("main");
    let Some(Attribute::Array(params)) = main.attr("window_params") else {
        panic!("window_params missing");
    };
    let Attribute::Dict(first) = &params[0] else {
        panic!("window param is not a dictionary");
    };
    assert_eq!(
        first.get("window_kind"),
        Some(&Attribute::opaque("#tpu.element_window<[0, 4],[0, 4]>"))
    );
    Ok(())
}

#[test]
fn test_dynamic_grid_bounds_use_the_sentinel() -> Result<(), LoweringError> {
    let (mut gm, kernel) = add_one_call();
    gm.grid[0] = GridDim::Dynamic;
    let (module, _) =
        lower_jaxpr_to_module(&gm, &kernel, &options("dynamic"), &LoweringConfig::default())?;
    let main = module.function(MAIN).expect("main");
    assert_eq!(
        main.attr("iteration_bounds"),
        Some(&Attribute::DenseI64(vec![i64::MIN, 2]))
    );
    Ok(())
}

#[test]
fn test_operand_count_must_match_the_grid_mapping() {
    let (mut gm, kernel) = add_one_call();
    gm.num_scratch_operands = 1;
    let err =
        lower_jaxpr_to_module(&gm, &kernel, &options("add_one"), &LoweringConfig::default())
            .unwrap_err();
    assert!(matches!(err, LoweringError::Configuration(_)));
}

#[test]
fn test_communication_requires_a_mesh() {
    let (gm, mut kernel) = add_one_call();
    kernel.effects.push(Effect::NamedAxis {
        name: "x".to_string(),
    });
    let err =
        lower_jaxpr_to_module(&gm, &kernel, &options("collective"), &LoweringConfig::default())
            .unwrap_err();
    assert!(matches!(err, LoweringError::Configuration(_)));

    let mesh = Mesh::new(&[("x", 4)]);
    let opts = KernelOptions {
        name: "collective",
        dimension_semantics: None,
        mesh: Some(&mesh),
    };
    assert!(lower_jaxpr_to_module(&gm, &kernel, &opts, &LoweringConfig::default()).is_ok());
}

#[test]
fn test_grid_names_cannot_shadow_mesh_axes() {
    let (mut gm, mut kernel) = add_one_call();
    gm.grid_names = Some(vec!["x".to_string(), "i".to_string()]);
    kernel.effects.push(Effect::NamedAxis {
        name: "y".to_string(),
    });
    let mesh = Mesh::new(&[("x", 2), ("y", 2)]);
    let opts = KernelOptions {
        name: "collective",
        dimension_semantics: None,
        mesh: Some(&mesh),
    };
    let err = lower_jaxpr_to_module(&gm, &kernel, &opts, &LoweringConfig::default()).unwrap_err();
    assert!(matches!(err, LoweringError::Configuration(_)));
}
