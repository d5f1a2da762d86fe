use std::path::PathBuf;

use mosaic_jaxpr::DimensionSemantics;
use mosaic_lowering::{lower_jaxpr_to_module, LoweringConfig};

use crate::commands::load_config;
use crate::error::CliError;
use crate::io::{read_kernel, write_output, KernelFile};

/// Lowers `kernel` and renders the module as text.
pub fn lower_kernel(
    kernel: &KernelFile,
    config: &LoweringConfig,
    semantics: Option<&[DimensionSemantics]>,
) -> Result<String, CliError> {
    let options = kernel.options(semantics);
    let (module, extra_args) =
        lower_jaxpr_to_module(&kernel.grid_mapping, &kernel.jaxpr, &options, config)?;
    if !extra_args.is_empty() {
        log::info!("`{}` takes {} extra arguments", kernel.name, extra_args.len());
    }
    Ok(module.to_string())
}

pub fn handle_lower(
    file: PathBuf,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    semantics: Option<Vec<DimensionSemantics>>,
) -> Result<(), CliError> {
    let config = load_config(config.as_ref())?;
    let kernel = read_kernel(&file)?;
    log::debug!("lowering `{}` from {}", kernel.name, file.display());
    let text = lower_kernel(&kernel, &config, semantics.as_deref())?;
    write_output(output.as_ref(), &text)?;
    if let Some(path) = &output {
        log::info!("wrote `{}` to {}", kernel.name, path.display());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mosaic_jaxpr::{
        lit_i32, AbstractRef, AbstractValue, BlockDim, BlockMapping, DType, GridDim, GridMapping,
        IndexingMode, MemorySpace, ShapedArray, Tracer,
    };

    /// A kernel reading `(8, 128)` row blocks of a `(16, 128)` array.
    pub(crate) fn row_blocks() -> KernelFile {
        let mut index_map = Tracer::new();
        let i = index_map.input(AbstractValue::scalar(DType::I32));
        let index_map = index_map.finish(vec![i, lit_i32(0)]);

        let mut kernel = Tracer::new();
        kernel.input(AbstractValue::reference(
            vec![8, 128],
            DType::F32,
            Some(MemorySpace::Vmem),
        ));
        KernelFile {
            name: "rows".to_string(),
            jaxpr: kernel.finish(vec![]),
            grid_mapping: GridMapping {
                grid: vec![GridDim::Static(2)],
                grid_names: None,
                block_mappings: vec![BlockMapping {
                    block_shape: vec![BlockDim::Block(8), BlockDim::Block(128)],
                    array_shape: vec![16, 128],
                    array_dtype: DType::F32,
                    block_aval: AbstractRef {
                        inner: ShapedArray::new(vec![8, 128], DType::F32),
                        memory_space: Some(MemorySpace::Vmem),
                    },
                    index_map_jaxpr: index_map,
                    indexing_mode: IndexingMode::Blocked,
                    origin: "x_ref".to_string(),
                }],
                vmapped_dims: Vec::new(),
                num_index_operands: 0,
                num_inputs: 1,
                num_outputs: 0,
                num_scratch_operands: 0,
            },
            mesh: None,
            dimension_semantics: Some(vec![DimensionSemantics::Arbitrary]),
        }
    }

    #[test]
    fn lowered_text_names_the_transforms() {
        let text = lower_kernel(&row_blocks(), &LoweringConfig::default(), None).unwrap();
        assert!(text.starts_with("module @rows"));
        assert!(text.contains("func.func @transform_0"));
        assert!(text.contains("#tpu.dimension_semantics<arbitrary>"));
    }

    #[test]
    fn command_line_semantics_override_the_file() {
        let given = [DimensionSemantics::Parallel];
        let text = lower_kernel(&row_blocks(), &LoweringConfig::default(), Some(&given)).unwrap();
        assert!(text.contains("#tpu.dimension_semantics<parallel>"));
    }

    #[test]
    fn kernel_files_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.json");
        let output = dir.path().join("rows.mlir");
        std::fs::write(&input, serde_json::to_string_pretty(&row_blocks()).unwrap()).unwrap();

        handle_lower(input, None, Some(output.clone()), None).unwrap();
        let text = std::fs::read_to_string(output).unwrap();
        assert!(text.contains("window_params"));
    }
}
