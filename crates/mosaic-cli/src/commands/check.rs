use std::path::PathBuf;

use mosaic_jaxpr::DimensionSemantics;
use mosaic_lowering::{check_kernel, LoweringConfig, MosaicGridMapping};

use crate::commands::load_config;
use crate::error::CliError;
use crate::io::{read_kernel, KernelFile};

/// Validates `kernel` without emitting IR and summarizes its signature.
pub fn check(
    kernel: &KernelFile,
    config: &LoweringConfig,
    semantics: Option<&[DimensionSemantics]>,
) -> Result<String, CliError> {
    let mapping = check_kernel(
        &kernel.grid_mapping,
        &kernel.jaxpr,
        &kernel.options(semantics),
        config,
    )?;
    Ok(summary(&kernel.name, &mapping))
}

fn summary(name: &str, mapping: &MosaicGridMapping) -> String {
    let semantics: Vec<String> = mapping
        .dimension_semantics
        .iter()
        .map(|s| s.to_string())
        .collect();
    format!(
        "kernel `{}`: grid {:?} ({}), {} scalar prefetch, {} windowed, {} scratch operands{}\n",
        name,
        mapping.static_grid(),
        semantics.join(", "),
        mapping.scalar_prefetch_types.len(),
        mapping.operand_types.len(),
        mapping.scratch_types.len(),
        if mapping.has_communication {
            ", communicates"
        } else {
            ""
        }
    )
}

pub fn handle_check(
    file: PathBuf,
    config: Option<PathBuf>,
    semantics: Option<Vec<DimensionSemantics>>,
) -> Result<(), CliError> {
    let config = load_config(config.as_ref())?;
    let kernel = read_kernel(&file)?;
    print!("{}", check(&kernel, &config, semantics.as_deref())?);
    Ok(())
}
