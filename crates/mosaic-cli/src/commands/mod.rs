pub mod check;
pub mod lower;

use std::path::{Path, PathBuf};

use mosaic_lowering::LoweringConfig;

use crate::error::CliError;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG: &str = "mosaic.toml";

pub fn load_config(path: Option<&PathBuf>) -> Result<LoweringConfig, CliError> {
    let path = path.map_or_else(|| Path::new(DEFAULT_CONFIG).to_path_buf(), Clone::clone);
    Ok(LoweringConfig::load(&path)?)
}
