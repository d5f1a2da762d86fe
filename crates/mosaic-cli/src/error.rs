use std::path::PathBuf;

use miette::Diagnostic;
use mosaic_lowering::LoweringError;
use thiserror::Error;

/// Errors reported by the command line driver.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Failed to {operation} {path}")]
    #[diagnostic(code(mosaic::cli::io_error))]
    IoError {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed kernel file {path}")]
    #[diagnostic(
        code(mosaic::cli::kernel_format),
        help("Kernel files are JSON objects with `name`, `jaxpr` and `grid_mapping` fields")
    )]
    KernelFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid dimension semantics: {0}")]
    #[diagnostic(
        code(mosaic::cli::dimension_semantics),
        help("Pass a comma separated list of `parallel` and `arbitrary`")
    )]
    DimensionSemantics(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lowering(#[from] LoweringError),
}

pub fn convert_io_error(error: std::io::Error, path: PathBuf, operation: &str) -> CliError {
    CliError::IoError {
        path,
        operation: operation.to_string(),
        source: error,
    }
}
