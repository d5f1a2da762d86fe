use std::path::{Path, PathBuf};

use mosaic_jaxpr::{DimensionSemantics, GridMapping, Jaxpr, Mesh};
use mosaic_lowering::KernelOptions;
use serde::{Deserialize, Serialize};

use crate::error::{convert_io_error, CliError};

/// A kernel as exchanged with the front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelFile {
    pub name: String,
    pub jaxpr: Jaxpr,
    pub grid_mapping: GridMapping,
    #[serde(default)]
    pub mesh: Option<Mesh>,
    #[serde(default)]
    pub dimension_semantics: Option<Vec<DimensionSemantics>>,
}

impl KernelFile {
    /// Options for lowering this kernel. `semantics` overrides the
    /// semantics stored in the file.
    pub fn options<'a>(&'a self, semantics: Option<&'a [DimensionSemantics]>) -> KernelOptions<'a> {
        KernelOptions {
            name: &self.name,
            dimension_semantics: semantics.or(self.dimension_semantics.as_deref()),
            mesh: self.mesh.as_ref(),
        }
    }
}

pub fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|e| convert_io_error(e, path.to_path_buf(), "read"))
}

pub fn read_kernel(path: &Path) -> Result<KernelFile, CliError> {
    let contents = read_file(path)?;
    serde_json::from_str(&contents).map_err(|source| CliError::KernelFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `contents` to `output`, or to stdout when no path is given.
pub fn write_output(output: Option<&PathBuf>, contents: &str) -> Result<(), CliError> {
    match output {
        Some(path) => std::fs::write(path, contents)
            .map_err(|e| convert_io_error(e, path.clone(), "write")),
        None => {
            print!("{}", contents);
            Ok(())
        }
    }
}

/// Parses `parallel,arbitrary,...`.
pub fn parse_semantics(list: &str) -> Result<Vec<DimensionSemantics>, CliError> {
    list.split(',')
        .map(|s| s.trim().parse().map_err(CliError::DimensionSemantics))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantics_lists_are_split_on_commas() {
        let parsed = parse_semantics("parallel, arbitrary").unwrap();
        assert_eq!(
            parsed,
            vec![DimensionSemantics::Parallel, DimensionSemantics::Arbitrary]
        );
        assert!(matches!(
            parse_semantics("parallel,sequential"),
            Err(CliError::DimensionSemantics(_))
        ));
    }

    #[test]
    fn missing_kernel_files_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_kernel(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CliError::IoError { .. }));
    }

    #[test]
    fn malformed_kernel_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        std::fs::write(&path, "{\"name\": \"k\"}").unwrap();
        let err = read_kernel(&path).unwrap_err();
        assert!(matches!(err, CliError::KernelFormat { .. }));
    }
}
