//! Knobs that change how a kernel is lowered.

use std::path::Path;

use mosaic_jaxpr::DimensionSemantics;
use serde::{Deserialize, Serialize};

use crate::error::LoweringError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringConfig {
    /// Target the older, stricter block-shape rules.
    pub forward_compat: bool,

    /// Lower for static verification only. Debug printing and host
    /// callbacks emit nothing in this mode.
    pub for_verification: bool,

    /// Run the structural verifier on every emitted function.
    pub verify: bool,

    /// Semantics used for grid axes when the caller gives none.
    pub default_dimension_semantics: DimensionSemantics,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            forward_compat: false,
            for_verification: false,
            verify: true,
            default_dimension_semantics: DimensionSemantics::Arbitrary,
        }
    }
}

impl LoweringConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, LoweringError> {
        toml::from_str(source).map_err(|e| LoweringError::Configuration(e.to_string()))
    }

    /// Reads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, LoweringError> {
        if !path.exists() {
            log::debug!("no lowering config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path).map_err(|e| {
            LoweringError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = LoweringConfig::from_toml_str("forward_compat = true").unwrap();
        assert!(config.forward_compat);
        assert!(config.verify);
        assert_eq!(config.default_dimension_semantics, DimensionSemantics::Arbitrary);
    }

    #[test]
    fn semantics_are_read_by_name() {
        let config =
            LoweringConfig::from_toml_str("default_dimension_semantics = \"parallel\"").unwrap();
        assert_eq!(config.default_dimension_semantics, DimensionSemantics::Parallel);
    }

    #[test]
    fn ill_typed_values_are_reported() {
        let err = LoweringConfig::from_toml_str("verify = 3").unwrap_err();
        assert!(matches!(err, LoweringError::Configuration(_)));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoweringConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LoweringConfig::default());
    }
}
