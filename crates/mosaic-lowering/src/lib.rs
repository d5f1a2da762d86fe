//! # Jaxpr to Mosaic TPU lowering (`mosaic-lowering`)
//!
//! Translates a kernel jaxpr and its grid mapping into a Mosaic module:
//!
//! 1.  [`block_spec`] rejects block mappings the target cannot window.
//! 2.  [`grid`] derives the kernel signature and scheduling metadata.
//! 3.  [`dispatch`] walks the equations, looking each primitive up in the
//!     [`registry`] and calling its rule from [`rules`].
//! 4.  [`module`] assembles `main` and the index-map transforms.
//!
//! Rules share the type mapping in [`types`], constant materialization in
//! [`constant`] and reference indexing in [`indexing`]. Loops use the
//! recognizers in [`patterns`] and the reference discharge in
//! [`discharge`].

pub mod block_spec;
pub mod config;
pub mod constant;
pub mod context;
pub mod discharge;
pub mod dispatch;
pub mod error;
pub mod grid;
pub mod indexing;
pub mod module;
pub mod patterns;
pub mod proxy;
pub mod registry;
pub mod rules;
pub mod types;
pub mod value;

#[cfg(test)]
mod tests;

pub use block_spec::{check_block_mapping, check_block_mappings};
pub use config::LoweringConfig;
pub use context::{GridContext, LoweringContext, RuleContext};
pub use dispatch::jaxpr_subcomp;
pub use error::{LoweringError, LoweringException};
pub use grid::{MeshContext, MosaicGridMapping};
pub use module::{check_kernel, lower_jaxpr_to_module, transform_name, KernelOptions, MAIN};
pub use registry::{registered_primitives, LoweringRule, RuleTable};
pub use value::{BlockShape, Extent, KeyScalarBundle, Lowered, RuleOutput};
