//! # Mosaic TPU dialect model (`mosaic-ir`)
//!
//! An in-memory rendition of the target IR the lowering produces: scalar,
//! vector and memref types tagged with TPU memory spaces, operations with
//! nested single-block regions, functions and a module symbol table.
//!
//! *   [`builder::Builder`] appends operations into a stack of open blocks.
//! *   [`printer`] renders a module in MLIR's generic syntax.
//! *   [`verify`] checks definition-before-use and region terminators.
//! *   [`eval::Interpreter`] executes the scalar subset, for testing.

pub mod attr;
pub mod builder;
pub mod error;
pub mod eval;
pub mod module;
pub mod op;
pub mod printer;
pub mod types;
pub mod verify;

pub use attr::Attribute;
pub use builder::{Builder, OpBuilder};
pub use error::{EvalError, IrError};
pub use eval::{Interpreter, RtValue};
pub use module::{Func, Module};
pub use op::{Block, OpKind, Operation, Region, Value};
pub use types::{Dim, FloatType, MemorySpace, Type};
