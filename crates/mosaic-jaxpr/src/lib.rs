//! # Jaxpr input model (`mosaic-jaxpr`)
//!
//! The typed equation graphs the Mosaic lowering consumes: element dtypes,
//! abstract values and memory spaces, jaxprs and their equations, typed
//! per-primitive parameters, structured reference indexers, and the
//! grid-mapping descriptors that describe how a kernel is tiled.
//!
//! Every type here is plain data and derives `serde`, so kernels can be
//! exchanged as JSON. [`trace::Tracer`] builds small jaxprs in code.

pub mod aval;
pub mod dtype;
pub mod grid;
pub mod indexing;
pub mod jaxpr;
pub mod params;
pub mod primitive;
pub mod trace;

pub use aval::{AbstractRef, AbstractValue, MemorySpace, ShapedArray};
pub use dtype::{DType, KeyImpl, SemaphoreKind};
pub use grid::{
    BlockDim, BlockMapping, DimensionSemantics, GridDim, GridMapping, IndexingMode, Mesh,
};
pub use indexing::{
    DeviceIdOperand, DeviceIdType, Index, IndexOperand, NDIndexer, RefOperand, Slice, SliceSize,
};
pub use jaxpr::{Atom, Effect, Equation, Jaxpr, Literal, Scalar, SourceInfo, Var};
pub use params::{Params, Precision, RoundingMethod};
pub use primitive::Primitive;
pub use trace::{lit, lit_f32, lit_i32, TraceError, Tracer};
