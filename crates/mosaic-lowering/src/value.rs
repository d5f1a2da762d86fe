//! Values flowing between lowering rules.

use std::fmt;

use mosaic_ir::Value;
use mosaic_jaxpr::{BlockDim, Literal};

use crate::error::LoweringError;

/// Static shape of the block a reference operand denotes, one entry per
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// A grid-mapped dimension, squeezed away inside the kernel.
    Mapped,
    Static(i64),
    /// A slice whose size is only known at run time.
    Dynamic(Value),
}

impl Extent {
    pub fn as_static(self) -> Option<i64> {
        match self {
            Extent::Static(n) => Some(n),
            _ => None,
        }
    }
}

impl From<BlockDim> for Extent {
    fn from(dim: BlockDim) -> Self {
        match dim {
            BlockDim::Mapped => Extent::Mapped,
            BlockDim::Block(n) => Extent::Static(n as i64),
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Mapped => write!(f, "None"),
            Extent::Static(n) => write!(f, "{}", n),
            Extent::Dynamic(v) => write!(f, "{}", v),
        }
    }
}

pub type BlockShape = Vec<Extent>;

pub fn block_shape_of(shape: &[usize]) -> BlockShape {
    shape.iter().map(|&d| Extent::Static(d as i64)).collect()
}

/// A PRNG key held as its scalar words rather than in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyScalarBundle {
    pub key_shape: Vec<usize>,
    pub scalars: Vec<Value>,
}

/// What a jaxpr name is bound to during lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum Lowered {
    Value(Value),
    Bundle(KeyScalarBundle),
    /// A literal not yet materialized as a constant.
    Host(Literal),
}

impl Lowered {
    /// The IR value, failing for host constants and key bundles.
    pub fn value(&self) -> Result<Value, LoweringError> {
        match self {
            Lowered::Value(v) => Ok(*v),
            Lowered::Host(lit) => Err(LoweringError::internal(format!(
                "literal {} was not materialized",
                lit.value
            ))),
            Lowered::Bundle(_) => Err(LoweringError::internal(
                "a key scalar bundle is not a single value",
            )),
        }
    }

    pub fn as_host(&self) -> Option<&Literal> {
        match self {
            Lowered::Host(lit) => Some(lit),
            _ => None,
        }
    }
}

impl From<Value> for Lowered {
    fn from(value: Value) -> Self {
        Lowered::Value(value)
    }
}

/// Results of a lowering rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutput {
    Single(Lowered),
    Multiple(Vec<Lowered>),
}

impl From<Value> for RuleOutput {
    fn from(value: Value) -> Self {
        RuleOutput::Single(Lowered::Value(value))
    }
}

impl From<Lowered> for RuleOutput {
    fn from(value: Lowered) -> Self {
        RuleOutput::Single(value)
    }
}

impl From<Vec<Value>> for RuleOutput {
    fn from(values: Vec<Value>) -> Self {
        RuleOutput::Multiple(values.into_iter().map(Lowered::Value).collect())
    }
}

impl From<Vec<Lowered>> for RuleOutput {
    fn from(values: Vec<Lowered>) -> Self {
        RuleOutput::Multiple(values)
    }
}
