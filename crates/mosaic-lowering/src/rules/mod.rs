//! # Lowering Rules (`mosaic_lowering::rules`)
//!
//! One function per primitive (or per family of primitives), grouped by the
//! kind of operation they lower. Every submodule exposes a `register`
//! function that adds its rules to the [`RuleTable`]; [`register_all`] is
//! called once when the table is first used.
//!
//! Rules registered with [`RuleTable::register_raw`] receive literal
//! operands as [`Lowered::Host`] and decide themselves how to materialize
//! them, usually so a literal can adopt the type of its peer operand.

use mosaic_ir::Value;
use mosaic_jaxpr::{Params, ShapedArray};

use crate::error::LoweringError;
use crate::registry::RuleTable;
use crate::value::Lowered;

mod arith;
mod control_flow;
mod convert;
mod math;
mod matmul;
mod memory;
mod program;
mod prng;
mod reductions;
mod shape;
mod sync;

pub fn register_all(table: &mut RuleTable) {
    arith::register(table);
    math::register(table);
    reductions::register(table);
    shape::register(table);
    matmul::register(table);
    convert::register(table);
    memory::register(table);
    control_flow::register(table);
    program::register(table);
    sync::register(table);
    prng::register(table);
}

// --- Shared helpers ---

/// The IR value of argument `i`.
pub(crate) fn value_arg(args: &[Lowered], i: usize) -> Result<Value, LoweringError> {
    args.get(i)
        .ok_or_else(|| LoweringError::internal(format!("missing argument {}", i)))?
        .value()
}

/// Argument `i` as it was passed to the rule.
pub(crate) fn arg(args: &[Lowered], i: usize) -> Result<Lowered, LoweringError> {
    args.get(i)
        .cloned()
        .ok_or_else(|| LoweringError::internal(format!("missing argument {}", i)))
}

pub(crate) fn array_aval(
    aval: &mosaic_jaxpr::AbstractValue,
) -> Result<&ShapedArray, LoweringError> {
    aval.as_array().ok_or_else(|| {
        LoweringError::internal(format!("expected an array operand, found {}", aval))
    })
}

/// Error for a rule handed parameters of another primitive.
pub(crate) fn unexpected_params(primitive: &str, params: &Params) -> LoweringError {
    LoweringError::internal(format!(
        "`{}` lowered with unexpected parameters `{}`",
        primitive, params
    ))
}
