//! Errors raised while building, verifying or evaluating IR.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum IrError {
    /// A function name was inserted into the module twice.
    #[error("symbol `{0}` is already defined in this module")]
    #[diagnostic(code(mosaic::ir::duplicate_symbol))]
    DuplicateSymbol(String),

    /// `close_block` was called with no block open.
    #[error("no block is open")]
    #[diagnostic(code(mosaic::ir::no_open_block))]
    NoOpenBlock,

    /// Operations were created while no block was open to receive them.
    #[error("{0} operation(s) were created outside of any block")]
    #[diagnostic(code(mosaic::ir::detached_operations))]
    DetachedOperations(usize),

    /// The module was finished while blocks were still open.
    #[error("{0} block(s) still open when finishing the module")]
    #[diagnostic(code(mosaic::ir::unbalanced_blocks))]
    UnbalancedBlocks(usize),

    /// A structural invariant does not hold.
    #[error("verification of `{func}` failed: {message}")]
    #[diagnostic(code(mosaic::ir::verification))]
    Verification { func: String, message: String },
}

/// Errors raised by the reference evaluator.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum EvalError {
    #[error("no function named `{0}`")]
    #[diagnostic(code(mosaic::eval::unknown_function))]
    UnknownFunction(String),

    #[error("`{func}` takes {expected} argument(s), got {actual}")]
    #[diagnostic(code(mosaic::eval::arity))]
    Arity {
        func: String,
        expected: usize,
        actual: usize,
    },

    #[error("`{0}` is not supported by the evaluator")]
    #[diagnostic(code(mosaic::eval::unsupported))]
    Unsupported(String),

    #[error("value {0} read before it was defined")]
    #[diagnostic(code(mosaic::eval::undefined_value))]
    UndefinedValue(String),

    #[error("`{op}` got an operand of the wrong kind")]
    #[diagnostic(code(mosaic::eval::type_error))]
    TypeError { op: String },

    #[error("index {index} out of bounds for buffer of {len} element(s)")]
    #[diagnostic(code(mosaic::eval::out_of_bounds))]
    OutOfBounds { index: i64, len: usize },

    #[error("integer division by zero")]
    #[diagnostic(code(mosaic::eval::division_by_zero))]
    DivisionByZero,
}
