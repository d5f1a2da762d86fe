//! Errors raised while lowering a kernel.

use std::fmt;

use miette::Diagnostic;
use mosaic_ir::IrError;
use mosaic_jaxpr::TraceError;
use thiserror::Error;

/// Everything that can go wrong while lowering a jaxpr.
///
/// Failures are never recovered from: every error aborts the lowering. Errors
/// raised while lowering an equation reach the caller wrapped exactly once in
/// [`LoweringError::Exception`], which records the failing equation.
#[derive(Debug, Error, Diagnostic)]
pub enum LoweringError {
    /// No lowering rule is registered for an operation kind.
    #[error("Unimplemented primitive in Pallas TPU lowering: {0}")]
    #[diagnostic(
        code(mosaic::lowering::unsupported_primitive),
        help("Only the operations reachable from Pallas TPU kernels can be lowered")
    )]
    UnsupportedPrimitive(String),

    /// A dtype or abstract value has no representation in the target dialect.
    #[error("Unsupported type: {0}")]
    #[diagnostic(code(mosaic::lowering::unsupported_type))]
    UnsupportedType(String),

    /// A value was placed in a memory space it cannot live in.
    #[error("Invalid memory placement: {0}")]
    #[diagnostic(code(mosaic::lowering::invalid_placement))]
    InvalidPlacement(String),

    /// A block mapping violates the rank, windowing or tiling rules.
    #[error(
        "{message} Block spec for {origin} has block shape {block_shape}, array shape \
         {array_shape}, and index_map returning {index_map_outputs}, in memory space {memory_space}."
    )]
    #[diagnostic(
        code(mosaic::lowering::invalid_block_spec),
        help("The last two block dimensions must be divisible by 8 and 128 respectively, or equal the array dimensions")
    )]
    InvalidBlockSpec {
        message: String,
        origin: String,
        block_shape: String,
        array_shape: String,
        index_map_outputs: String,
        memory_space: String,
    },

    /// Indexing a reference in a way the target cannot express.
    #[error("Unsupported indexing: {0}")]
    #[diagnostic(code(mosaic::lowering::unsupported_indexing))]
    UnsupportedIndexing(String),

    /// An indexer does not match the block shape it is applied to.
    #[error("Invalid indexer: {0}")]
    #[diagnostic(code(mosaic::lowering::invalid_indexer))]
    InvalidIndexer(String),

    /// A load or store shape is not legal for the memory space.
    #[error("Invalid access: {0}")]
    #[diagnostic(code(mosaic::lowering::invalid_access))]
    InvalidAccess(String),

    /// An access pattern that is legal but not implemented yet.
    #[error("Unimplemented access: {0}")]
    #[diagnostic(code(mosaic::lowering::unimplemented_access))]
    UnimplementedAccess(String),

    /// Masked loads and stores are not implemented.
    #[error("Unsupported masking: {0}")]
    #[diagnostic(code(mosaic::lowering::unsupported_masking))]
    UnsupportedMasking(String),

    /// A DMA of an element type that cannot be copied.
    #[error("Unsupported transfer type: {0}")]
    #[diagnostic(code(mosaic::lowering::unsupported_transfer_type))]
    UnsupportedTransferType(String),

    /// A loop unroll factor other than 1 or the full trip count.
    #[error("Unimplemented unroll: {0}")]
    #[diagnostic(
        code(mosaic::lowering::unimplemented_unroll),
        help("Use unroll=1 or unroll equal to the static trip count")
    )]
    UnimplementedUnroll(String),

    /// A scan that is not equivalent to a single counted loop.
    #[error("Unimplemented scan: {0}")]
    #[diagnostic(code(mosaic::lowering::unimplemented_scan))]
    UnimplementedScan(String),

    /// A documented but unimplemented combination of operation and operands.
    #[error("Not implemented: {0}")]
    #[diagnostic(code(mosaic::lowering::unsupported_operation))]
    UnsupportedOperation(String),

    /// Equation parameters are inconsistent with its operands.
    #[error("Invalid parameters: {0}")]
    #[diagnostic(code(mosaic::lowering::invalid_params))]
    InvalidParams(String),

    /// The kernel needs context the caller did not provide, e.g. a mesh.
    #[error("Configuration error: {0}")]
    #[diagnostic(code(mosaic::lowering::configuration))]
    Configuration(String),

    /// Building a helper jaxpr failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Trace(#[from] TraceError),

    /// The emitted IR is structurally invalid.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Verification(#[from] IrError),

    /// An internal invariant does not hold; indicates a bug in the lowering.
    #[error("Internal lowering error: {0}")]
    #[diagnostic(code(mosaic::lowering::internal))]
    Internal(String),

    /// A failure while lowering a specific equation.
    #[error("{0}")]
    #[diagnostic(code(mosaic::lowering::exception))]
    Exception(Box<LoweringException>),
}

impl LoweringError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        LoweringError::UnsupportedOperation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LoweringError::Internal(msg.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        LoweringError::InvalidParams(msg.into())
    }

    /// Whether this error already carries equation context.
    pub fn is_wrapped(&self) -> bool {
        matches!(self, LoweringError::Exception(_))
    }

    /// The underlying failure, looking through an equation wrapper.
    pub fn root_cause(&self) -> &LoweringError {
        match self {
            LoweringError::Exception(exc) => exc.cause.root_cause(),
            other => other,
        }
    }
}

/// Diagnostic context attached to an error raised by a lowering rule.
#[derive(Debug, Error, Diagnostic)]
#[diagnostic(code(mosaic::lowering::exception))]
pub struct LoweringException {
    pub equation: String,
    pub context: String,
    pub input_shapes: Vec<String>,
    pub input_types: Vec<String>,
    pub jaxpr: String,
    #[source]
    pub cause: Box<LoweringError>,
}

impl fmt::Display for LoweringException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Exception while lowering eqn:")?;
        writeln!(f, "  {}", self.equation)?;
        writeln!(f, "With context:")?;
        writeln!(f, "  {}", self.context)?;
        writeln!(f, "With inval shapes=[{}]", self.input_shapes.join(", "))?;
        writeln!(f, "With inval types=[{}]", self.input_types.join(", "))?;
        writeln!(f, "In jaxpr:")?;
        writeln!(f, "{}", self.jaxpr)?;
        write!(f, "{}", self.cause)
    }
}
