//! Operations, regions and blocks.

use std::fmt;

use indexmap::IndexMap;

use crate::attr::Attribute;

/// An SSA value: an operation result or a block argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub(crate) u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

macro_rules! op_kinds {
    ($( $variant:ident => $name:literal ),* $(,)?) => {
        /// Every operation the lowering emits.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OpKind {
            $( $variant, )*
        }

        impl OpKind {
            /// Fully qualified `dialect.op` name.
            pub fn name(self) -> &'static str {
                match self {
                    $( OpKind::$variant => $name, )*
                }
            }
        }
    };
}

op_kinds! {
    // arith
    Constant => "arith.constant",
    AddI => "arith.addi",
    AddF => "arith.addf",
    SubI => "arith.subi",
    SubF => "arith.subf",
    NegF => "arith.negf",
    MulI => "arith.muli",
    MulF => "arith.mulf",
    DivSI => "arith.divsi",
    DivUI => "arith.divui",
    DivF => "arith.divf",
    RemSI => "arith.remsi",
    RemUI => "arith.remui",
    RemF => "arith.remf",
    MaxSI => "arith.maxsi",
    MaxUI => "arith.maxui",
    MaximumF => "arith.maximumf",
    MinSI => "arith.minsi",
    MinUI => "arith.minui",
    MinimumF => "arith.minimumf",
    AndI => "arith.andi",
    OrI => "arith.ori",
    XOrI => "arith.xori",
    ShLI => "arith.shli",
    ShRSI => "arith.shrsi",
    ShRUI => "arith.shrui",
    CmpI => "arith.cmpi",
    CmpF => "arith.cmpf",
    Select => "arith.select",
    ExtUI => "arith.extui",
    ExtSI => "arith.extsi",
    ExtF => "arith.extf",
    TruncI => "arith.trunci",
    TruncF => "arith.truncf",
    SIToFP => "arith.sitofp",
    FPToSI => "arith.fptosi",
    IndexCast => "arith.index_cast",
    // math
    AbsI => "math.absi",
    AbsF => "math.absf",
    Exp => "math.exp",
    Exp2 => "math.exp2",
    Log => "math.log",
    Log1p => "math.log1p",
    Sqrt => "math.sqrt",
    Rsqrt => "math.rsqrt",
    Sin => "math.sin",
    Tanh => "math.tanh",
    PowF => "math.powf",
    Round => "math.round",
    RoundEven => "math.roundeven",
    // vector
    VectorLoad => "vector.load",
    VectorStore => "vector.store",
    VectorBroadcast => "vector.broadcast",
    ShapeCast => "vector.shape_cast",
    MultiReduction => "vector.multi_reduction",
    Extract => "vector.extract",
    ExtractStridedSlice => "vector.extract_strided_slice",
    VectorTranspose => "vector.transpose",
    // memref
    MemRefLoad => "memref.load",
    MemRefStore => "memref.store",
    Alloca => "memref.alloca",
    // scf
    For => "scf.for",
    If => "scf.if",
    While => "scf.while",
    Condition => "scf.condition",
    Yield => "scf.yield",
    // func
    Return => "func.return",
    // tpu
    MemRefSlice => "tpu.memref_slice",
    MemRefSqueeze => "tpu.memref_squeeze",
    StridedLoad => "tpu.strided_load",
    StridedStore => "tpu.strided_store",
    AssumeMultiple => "tpu.assume_multiple",
    Matmul => "tpu.matmul",
    Concatenate => "tpu.concatenate",
    Iota => "tpu.iota",
    Repeat => "tpu.repeat",
    DynamicRotate => "tpu.dynamic_rotate",
    Bitcast => "tpu.bitcast",
    TraceStart => "tpu.trace_start",
    TraceStop => "tpu.trace_stop",
    Region => "tpu.region",
    TpuYield => "tpu.yield",
    SemAlloc => "tpu.sem_alloc",
    SemRead => "tpu.sem_read",
    SemSignal => "tpu.sem_signal",
    SemWait => "tpu.sem_wait",
    SemBarrier => "tpu.sem_barrier",
    EnqueueDma => "tpu.enqueue_dma",
    WaitDma => "tpu.wait_dma",
    DeviceId => "tpu.device_id",
    IterationBound => "tpu.iteration_bound",
    Delay => "tpu.delay",
    TpuLog => "tpu.log",
    PrngSetSeed32 => "tpu.prng_set_seed_32",
    PrngRandomBits => "tpu.prng_random_bits",
}

impl OpKind {
    /// Whether this op ends the block it appears in.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            OpKind::Yield | OpKind::Condition | OpKind::Return | OpKind::TpuYield
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A straight-line sequence of operations with typed arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub arguments: Vec<Value>,
    pub operations: Vec<Operation>,
}

impl Block {
    pub fn terminator(&self) -> Option<&Operation> {
        self.operations.last().filter(|op| op.kind.is_terminator())
    }
}

/// A list of blocks owned by an operation. Structured ops use one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub blocks: Vec<Block>,
}

impl From<Block> for Region {
    fn from(block: Block) -> Self {
        Region {
            blocks: vec![block],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<Value>,
    pub results: Vec<Value>,
    pub attributes: IndexMap<String, Attribute>,
    pub regions: Vec<Region>,
}

impl Operation {
    pub fn new(kind: OpKind) -> Self {
        Operation {
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            attributes: IndexMap::new(),
            regions: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Calls `f` on this op and every op nested in its regions, pre-order.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Operation)) {
        f(self);
        for region in &self.regions {
            for block in &region.blocks {
                for op in &block.operations {
                    op.walk(f);
                }
            }
        }
    }
}
