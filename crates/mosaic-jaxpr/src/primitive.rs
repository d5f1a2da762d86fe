//! The closed set of operation kinds a jaxpr equation can apply.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! primitives {
    ($( $(#[$meta:meta])* $variant:ident => $name:literal ),* $(,)?) => {
        /// Operation kind of an equation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Primitive {
            $( $(#[$meta])* #[serde(rename = $name)] $variant, )*
        }

        impl Primitive {
            /// Every primitive, in declaration order.
            pub const ALL: &'static [Primitive] = &[$(Primitive::$variant),*];

            /// The front end's name for this primitive.
            pub fn name(self) -> &'static str {
                match self {
                    $(Primitive::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Primitive> {
                match name {
                    $($name => Some(Primitive::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

primitives! {
    // Arithmetic
    Add => "add",
    AddAny => "add_any",
    Sub => "sub",
    Mul => "mul",
    Div => "div",
    Rem => "rem",
    Max => "max",
    Min => "min",
    Neg => "neg",
    Abs => "abs",
    Sign => "sign",
    Pow => "pow",
    IntegerPow => "integer_pow",
    Exp => "exp",
    Exp2 => "exp2",
    Log => "log",
    Log1p => "log1p",
    Sqrt => "sqrt",
    Rsqrt => "rsqrt",
    Sin => "sin",
    Tanh => "tanh",
    Logistic => "logistic",
    Round => "round",
    ErfInv => "erf_inv",
    Clamp => "clamp",
    // Comparison
    Eq => "eq",
    Ne => "ne",
    Lt => "lt",
    Le => "le",
    Gt => "gt",
    Ge => "ge",
    // Bitwise and selection
    And => "and",
    Or => "or",
    Xor => "xor",
    Not => "not",
    ShiftLeft => "shift_left",
    ShiftRightArithmetic => "shift_right_arithmetic",
    ShiftRightLogical => "shift_right_logical",
    SelectN => "select_n",
    // Reductions
    ReduceMax => "reduce_max",
    ReduceMin => "reduce_min",
    ReduceSum => "reduce_sum",
    ReduceAnd => "reduce_and",
    ReduceOr => "reduce_or",
    // Shapes
    BroadcastInDim => "broadcast_in_dim",
    Reshape => "reshape",
    Squeeze => "squeeze",
    Concatenate => "concatenate",
    Iota => "iota",
    Transpose => "transpose",
    Slice => "slice",
    Repeat => "repeat",
    Roll => "roll",
    // Contractions and casts
    DotGeneral => "dot_general",
    ConvertElementType => "convert_element_type",
    Bitcast => "bitcast",
    BitcastConvertType => "bitcast_convert_type",
    // Memory
    Get => "get",
    Swap => "swap",
    Load => "load",
    MaskedSwap => "masked_swap",
    MultipleOf => "multiple_of",
    // Control flow
    For => "for",
    Scan => "scan",
    While => "while",
    Cond => "cond",
    Pjit => "pjit",
    ClosedCall => "closed_call",
    CustomJvpCall => "custom_jvp_call",
    RunScoped => "run_scoped",
    // Grid and devices
    ProgramId => "program_id",
    NumPrograms => "num_programs",
    AxisIndex => "axis_index",
    DeviceId => "device_id",
    // Synchronization
    SemaphoreRead => "semaphore_read",
    SemaphoreSignal => "semaphore_signal",
    SemaphoreWait => "semaphore_wait",
    DmaStart => "dma_start",
    DmaWait => "dma_wait",
    GetBarrierSemaphore => "get_barrier_semaphore",
    Delay => "delay",
    // Debugging
    DebugPrint => "debug_print",
    DebugCallback => "debug_callback",
    // Random numbers
    PrngSeed => "prng_seed",
    PrngRandomBits => "prng_random_bits",
    RandomSeed => "random_seed",
    RandomBits => "random_bits",
    RandomFoldIn => "random_fold_in",
    RandomWrap => "random_wrap",
    RandomUnwrap => "random_unwrap",
    // Known to the front end, not lowerable to TPU
    Cumsum => "cumsum",
    Sort => "sort",
    Gather => "gather",
    DynamicSlice => "dynamic_slice",
    DynamicUpdateSlice => "dynamic_update_slice",
}

impl Primitive {
    /// Whether equations of this kind bind a list of outputs rather than one.
    pub fn multiple_results(self) -> bool {
        matches!(
            self,
            Primitive::For
                | Primitive::Scan
                | Primitive::While
                | Primitive::Cond
                | Primitive::Pjit
                | Primitive::ClosedCall
                | Primitive::CustomJvpCall
                | Primitive::RunScoped
                | Primitive::SemaphoreSignal
                | Primitive::SemaphoreWait
                | Primitive::DmaStart
                | Primitive::DmaWait
                | Primitive::Delay
                | Primitive::DebugPrint
                | Primitive::DebugCallback
                | Primitive::PrngSeed
                | Primitive::Sort
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_lookup() {
        for &prim in Primitive::ALL {
            assert_eq!(Primitive::from_name(prim.name()), Some(prim));
        }
        assert_eq!(Primitive::from_name("not_a_primitive"), None);
    }

    #[test]
    fn serde_uses_front_end_names() {
        let json = serde_json::to_string(&Primitive::ShiftRightLogical).unwrap();
        assert_eq!(json, "\"shift_right_logical\"");
    }
}
