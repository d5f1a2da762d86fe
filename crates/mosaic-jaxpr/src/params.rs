//! Typed per-primitive equation parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::{DType, KeyImpl};
use crate::indexing::{DeviceIdOperand, RefOperand};
use crate::jaxpr::Jaxpr;

/// Requested matmul precision for one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Default,
    High,
    Highest,
}

/// Rounding behaviour of `round`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMethod {
    AwayFromZero,
    ToNearestEven,
}

/// Parameters of one equation. Each variant belongs to one primitive or
/// one family of primitives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Params {
    #[default]
    None,
    Axes {
        axes: Vec<usize>,
    },
    BroadcastInDim {
        shape: Vec<usize>,
        broadcast_dimensions: Vec<usize>,
    },
    Reshape {
        new_sizes: Vec<usize>,
        #[serde(default)]
        dimensions: Option<Vec<usize>>,
    },
    Squeeze {
        dimensions: Vec<usize>,
    },
    Concatenate {
        dimension: usize,
    },
    Iota {
        dtype: DType,
        shape: Vec<usize>,
        dimension: usize,
    },
    Transpose {
        permutation: Vec<usize>,
    },
    Slice {
        start_indices: Vec<usize>,
        limit_indices: Vec<usize>,
        #[serde(default)]
        strides: Option<Vec<usize>>,
    },
    Repeat {
        repeats: usize,
        axis: usize,
    },
    /// `roll`; the shift amount is the second input.
    Roll {
        axis: usize,
        #[serde(default)]
        stride: Option<i64>,
        #[serde(default)]
        stride_axis: Option<usize>,
    },
    DotGeneral {
        lhs_contracting: Vec<usize>,
        rhs_contracting: Vec<usize>,
        #[serde(default)]
        lhs_batch: Vec<usize>,
        #[serde(default)]
        rhs_batch: Vec<usize>,
        #[serde(default)]
        precision: Option<[Precision; 2]>,
    },
    ConvertElementType {
        new_dtype: DType,
    },
    IntegerPow {
        y: i32,
    },
    Round {
        method: RoundingMethod,
    },
    MultipleOf {
        values: Vec<i64>,
    },
    /// `load` and `get`.
    Load {
        target: RefOperand,
        #[serde(default)]
        mask: Option<usize>,
    },
    /// `swap` and `masked_swap`.
    Swap {
        target: RefOperand,
        value: usize,
        #[serde(default)]
        mask: Option<usize>,
    },
    For {
        jaxpr: Box<Jaxpr>,
        nsteps: usize,
        #[serde(default)]
        reverse: bool,
        #[serde(default = "one")]
        unroll: usize,
    },
    Scan {
        jaxpr: Box<Jaxpr>,
        num_consts: usize,
        num_carry: usize,
        length: usize,
        #[serde(default)]
        reverse: bool,
        #[serde(default = "one")]
        unroll: usize,
    },
    While {
        cond_jaxpr: Box<Jaxpr>,
        body_jaxpr: Box<Jaxpr>,
        cond_nconsts: usize,
        body_nconsts: usize,
    },
    Cond {
        branches: Vec<Jaxpr>,
    },
    /// `pjit`, `closed_call` and `custom_jvp_call`.
    Call {
        jaxpr: Box<Jaxpr>,
        #[serde(default)]
        num_consts: usize,
        #[serde(default)]
        symbolic_zeros: bool,
    },
    /// `run_scoped`; the leading invars bind the equation inputs, the rest
    /// are allocated for the duration of the body.
    RunScoped {
        jaxpr: Box<Jaxpr>,
    },
    /// `program_id` and `num_programs`.
    GridAxis {
        axis: usize,
    },
    AxisIndex {
        axis_name: String,
    },
    SemaphoreRead {
        target: RefOperand,
    },
    SemaphoreSignal {
        target: RefOperand,
        value: usize,
        #[serde(default)]
        device_id: Option<DeviceIdOperand>,
        #[serde(default)]
        core_index: Option<usize>,
    },
    SemaphoreWait {
        target: RefOperand,
        value: usize,
    },
    DmaStart {
        src: RefOperand,
        dst: RefOperand,
        sem: RefOperand,
        #[serde(default)]
        src_sem: Option<RefOperand>,
        #[serde(default)]
        device_id: Option<DeviceIdOperand>,
    },
    DmaWait {
        sem: RefOperand,
        target: RefOperand,
    },
    DebugPrint {
        format: String,
        #[serde(default)]
        has_placeholders: bool,
    },
    PrngRandomBits {
        shape: Vec<usize>,
    },
    RandomBits {
        bit_width: u32,
        shape: Vec<usize>,
    },
    /// `random_seed` and `random_wrap`.
    Key {
        key_impl: KeyImpl,
    },
}

fn one() -> usize {
    1
}

impl Params {
    /// Jaxprs nested in these parameters, in a fixed order.
    pub fn sub_jaxprs(&self) -> Vec<&Jaxpr> {
        match self {
            Params::For { jaxpr, .. }
            | Params::Scan { jaxpr, .. }
            | Params::Call { jaxpr, .. }
            | Params::RunScoped { jaxpr } => vec![jaxpr.as_ref()],
            Params::While {
                cond_jaxpr,
                body_jaxpr,
                ..
            } => vec![cond_jaxpr.as_ref(), body_jaxpr.as_ref()],
            Params::Cond { branches } => branches.iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn list<T: fmt::Debug>(items: &[T]) -> String {
    let parts: Vec<String> = items.iter().map(|i| format!("{:?}", i)).collect();
    format!("({})", parts.join(","))
}

fn indented(jaxpr: &Jaxpr) -> String {
    jaxpr.to_string().replace('\n', "\n    ")
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Params::None => Ok(()),
            Params::Axes { axes } => write!(f, "axes={}", list(axes)),
            Params::BroadcastInDim {
                shape,
                broadcast_dimensions,
            } => write!(
                f,
                "shape={} broadcast_dimensions={}",
                list(shape),
                list(broadcast_dimensions)
            ),
            Params::Reshape {
                new_sizes,
                dimensions,
            } => {
                write!(f, "new_sizes={}", list(new_sizes))?;
                if let Some(dims) = dimensions {
                    write!(f, " dimensions={}", list(dims))?;
                }
                Ok(())
            }
            Params::Squeeze { dimensions } => write!(f, "dimensions={}", list(dimensions)),
            Params::Concatenate { dimension } => write!(f, "dimension={}", dimension),
            Params::Iota {
                dtype,
                shape,
                dimension,
            } => write!(f, "dtype={} shape={} dimension={}", dtype, list(shape), dimension),
            Params::Transpose { permutation } => write!(f, "permutation={}", list(permutation)),
            Params::Slice {
                start_indices,
                limit_indices,
                strides,
            } => {
                write!(
                    f,
                    "start_indices={} limit_indices={}",
                    list(start_indices),
                    list(limit_indices)
                )?;
                if let Some(strides) = strides {
                    write!(f, " strides={}", list(strides))?;
                }
                Ok(())
            }
            Params::Repeat { repeats, axis } => write!(f, "repeats={} axis={}", repeats, axis),
            Params::Roll {
                axis,
                stride,
                stride_axis,
            } => write!(f, "axis={} stride={:?} stride_axis={:?}", axis, stride, stride_axis),
            Params::DotGeneral {
                lhs_contracting,
                rhs_contracting,
                lhs_batch,
                rhs_batch,
                precision,
            } => write!(
                f,
                "dimension_numbers=(({}, {}), ({}, {})) precision={:?}",
                list(lhs_contracting),
                list(rhs_contracting),
                list(lhs_batch),
                list(rhs_batch),
                precision
            ),
            Params::ConvertElementType { new_dtype } => write!(f, "new_dtype={}", new_dtype),
            Params::IntegerPow { y } => write!(f, "y={}", y),
            Params::Round { method } => write!(f, "rounding_method={:?}", method),
            Params::MultipleOf { values } => write!(f, "values={}", list(values)),
            Params::Load { target, mask } => write!(f, "target={:?} mask={:?}", target, mask),
            Params::Swap {
                target,
                value,
                mask,
            } => write!(f, "target={:?} value={} mask={:?}", target, value, mask),
            Params::For {
                jaxpr,
                nsteps,
                reverse,
                unroll,
            } => write!(
                f,
                "nsteps={} reverse={} unroll={} jaxpr={}",
                nsteps,
                reverse,
                unroll,
                indented(jaxpr)
            ),
            Params::Scan {
                jaxpr,
                num_consts,
                num_carry,
                length,
                reverse,
                unroll,
            } => write!(
                f,
                "length={} num_consts={} num_carry={} reverse={} unroll={} jaxpr={}",
                length,
                num_consts,
                num_carry,
                reverse,
                unroll,
                indented(jaxpr)
            ),
            Params::While {
                cond_jaxpr,
                body_jaxpr,
                cond_nconsts,
                body_nconsts,
            } => write!(
                f,
                "cond_nconsts={} body_nconsts={} cond_jaxpr={} body_jaxpr={}",
                cond_nconsts,
                body_nconsts,
                indented(cond_jaxpr),
                indented(body_jaxpr)
            ),
            Params::Cond { branches } => {
                write!(f, "branches=(")?;
                for branch in branches {
                    write!(f, "\n    {}", indented(branch))?;
                }
                write!(f, ")")
            }
            Params::Call { jaxpr, .. } | Params::RunScoped { jaxpr } => {
                write!(f, "jaxpr={}", indented(jaxpr))
            }
            Params::GridAxis { axis } => write!(f, "axis={}", axis),
            Params::AxisIndex { axis_name } => write!(f, "axis_name={}", axis_name),
            Params::SemaphoreRead { target } => write!(f, "target={:?}", target),
            Params::SemaphoreSignal {
                target,
                value,
                device_id,
                core_index,
            } => write!(
                f,
                "target={:?} value={} device_id={:?} core_index={:?}",
                target, value, device_id, core_index
            ),
            Params::SemaphoreWait { target, value } => {
                write!(f, "target={:?} value={}", target, value)
            }
            Params::DmaStart {
                src,
                dst,
                sem,
                src_sem,
                device_id,
            } => write!(
                f,
                "src={:?} dst={:?} sem={:?} src_sem={:?} device_id={:?}",
                src, dst, sem, src_sem, device_id
            ),
            Params::DmaWait { sem, target } => write!(f, "sem={:?} target={:?}", sem, target),
            Params::DebugPrint { format, .. } => write!(f, "fmt={:?}", format),
            Params::PrngRandomBits { shape } => write!(f, "shape={}", list(shape)),
            Params::RandomBits { bit_width, shape } => {
                write!(f, "bit_width={} shape={}", bit_width, list(shape))
            }
            Params::Key { key_impl } => write!(f, "impl={}", key_impl.name),
        }
    }
}
