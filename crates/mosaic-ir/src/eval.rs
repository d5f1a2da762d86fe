//! A reference evaluator for the scalar subset of the dialect.
//!
//! Executes `arith`, `math`, `scf`, scalar `memref` operations and the TPU
//! ops that are no-ops on a single core. Vector operations are out of its
//! reach. It exists so lowered kernels can be checked against the values
//! the source jaxpr denotes.

use rustc_hash::FxHashMap;

use crate::attr::Attribute;
use crate::error::EvalError;
use crate::module::Module;
use crate::op::{Block, OpKind, Operation, Value};
use crate::types::{Dim, FloatType, Type};

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    /// Any integer, index or `i1`, kept sign-extended to 64 bits.
    Int(i64),
    Float(f64),
    /// Handle of a buffer owned by the interpreter.
    Buffer(usize),
}

impl RtValue {
    pub fn as_int(self) -> Option<i64> {
        match self {
            RtValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            RtValue::Float(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Buffer {
    shape: Vec<i64>,
    data: Vec<RtValue>,
}

enum Flow {
    Next,
    Yield(Vec<RtValue>),
    Condition(bool, Vec<RtValue>),
    Return(Vec<RtValue>),
}

/// Sign-extends the low `width` bits of `v`.
fn wrap(v: i64, width: u32) -> i64 {
    match width {
        1 => v & 1,
        w if w == 0 || w >= 64 => v,
        w => (v << (64 - w)) >> (64 - w),
    }
}

fn unsigned(v: i64, width: u32) -> u64 {
    match width {
        w if w == 0 || w >= 64 => v as u64,
        w => (v as u64) & ((1u64 << w) - 1),
    }
}

fn round_to(value: f64, ty: &Type) -> f64 {
    match ty.element_type() {
        Type::Float(FloatType::F32) => value as f32 as f64,
        Type::Float(FloatType::BF16) | Type::Float(FloatType::F16) => {
            // keep 8 bits of mantissa for the 16-bit formats
            let bits = (value as f32).to_bits() & 0xFFFF_0000;
            f32::from_bits(bits) as f64
        }
        _ => value,
    }
}

pub struct Interpreter<'m> {
    module: &'m Module,
    env: FxHashMap<Value, RtValue>,
    buffers: Vec<Buffer>,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Interpreter {
            module,
            env: FxHashMap::default(),
            buffers: Vec::new(),
        }
    }

    /// Allocates a row-major buffer and returns its handle.
    pub fn alloc(&mut self, shape: &[i64], data: Vec<RtValue>) -> RtValue {
        self.buffers.push(Buffer {
            shape: shape.to_vec(),
            data,
        });
        RtValue::Buffer(self.buffers.len() - 1)
    }

    pub fn buffer(&self, handle: RtValue) -> Option<&[RtValue]> {
        match handle {
            RtValue::Buffer(id) => self.buffers.get(id).map(|b| b.data.as_slice()),
            _ => None,
        }
    }

    /// Runs function `name` on `args`, returning what it returns.
    pub fn call(&mut self, name: &str, args: &[RtValue]) -> Result<Vec<RtValue>, EvalError> {
        let module = self.module;
        let func = module
            .function(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        if func.arguments().len() != args.len() {
            return Err(EvalError::Arity {
                func: name.to_string(),
                expected: func.arguments().len(),
                actual: args.len(),
            });
        }
        match self.block(&func.body, args)? {
            Flow::Return(values) => Ok(values),
            _ => Ok(Vec::new()),
        }
    }

    fn get(&self, value: Value) -> Result<RtValue, EvalError> {
        self.env
            .get(&value)
            .copied()
            .ok_or_else(|| EvalError::UndefinedValue(value.to_string()))
    }

    fn int(&self, op: &Operation, i: usize) -> Result<i64, EvalError> {
        let value = op.operands.get(i).copied().ok_or_else(|| type_error(op))?;
        self.get(value)?.as_int().ok_or_else(|| type_error(op))
    }

    fn float(&self, op: &Operation, i: usize) -> Result<f64, EvalError> {
        let value = op.operands.get(i).copied().ok_or_else(|| type_error(op))?;
        self.get(value)?.as_float().ok_or_else(|| type_error(op))
    }

    fn width(&self, value: Value) -> u32 {
        match self.module.value_type(value).map(Type::element_type) {
            Some(Type::Integer(w)) => *w,
            _ => 64,
        }
    }

    fn block(&mut self, block: &Block, args: &[RtValue]) -> Result<Flow, EvalError> {
        for (arg, value) in block.arguments.iter().zip(args) {
            self.env.insert(*arg, *value);
        }
        for op in &block.operations {
            match self.operation(op)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn region_block<'a>(&self, op: &'a Operation, i: usize) -> Result<&'a Block, EvalError> {
        op.regions
            .get(i)
            .and_then(|r| r.blocks.first())
            .ok_or_else(|| type_error(op))
    }

    fn operands(&self, op: &Operation) -> Result<Vec<RtValue>, EvalError> {
        op.operands.iter().map(|v| self.get(*v)).collect()
    }

    fn linear_index(&self, op: &Operation, handle: RtValue, indices: &[Value]) -> Result<(usize, usize), EvalError> {
        let RtValue::Buffer(id) = handle else {
            return Err(type_error(op));
        };
        let buffer = self.buffers.get(id).ok_or_else(|| type_error(op))?;
        let mut linear = 0i64;
        for (dim, index) in buffer.shape.iter().zip(indices) {
            let i = self.get(*index)?.as_int().ok_or_else(|| type_error(op))?;
            linear = linear * dim + i;
        }
        if linear < 0 || linear as usize >= buffer.data.len() {
            return Err(EvalError::OutOfBounds {
                index: linear,
                len: buffer.data.len(),
            });
        }
        Ok((id, linear as usize))
    }

    fn operation(&mut self, op: &Operation) -> Result<Flow, EvalError> {
        use OpKind::*;
        let result_ty = op
            .results
            .first()
            .and_then(|r| self.module.value_type(*r))
            .cloned()
            .unwrap_or(Type::Integer(64));
        let out_width = result_ty.bit_width().unwrap_or(64);
        let value = match op.kind {
            Constant => match op.attr("value") {
                Some(Attribute::Int { value, .. }) => RtValue::Int(wrap(*value, out_width)),
                Some(Attribute::Bool(b)) => RtValue::Int(*b as i64),
                Some(Attribute::Float { value, .. }) => RtValue::Float(round_to(*value, &result_ty)),
                _ => return Err(EvalError::Unsupported(format!("{} of this attribute", op.kind))),
            },
            AddI | SubI | MulI | AndI | OrI | XOrI | ShLI | ShRSI | ShRUI | MaxSI | MinSI
            | MaxUI | MinUI | DivSI | DivUI | RemSI | RemUI => {
                let (a, b) = (self.int(op, 0)?, self.int(op, 1)?);
                let w = out_width;
                let r = match op.kind {
                    AddI => a.wrapping_add(b),
                    SubI => a.wrapping_sub(b),
                    MulI => a.wrapping_mul(b),
                    AndI => a & b,
                    OrI => a | b,
                    XOrI => a ^ b,
                    ShLI => a.wrapping_shl(b as u32),
                    ShRSI => a.wrapping_shr(b as u32),
                    ShRUI => (unsigned(a, w) >> (b as u32).min(63)) as i64,
                    MaxSI => a.max(b),
                    MinSI => a.min(b),
                    MaxUI => unsigned(a, w).max(unsigned(b, w)) as i64,
                    MinUI => unsigned(a, w).min(unsigned(b, w)) as i64,
                    _ if b == 0 => return Err(EvalError::DivisionByZero),
                    DivSI => a.wrapping_div(b),
                    RemSI => a.wrapping_rem(b),
                    DivUI => (unsigned(a, w) / unsigned(b, w)) as i64,
                    _ => (unsigned(a, w) % unsigned(b, w)) as i64,
                };
                RtValue::Int(wrap(r, w))
            }
            AddF | SubF | MulF | DivF | RemF | MaximumF | MinimumF | PowF => {
                let (a, b) = (self.float(op, 0)?, self.float(op, 1)?);
                let r = match op.kind {
                    AddF => a + b,
                    SubF => a - b,
                    MulF => a * b,
                    DivF => a / b,
                    RemF => a % b,
                    MaximumF => if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) },
                    MinimumF => if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) },
                    _ => a.powf(b),
                };
                RtValue::Float(round_to(r, &result_ty))
            }
            NegF | AbsF | Exp | Exp2 | Log | Log1p | Sqrt | Rsqrt | Sin | Tanh | Round | RoundEven => {
                let a = self.float(op, 0)?;
                let r = match op.kind {
                    NegF => -a,
                    AbsF => a.abs(),
                    Exp => a.exp(),
                    Exp2 => a.exp2(),
                    Log => a.ln(),
                    Log1p => a.ln_1p(),
                    Sqrt => a.sqrt(),
                    Rsqrt => 1.0 / a.sqrt(),
                    Sin => a.sin(),
                    Tanh => a.tanh(),
                    Round => a.round(),
                    _ => a.round_ties_even(),
                };
                RtValue::Float(round_to(r, &result_ty))
            }
            AbsI => RtValue::Int(wrap(self.int(op, 0)?.wrapping_abs(), out_width)),
            CmpI => {
                let (a, b) = (self.int(op, 0)?, self.int(op, 1)?);
                let w = self.width(op.operands[0]);
                let (ua, ub) = (unsigned(a, w), unsigned(b, w));
                let predicate = op.attr("predicate").and_then(Attribute::as_int);
                let r = match predicate {
                    Some(0) => a == b,
                    Some(1) => a != b,
                    Some(2) => a < b,
                    Some(3) => a <= b,
                    Some(4) => a > b,
                    Some(5) => a >= b,
                    Some(6) => ua < ub,
                    Some(7) => ua <= ub,
                    Some(8) => ua > ub,
                    Some(9) => ua >= ub,
                    _ => return Err(type_error(op)),
                };
                RtValue::Int(r as i64)
            }
            CmpF => {
                let (a, b) = (self.float(op, 0)?, self.float(op, 1)?);
                let ordered = !a.is_nan() && !b.is_nan();
                let predicate = op.attr("predicate").and_then(Attribute::as_int);
                let r = match predicate {
                    Some(0) => false,
                    Some(1) => ordered && a == b,
                    Some(2) => ordered && a > b,
                    Some(3) => ordered && a >= b,
                    Some(4) => ordered && a < b,
                    Some(5) => ordered && a <= b,
                    Some(6) => ordered && a != b,
                    Some(7) => ordered,
                    _ => return Err(type_error(op)),
                };
                RtValue::Int(r as i64)
            }
            Select => {
                let values = self.operands(op)?;
                let cond = values.first().and_then(|v| v.as_int()).ok_or_else(|| type_error(op))?;
                let pick = if cond != 0 { 1 } else { 2 };
                *values.get(pick).ok_or_else(|| type_error(op))?
            }
            ExtUI => {
                let w = self.width(op.operands[0]);
                RtValue::Int(wrap(unsigned(self.int(op, 0)?, w) as i64, out_width))
            }
            ExtSI | TruncI | IndexCast => RtValue::Int(wrap(self.int(op, 0)?, out_width)),
            ExtF | TruncF => RtValue::Float(round_to(self.float(op, 0)?, &result_ty)),
            SIToFP => RtValue::Float(round_to(self.int(op, 0)? as f64, &result_ty)),
            FPToSI => RtValue::Int(wrap(self.float(op, 0)?.trunc() as i64, out_width)),
            AssumeMultiple => self.get(*op.operands.first().ok_or_else(|| type_error(op))?)?,
            TraceStart | TraceStop | TpuLog | Delay => return Ok(Flow::Next),
            Alloca => {
                let Type::MemRef { shape, .. } = &result_ty else {
                    return Err(type_error(op));
                };
                let dims: Vec<i64> = shape
                    .iter()
                    .map(|d| match d {
                        Dim::Static(n) => Ok(*n),
                        Dim::Dynamic => Err(type_error(op)),
                    })
                    .collect::<Result<_, _>>()?;
                let len = dims.iter().product::<i64>().max(1) as usize;
                let fill = if result_ty.element_type().is_float() {
                    RtValue::Float(0.0)
                } else {
                    RtValue::Int(0)
                };
                self.alloc(&dims, vec![fill; len])
            }
            MemRefLoad => {
                let handle = self.get(op.operands[0])?;
                let (id, at) = self.linear_index(op, handle, &op.operands[1..])?;
                self.buffers[id].data[at]
            }
            MemRefStore => {
                let stored = self.get(op.operands[0])?;
                let handle = self.get(op.operands[1])?;
                let (id, at) = self.linear_index(op, handle, &op.operands[2..])?;
                self.buffers[id].data[at] = stored;
                return Ok(Flow::Next);
            }
            For => return self.scf_for(op),
            If => {
                let cond = self.int(op, 0)?;
                let region = if cond != 0 { 0 } else { 1 };
                let results = match op.regions.get(region).and_then(|r| r.blocks.first()) {
                    Some(block) => match self.block(block, &[])? {
                        Flow::Yield(values) => values,
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                };
                self.bind_results(op, results)?;
                return Ok(Flow::Next);
            }
            While => {
                let mut carried = self.operands(op)?;
                let before = self.region_block(op, 0)?;
                let after = self.region_block(op, 1)?;
                loop {
                    let Flow::Condition(go, args) = self.block(before, &carried)? else {
                        return Err(type_error(op));
                    };
                    if !go {
                        carried = args;
                        break;
                    }
                    let Flow::Yield(next) = self.block(after, &args)? else {
                        return Err(type_error(op));
                    };
                    carried = next;
                }
                self.bind_results(op, carried)?;
                return Ok(Flow::Next);
            }
            Region => {
                let body = self.region_block(op, 0)?;
                let results = match self.block(body, &[])? {
                    Flow::Yield(values) => values,
                    _ => Vec::new(),
                };
                self.bind_results(op, results)?;
                return Ok(Flow::Next);
            }
            Yield | TpuYield => return Ok(Flow::Yield(self.operands(op)?)),
            Return => return Ok(Flow::Return(self.operands(op)?)),
            Condition => {
                let values = self.operands(op)?;
                let go = values.first().and_then(|v| v.as_int()).ok_or_else(|| type_error(op))?;
                return Ok(Flow::Condition(go != 0, values[1..].to_vec()));
            }
            other => return Err(EvalError::Unsupported(other.name().to_string())),
        };
        self.bind_results(op, vec![value])?;
        Ok(Flow::Next)
    }

    fn scf_for(&mut self, op: &Operation) -> Result<Flow, EvalError> {
        let lb = self.int(op, 0)?;
        let ub = self.int(op, 1)?;
        let step = self.int(op, 2)?;
        if step <= 0 {
            return Err(type_error(op));
        }
        let mut carried: Vec<RtValue> = op.operands[3..]
            .iter()
            .map(|v| self.get(*v))
            .collect::<Result<_, _>>()?;
        let body = self.region_block(op, 0)?;
        let mut iv = lb;
        while iv < ub {
            let mut args = vec![RtValue::Int(iv)];
            args.extend(carried.iter().copied());
            match self.block(body, &args)? {
                Flow::Yield(next) => carried = next,
                _ => return Err(type_error(op)),
            }
            iv += step;
        }
        self.bind_results(op, carried)?;
        Ok(Flow::Next)
    }

    fn bind_results(&mut self, op: &Operation, values: Vec<RtValue>) -> Result<(), EvalError> {
        if values.len() != op.results.len() {
            return Err(type_error(op));
        }
        for (result, value) in op.results.iter().zip(values) {
            self.env.insert(*result, value);
        }
        Ok(())
    }
}

fn type_error(op: &Operation) -> EvalError {
    EvalError::TypeError {
        op: op.kind.name().to_string(),
    }
}
