//! Building small jaxprs programmatically.
//!
//! [`Tracer`] appends equations one at a time and infers output avals for the
//! handful of primitives that helper computations are written in. It is how
//! the lowering expresses an operation in terms of other operations, and how
//! tests build input graphs without spelling out every aval.

use miette::Diagnostic;
use thiserror::Error;

use crate::aval::{AbstractValue, ShapedArray};
use crate::dtype::DType;
use crate::jaxpr::{Atom, Equation, Jaxpr, Literal, Scalar, SourceInfo, Var};
use crate::params::Params;
use crate::primitive::Primitive;

/// Errors raised while inferring the type of a traced equation.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// Operand shapes cannot be combined.
    #[error("incompatible shapes for {primitive}: {lhs:?} and {rhs:?}")]
    #[diagnostic(code(mosaic::trace::shape_mismatch))]
    ShapeMismatch {
        primitive: Primitive,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    /// Operand dtypes differ and neither is weakly typed.
    #[error("incompatible dtypes for {primitive}: {lhs} and {rhs}")]
    #[diagnostic(code(mosaic::trace::dtype_mismatch))]
    DTypeMismatch {
        primitive: Primitive,
        lhs: DType,
        rhs: DType,
    },

    /// An operand was a reference or semaphore where an array was expected.
    #[error("{primitive} expects an array operand, got {aval}")]
    #[diagnostic(code(mosaic::trace::not_an_array))]
    NotAnArray { primitive: Primitive, aval: String },

    /// Parameters are inconsistent with the operand avals.
    #[error("invalid parameters for {primitive}: {message}")]
    #[diagnostic(code(mosaic::trace::invalid_params))]
    InvalidParams { primitive: Primitive, message: String },
}

/// A weakly typed `f32` literal.
pub fn lit_f32(value: f64) -> Atom {
    Atom::Literal(Literal::weak(Scalar::Float(value)))
}

/// A weakly typed `i32` literal.
pub fn lit_i32(value: i64) -> Atom {
    Atom::Literal(Literal::weak(Scalar::Int(value)))
}

/// A strongly typed literal.
pub fn lit(value: Scalar, dtype: DType) -> Atom {
    Atom::Literal(Literal::new(value, dtype))
}

fn array_of(primitive: Primitive, atom: &Atom) -> Result<ShapedArray, TraceError> {
    match atom.aval() {
        AbstractValue::Array(array) => Ok(array),
        other => Err(TraceError::NotAnArray {
            primitive,
            aval: other.to_string(),
        }),
    }
}

/// Re-types a weak literal to `dtype`, converting its host value.
fn retype(atom: &Atom, dtype: &DType) -> Atom {
    match atom {
        Atom::Literal(lit) if lit.aval.weak_type && &lit.aval.dtype != dtype => {
            let value = if dtype.is_float() {
                Scalar::Float(lit.value.as_f64())
            } else if dtype.is_bool() {
                Scalar::Bool(lit.value.as_f64() != 0.0)
            } else {
                Scalar::Int(lit.value.as_f64() as i64)
            };
            Atom::Literal(Literal::new(value, dtype.clone()))
        }
        other => other.clone(),
    }
}

/// Incremental jaxpr builder.
#[derive(Debug, Default)]
pub struct Tracer {
    next_id: u32,
    invars: Vec<Var>,
    eqns: Vec<Equation>,
    name_stack: Vec<String>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the next jaxpr input.
    pub fn input(&mut self, aval: impl Into<AbstractValue>) -> Atom {
        let var = self.fresh_var(aval);
        self.invars.push(var.clone());
        Atom::Var(var)
    }

    pub fn fresh_var(&mut self, aval: impl Into<AbstractValue>) -> Var {
        let var = Var::new(self.next_id, aval);
        self.next_id += 1;
        var
    }

    /// Equations bound from now on are attributed to scope `name`.
    pub fn push_scope(&mut self, name: impl Into<String>) {
        self.name_stack.push(name.into());
    }

    pub fn pop_scope(&mut self) {
        self.name_stack.pop();
    }

    /// Appends an equation with explicitly given output avals.
    pub fn bind(
        &mut self,
        primitive: Primitive,
        params: Params,
        inputs: Vec<Atom>,
        out_avals: Vec<AbstractValue>,
    ) -> Vec<Atom> {
        let outputs: Vec<Var> = out_avals.into_iter().map(|a| self.fresh_var(a)).collect();
        let mut eqn = Equation::new(primitive, params, inputs, outputs.clone());
        eqn.source = SourceInfo {
            name_stack: self.name_stack.clone(),
            location: None,
        };
        self.eqns.push(eqn);
        outputs.into_iter().map(Atom::Var).collect()
    }

    /// Appends a single-result equation.
    pub fn bind1(
        &mut self,
        primitive: Primitive,
        params: Params,
        inputs: Vec<Atom>,
        out_aval: impl Into<AbstractValue>,
    ) -> Atom {
        let mut outs = self.bind(primitive, params, inputs, vec![out_aval.into()]);
        // bind() returns exactly one atom per requested aval
        outs.remove(0)
    }

    pub fn finish(self, outvars: Vec<Atom>) -> Jaxpr {
        Jaxpr {
            invars: self.invars,
            eqns: self.eqns,
            outvars,
            effects: Vec::new(),
        }
    }

    // --- Elementwise ---

    pub fn unary(&mut self, primitive: Primitive, x: &Atom) -> Result<Atom, TraceError> {
        let aval = array_of(primitive, x)?;
        let out = ShapedArray::new(aval.shape, aval.dtype);
        Ok(self.bind1(primitive, Params::None, vec![x.clone()], out))
    }

    fn join(
        &self,
        primitive: Primitive,
        x: &Atom,
        y: &Atom,
    ) -> Result<(Atom, Atom, Vec<usize>, DType), TraceError> {
        let xa = array_of(primitive, x)?;
        let ya = array_of(primitive, y)?;
        let dtype = match (xa.weak_type, ya.weak_type) {
            (true, false) => ya.dtype.clone(),
            (false, true) => xa.dtype.clone(),
            _ if xa.dtype == ya.dtype => xa.dtype.clone(),
            _ => {
                return Err(TraceError::DTypeMismatch {
                    primitive,
                    lhs: xa.dtype,
                    rhs: ya.dtype,
                })
            }
        };
        let shape = if xa.shape == ya.shape || ya.is_scalar() {
            xa.shape.clone()
        } else if xa.is_scalar() {
            ya.shape.clone()
        } else {
            return Err(TraceError::ShapeMismatch {
                primitive,
                lhs: xa.shape,
                rhs: ya.shape,
            });
        };
        Ok((retype(x, &dtype), retype(y, &dtype), shape, dtype))
    }

    /// An arithmetic or bitwise binary op. Scalars broadcast against arrays.
    pub fn binary(&mut self, primitive: Primitive, x: &Atom, y: &Atom) -> Result<Atom, TraceError> {
        let (x, y, shape, dtype) = self.join(primitive, x, y)?;
        Ok(self.bind1(primitive, Params::None, vec![x, y], ShapedArray::new(shape, dtype)))
    }

    pub fn compare(&mut self, primitive: Primitive, x: &Atom, y: &Atom) -> Result<Atom, TraceError> {
        let (x, y, shape, _) = self.join(primitive, x, y)?;
        Ok(self.bind1(primitive, Params::None, vec![x, y], ShapedArray::new(shape, DType::Bool)))
    }

    /// `select_n(pred, on_false, on_true)`; scalar cases are broadcast to the
    /// predicate's shape first.
    pub fn select(&mut self, pred: &Atom, on_false: &Atom, on_true: &Atom) -> Result<Atom, TraceError> {
        let pred_aval = array_of(Primitive::SelectN, pred)?;
        let (on_false, on_true, case_shape, dtype) = self.join(Primitive::SelectN, on_false, on_true)?;
        let shape = if pred_aval.is_scalar() {
            case_shape
        } else {
            pred_aval.shape.clone()
        };
        let on_false = self.broadcast_to(&on_false, &shape)?;
        let on_true = self.broadcast_to(&on_true, &shape)?;
        Ok(self.bind1(
            Primitive::SelectN,
            Params::None,
            vec![pred.clone(), on_false, on_true],
            ShapedArray::new(shape, dtype),
        ))
    }

    pub fn convert(&mut self, x: &Atom, dtype: DType) -> Result<Atom, TraceError> {
        let aval = array_of(Primitive::ConvertElementType, x)?;
        if aval.dtype == dtype && !aval.weak_type {
            return Ok(x.clone());
        }
        Ok(self.bind1(
            Primitive::ConvertElementType,
            Params::ConvertElementType {
                new_dtype: dtype.clone(),
            },
            vec![x.clone()],
            ShapedArray::new(aval.shape, dtype),
        ))
    }

    // --- Shapes ---

    pub fn broadcast_in_dim(
        &mut self,
        x: &Atom,
        shape: &[usize],
        broadcast_dimensions: &[usize],
    ) -> Result<Atom, TraceError> {
        let primitive = Primitive::BroadcastInDim;
        let aval = array_of(primitive, x)?;
        let valid = broadcast_dimensions.len() == aval.ndim()
            && aval.shape.iter().zip(broadcast_dimensions).all(|(&d, &out)| {
                out < shape.len() && (d == 1 || d == shape[out])
            });
        if !valid {
            return Err(TraceError::InvalidParams {
                primitive,
                message: format!(
                    "cannot broadcast {:?} to {:?} along {:?}",
                    aval.shape, shape, broadcast_dimensions
                ),
            });
        }
        Ok(self.bind1(
            primitive,
            Params::BroadcastInDim {
                shape: shape.to_vec(),
                broadcast_dimensions: broadcast_dimensions.to_vec(),
            },
            vec![x.clone()],
            ShapedArray::new(shape.to_vec(), aval.dtype),
        ))
    }

    /// Broadcasts `x` to `shape` aligning trailing dimensions; a no-op when
    /// the shapes already agree.
    pub fn broadcast_to(&mut self, x: &Atom, shape: &[usize]) -> Result<Atom, TraceError> {
        let aval = array_of(Primitive::BroadcastInDim, x)?;
        if aval.shape == shape {
            return Ok(x.clone());
        }
        let offset = shape.len().saturating_sub(aval.ndim());
        let dims: Vec<usize> = (offset..offset + aval.ndim()).collect();
        self.broadcast_in_dim(x, shape, &dims)
    }

    pub fn reshape(&mut self, x: &Atom, new_sizes: &[usize]) -> Result<Atom, TraceError> {
        let primitive = Primitive::Reshape;
        let aval = array_of(primitive, x)?;
        if aval.size() != new_sizes.iter().product::<usize>() {
            return Err(TraceError::ShapeMismatch {
                primitive,
                lhs: aval.shape,
                rhs: new_sizes.to_vec(),
            });
        }
        Ok(self.bind1(
            primitive,
            Params::Reshape {
                new_sizes: new_sizes.to_vec(),
                dimensions: None,
            },
            vec![x.clone()],
            ShapedArray::new(new_sizes.to_vec(), aval.dtype),
        ))
    }

    pub fn squeeze(&mut self, x: &Atom, dimensions: &[usize]) -> Result<Atom, TraceError> {
        let primitive = Primitive::Squeeze;
        let aval = array_of(primitive, x)?;
        if dimensions.iter().any(|&d| aval.shape.get(d) != Some(&1)) {
            return Err(TraceError::InvalidParams {
                primitive,
                message: format!("cannot squeeze {:?} from {:?}", dimensions, aval.shape),
            });
        }
        let shape: Vec<usize> = aval
            .shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !dimensions.contains(i))
            .map(|(_, &d)| d)
            .collect();
        Ok(self.bind1(
            primitive,
            Params::Squeeze {
                dimensions: dimensions.to_vec(),
            },
            vec![x.clone()],
            ShapedArray::new(shape, aval.dtype),
        ))
    }

    /// `reduce_*` over `axes`, dropping them from the shape.
    pub fn reduce(&mut self, primitive: Primitive, x: &Atom, axes: &[usize]) -> Result<Atom, TraceError> {
        let aval = array_of(primitive, x)?;
        if axes.iter().any(|&a| a >= aval.ndim()) {
            return Err(TraceError::InvalidParams {
                primitive,
                message: format!("axes {:?} out of range for {:?}", axes, aval.shape),
            });
        }
        let shape: Vec<usize> = aval
            .shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect();
        Ok(self.bind1(
            primitive,
            Params::Axes {
                axes: axes.to_vec(),
            },
            vec![x.clone()],
            ShapedArray::new(shape, aval.dtype),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_literals_adopt_the_array_dtype() {
        let mut t = Tracer::new();
        let x = t.input(ShapedArray::new(vec![8, 128], DType::BF16));
        let y = t.binary(Primitive::Mul, &x, &lit_f32(2.0)).unwrap();
        assert_eq!(y.aval(), AbstractValue::array(vec![8, 128], DType::BF16));
        let jaxpr = t.finish(vec![y]);
        let lit = jaxpr.eqns[0].inputs[1].as_literal().unwrap();
        assert_eq!(lit.aval.dtype, DType::BF16);
        assert!(!lit.aval.weak_type);
    }

    #[test]
    fn strong_dtype_mismatch_is_rejected() {
        let mut t = Tracer::new();
        let x = t.input(ShapedArray::scalar(DType::F32));
        let y = t.input(ShapedArray::scalar(DType::I32));
        let err = t.binary(Primitive::Add, &x, &y).unwrap_err();
        assert!(matches!(err, TraceError::DTypeMismatch { .. }));
    }

    #[test]
    fn select_broadcasts_scalar_cases() {
        let mut t = Tracer::new();
        let p = t.input(ShapedArray::new(vec![4, 8], DType::Bool));
        let out = t.select(&p, &lit_f32(0.0), &lit_f32(1.0)).unwrap();
        assert_eq!(out.aval(), AbstractValue::array(vec![4, 8], DType::F32));
        let jaxpr = t.finish(vec![out]);
        let prims: Vec<_> = jaxpr.eqns.iter().map(|e| e.primitive).collect();
        assert_eq!(
            prims,
            vec![Primitive::BroadcastInDim, Primitive::BroadcastInDim, Primitive::SelectN]
        );
    }

    #[test]
    fn reduce_and_squeeze_drop_dimensions() {
        let mut t = Tracer::new();
        let x = t.input(ShapedArray::new(vec![1, 8, 128], DType::F32));
        let r = t.reduce(Primitive::ReduceMax, &x, &[1, 2]).unwrap();
        assert_eq!(r.aval().shape(), &[1]);
        let s = t.squeeze(&r, &[0]).unwrap();
        assert!(s.aval().shape().is_empty());
        assert!(t.squeeze(&x, &[1]).is_err());
    }
}
