//! Turning reference-typed loop state into value-typed state.
//!
//! A `for` body reads and writes its carried state through references. For
//! state the caller holds as plain values, the body is rewritten so those
//! references become value inputs: reads become slices of the current value,
//! writes splice the stored value back in, and the final values are appended
//! to the outputs.
//!
//! Windows must be static. When a fully unrolled loop discharges one
//! iteration at a time, the loop index is bound to a literal first, so
//! windows selected by the index (or by simple integer arithmetic on it)
//! become static too.

use mosaic_jaxpr::{
    AbstractValue, Atom, Equation, Index, IndexOperand, Jaxpr, Literal, NDIndexer, Params,
    Primitive, Scalar, ShapedArray, SliceSize, Var,
};
use rustc_hash::FxHashMap;

use crate::error::LoweringError;

/// A static strided window into an array.
#[derive(Debug, Clone)]
struct Window {
    starts: Vec<usize>,
    sizes: Vec<usize>,
    strides: Vec<usize>,
    /// Dimensions indexed by a scalar, which reads drop.
    squeezed: Vec<bool>,
}

impl Window {
    fn limits(&self) -> Vec<usize> {
        self.starts
            .iter()
            .zip(&self.sizes)
            .zip(&self.strides)
            .map(|((&start, &size), &stride)| match size {
                0 => start,
                _ => start + (size - 1) * stride + 1,
            })
            .collect()
    }

    fn covers(&self, dim: usize, extent: usize) -> bool {
        self.starts[dim] == 0 && self.sizes[dim] == extent && self.strides[dim] == 1
    }
}

struct Discharger {
    /// Current value of each discharged reference, by reference id.
    current: FxHashMap<u32, Atom>,
    /// Names replaced by another atom.
    aliases: FxHashMap<u32, Atom>,
    eqns: Vec<Equation>,
    next_id: u32,
}

impl Discharger {
    fn subst(&self, atom: &Atom) -> Atom {
        match atom {
            Atom::Var(v) => self.aliases.get(&v.id).cloned().unwrap_or_else(|| atom.clone()),
            Atom::Literal(_) => atom.clone(),
        }
    }

    fn fresh(&mut self, aval: ShapedArray) -> Var {
        let var = Var::new(self.next_id, aval);
        self.next_id += 1;
        var
    }

    fn discharged_ref(&self, eqn: &Equation, operand: usize) -> Option<u32> {
        match eqn.inputs.get(operand) {
            Some(Atom::Var(v)) if self.current.contains_key(&v.id) => Some(v.id),
            _ => None,
        }
    }

    /// The integer `atom` is known to hold, if any.
    fn known_int(&self, atom: &Atom) -> Option<i64> {
        match self.subst(atom) {
            Atom::Literal(lit) => lit.value.as_i64(),
            Atom::Var(_) => None,
        }
    }

    fn static_operand(&self, eqn: &Equation, operand: IndexOperand) -> Option<i64> {
        match operand {
            IndexOperand::Static(i) => Some(i),
            IndexOperand::Dynamic(k) => self.known_int(eqn.inputs.get(k)?),
        }
    }

    /// Resolves `indexer` into a static window of an array of `shape`.
    fn static_window(
        &self,
        eqn: &Equation,
        indexer: &NDIndexer,
        shape: &[usize],
    ) -> Result<Window, LoweringError> {
        let dynamic = || {
            LoweringError::unsupported(
                "indexing loop-carried state needs indices known at compile time",
            )
        };
        let mut window = Window {
            starts: Vec::with_capacity(shape.len()),
            sizes: Vec::with_capacity(shape.len()),
            strides: Vec::with_capacity(shape.len()),
            squeezed: Vec::with_capacity(shape.len()),
        };
        for (dim, &extent) in shape.iter().enumerate() {
            let (start, size, stride, squeezed) = match indexer.indices.get(dim) {
                None => (0, extent, 1, false),
                Some(Index::Scalar(operand)) => {
                    let i = self.static_operand(eqn, *operand).ok_or_else(dynamic)?;
                    (i, 1, 1, true)
                }
                Some(Index::Slice(slice)) => {
                    let start = self.static_operand(eqn, slice.start).ok_or_else(dynamic)?;
                    let size = match slice.size {
                        SliceSize::Static(n) => n,
                        SliceSize::Dynamic(k) => eqn
                            .inputs
                            .get(k)
                            .and_then(|a| self.known_int(a))
                            .ok_or_else(dynamic)? as usize,
                    };
                    (start, size, slice.stride.max(1), false)
                }
                Some(Index::Array(_)) => {
                    return Err(LoweringError::unsupported(
                        "gather indexing of loop-carried state",
                    ))
                }
            };
            if start < 0 {
                return Err(LoweringError::invalid_params(format!(
                    "negative start {} indexing loop-carried state",
                    start
                )));
            }
            let start = start as usize;
            let limit = if size == 0 { start } else { start + (size - 1) * stride + 1 };
            if limit > extent {
                return Err(LoweringError::invalid_params(format!(
                    "window [{}, {}) out of bounds for dimension {} of size {}",
                    start, limit, dim, extent
                )));
            }
            window.starts.push(start);
            window.sizes.push(size);
            window.strides.push(stride);
            window.squeezed.push(squeezed);
        }
        Ok(window)
    }

    /// Emits a `slice` of `base` covering `window` into `out`.
    fn slice(&mut self, base: Atom, window: &Window, out: Var) {
        let unit = window.strides.iter().all(|&s| s == 1);
        self.eqns.push(Equation::new(
            Primitive::Slice,
            Params::Slice {
                start_indices: window.starts.clone(),
                limit_indices: window.limits(),
                strides: (!unit).then(|| window.strides.clone()),
            },
            vec![base],
            vec![out],
        ));
    }

    fn reshape(&mut self, x: Atom, out: Var) {
        self.eqns.push(Equation::new(
            Primitive::Reshape,
            Params::Reshape {
                new_sizes: out.aval.shape().to_vec(),
                dimensions: None,
            },
            vec![x],
            vec![out],
        ));
    }

    /// Reads `window` out of `value` into `out`: a `slice`, followed by a
    /// `reshape` dropping scalar-indexed dimensions.
    fn read_window(&mut self, value: Atom, window: &Window, out: &Var) {
        if !window.squeezed.contains(&true) {
            self.slice(value, window, out.clone());
            return;
        }
        let sliced = self.fresh(ShapedArray::new(window.sizes.clone(), value.aval().dtype()));
        self.slice(value, window, sliced.clone());
        self.reshape(Atom::Var(sliced), out.clone());
    }

    /// Reads `indexers` out of the value of reference `id` into `out`.
    fn read(
        &mut self,
        eqn: &Equation,
        id: u32,
        indexers: &[NDIndexer],
        out: &Var,
    ) -> Result<(), LoweringError> {
        let value = self.current[&id].clone();
        let shape = value.aval().shape().to_vec();
        match indexers {
            [] => {
                self.aliases.insert(out.id, value);
                Ok(())
            }
            [indexer] if indexer.is_full(&shape) => {
                self.aliases.insert(out.id, value);
                Ok(())
            }
            [indexer] => {
                let window = self.static_window(eqn, indexer, &shape)?;
                self.read_window(value, &window, out);
                Ok(())
            }
            _ => Err(LoweringError::unsupported(
                "chained indexers on loop-carried state",
            )),
        }
    }

    /// Returns `base` with `window` replaced by `update`, whose shape is the
    /// window's. Dimensions before `dim` are already narrowed to the window.
    ///
    /// The first dimension the window does not cover is cut into the part
    /// before the window, the window and the part after it, which are joined
    /// back with a `concatenate`.
    fn splice(&mut self, base: Atom, window: &Window, update: Atom, dim: usize) -> Atom {
        let shape = base.aval().shape().to_vec();
        let dtype = base.aval().dtype();
        let Some(d) = (dim..shape.len()).find(|&d| !window.covers(d, shape[d])) else {
            return update;
        };
        let (start, end) = (window.starts[d], window.starts[d] + window.sizes[d]);
        let part = |this: &mut Self, lo: usize, hi: usize| {
            let mut cut = Window {
                starts: vec![0; shape.len()],
                sizes: shape.clone(),
                strides: vec![1; shape.len()],
                squeezed: vec![false; shape.len()],
            };
            cut.starts[d] = lo;
            cut.sizes[d] = hi - lo;
            let out = this.fresh(ShapedArray::new(cut.sizes.clone(), dtype.clone()));
            this.slice(base.clone(), &cut, out.clone());
            Atom::Var(out)
        };
        let mut pieces = Vec::with_capacity(3);
        if start > 0 {
            pieces.push(part(self, 0, start));
        }
        let rest_covered = (d + 1..shape.len()).all(|e| window.covers(e, shape[e]));
        let middle = if rest_covered {
            update
        } else {
            let narrowed = part(self, start, end);
            self.splice(narrowed, window, update, d + 1)
        };
        pieces.push(middle);
        if end < shape[d] {
            pieces.push(part(self, end, shape[d]));
        }
        if pieces.len() == 1 {
            return pieces.remove(0);
        }
        let out = self.fresh(ShapedArray::new(shape, dtype));
        self.eqns.push(Equation::new(
            Primitive::Concatenate,
            Params::Concatenate { dimension: d },
            pieces,
            vec![out.clone()],
        ));
        Atom::Var(out)
    }

    /// The value of `old` after storing `new` into `window`.
    fn write_window(
        &mut self,
        old: Atom,
        window: &Window,
        new: Atom,
    ) -> Result<Atom, LoweringError> {
        if window.strides.iter().any(|&s| s != 1) {
            return Err(LoweringError::unsupported(
                "strided updates of loop-carried state",
            ));
        }
        let dtype = old.aval().dtype();
        let update = if new.aval().shape() == window.sizes.as_slice() {
            new
        } else {
            let reshaped = self.fresh(ShapedArray::new(window.sizes.clone(), dtype));
            self.reshape(new, reshaped.clone());
            Atom::Var(reshaped)
        };
        Ok(self.splice(old, window, update, 0))
    }

    /// Folds integer `add`, `sub` and `mul` of known scalars, so indices
    /// derived from a bound loop index stay static.
    fn fold(&mut self, eqn: &Equation) -> bool {
        let op: fn(i64, i64) -> i64 = match eqn.primitive {
            Primitive::Add => i64::wrapping_add,
            Primitive::Sub => i64::wrapping_sub,
            Primitive::Mul => i64::wrapping_mul,
            _ => return false,
        };
        let (Some(out), [a, b]) = (eqn.outputs.first(), eqn.inputs.as_slice()) else {
            return false;
        };
        let Some(aval) = out.aval.as_array() else {
            return false;
        };
        if !aval.is_scalar() || !aval.dtype.is_integer() {
            return false;
        }
        let (Some(a), Some(b)) = (self.known_int(a), self.known_int(b)) else {
            return false;
        };
        let folded = Literal::new(Scalar::Int(op(a, b)), aval.dtype.clone());
        self.aliases.insert(out.id, Atom::Literal(folded));
        true
    }

    fn equation(&mut self, eqn: &Equation) -> Result<(), LoweringError> {
        match (&eqn.params, eqn.primitive) {
            (Params::Load { target, mask }, Primitive::Get | Primitive::Load) => {
                if let Some(id) = self.discharged_ref(eqn, target.operand) {
                    if mask.is_some() {
                        return Err(LoweringError::UnsupportedMasking(
                            "masked loads of loop-carried state".to_string(),
                        ));
                    }
                    let out = eqn.outputs.first().ok_or_else(|| {
                        LoweringError::internal("load without an output")
                    })?;
                    return self.read(eqn, id, &target.indexers, out);
                }
            }
            (
                Params::Swap {
                    target,
                    value,
                    mask,
                },
                Primitive::Swap | Primitive::MaskedSwap,
            ) => {
                if let Some(id) = self.discharged_ref(eqn, target.operand) {
                    if mask.is_some() {
                        return Err(LoweringError::UnsupportedMasking(
                            "masked stores to loop-carried state".to_string(),
                        ));
                    }
                    let old = self.current[&id].clone();
                    let shape = old.aval().shape().to_vec();
                    let new = eqn.inputs.get(*value).ok_or_else(|| {
                        LoweringError::internal("swap without a value operand")
                    })?;
                    let new = self.subst(new);
                    let updated = match target.indexers.as_slice() {
                        [] => {
                            if let Some(out) = eqn.outputs.first() {
                                self.aliases.insert(out.id, old);
                            }
                            new
                        }
                        [indexer] if indexer.is_full(&shape) => {
                            if let Some(out) = eqn.outputs.first() {
                                self.aliases.insert(out.id, old);
                            }
                            new
                        }
                        [indexer] => {
                            let window = self.static_window(eqn, indexer, &shape)?;
                            if let Some(out) = eqn.outputs.first() {
                                self.read_window(old.clone(), &window, out);
                            }
                            self.write_window(old, &window, new)?
                        }
                        _ => {
                            return Err(LoweringError::unsupported(
                                "chained indexers on loop-carried state",
                            ))
                        }
                    };
                    self.current.insert(id, updated);
                    return Ok(());
                }
            }
            _ => {}
        }
        if let Some(Atom::Var(v)) = eqn
            .inputs
            .iter()
            .find(|a| matches!(a, Atom::Var(v) if self.current.contains_key(&v.id)))
        {
            return Err(LoweringError::unsupported(format!(
                "loop-carried state v{} cannot be passed to `{}`",
                v.id, eqn.primitive
            )));
        }
        if self.fold(eqn) {
            return Ok(());
        }
        let mut rewritten = eqn.clone();
        rewritten.inputs = eqn.inputs.iter().map(|a| self.subst(a)).collect();
        self.eqns.push(rewritten);
        Ok(())
    }
}

/// Discharges the invars of `jaxpr` flagged in `should_discharge`.
///
/// Discharged reference inputs become inputs of the referenced array type.
/// The result returns the original outputs followed by the final value of
/// every discharged reference, in input order.
pub fn discharge_state(jaxpr: &Jaxpr, should_discharge: &[bool]) -> Result<Jaxpr, LoweringError> {
    discharge(jaxpr, should_discharge, None)
}

/// [`discharge_state`] for one iteration of an unrolled loop whose index is
/// input `0`.
///
/// The index is bound to `index` and dropped from the inputs; the mask still
/// covers it.
pub fn discharge_iteration(
    jaxpr: &Jaxpr,
    should_discharge: &[bool],
    index: i64,
) -> Result<Jaxpr, LoweringError> {
    discharge(jaxpr, should_discharge, Some(index))
}

fn discharge(
    jaxpr: &Jaxpr,
    should_discharge: &[bool],
    index: Option<i64>,
) -> Result<Jaxpr, LoweringError> {
    if should_discharge.len() != jaxpr.invars.len() {
        return Err(LoweringError::internal(format!(
            "discharge mask of length {} for a jaxpr with {} inputs",
            should_discharge.len(),
            jaxpr.invars.len()
        )));
    }
    let mut discharger = Discharger {
        current: FxHashMap::default(),
        aliases: FxHashMap::default(),
        eqns: Vec::with_capacity(jaxpr.eqns.len()),
        next_id: jaxpr.next_var_id(),
    };
    let mut inputs = jaxpr.invars.iter().zip(should_discharge);
    if let Some(index) = index {
        let (var, _) = inputs
            .next()
            .ok_or_else(|| LoweringError::internal("loop body without an index input"))?;
        let dtype = var.aval.dtype();
        if !var.aval.shape().is_empty() || !dtype.is_integer() {
            return Err(LoweringError::internal(format!(
                "loop index v{} is not an integer scalar",
                var.id
            )));
        }
        let bound = Literal::new(Scalar::Int(index), dtype);
        discharger.aliases.insert(var.id, Atom::Literal(bound));
    }
    let mut invars = Vec::with_capacity(jaxpr.invars.len());
    let mut discharged = Vec::new();
    for (var, &discharge) in inputs {
        match (&var.aval, discharge) {
            (AbstractValue::Ref(r), true) => {
                let value = Var::new(var.id, r.inner.clone());
                discharger.current.insert(var.id, Atom::Var(value.clone()));
                discharged.push(var.id);
                invars.push(value);
            }
            (_, true) => {
                return Err(LoweringError::internal(format!(
                    "cannot discharge non-reference input v{}",
                    var.id
                )))
            }
            _ => invars.push(var.clone()),
        }
    }
    for eqn in &jaxpr.eqns {
        discharger.equation(eqn)?;
    }
    let mut outvars: Vec<Atom> = jaxpr.outvars.iter().map(|a| discharger.subst(a)).collect();
    outvars.extend(discharged.iter().map(|id| discharger.current[id].clone()));
    log::debug!(
        "discharged {} reference inputs; {} equations remain",
        discharged.len(),
        discharger.eqns.len()
    );
    Ok(Jaxpr {
        invars,
        eqns: discharger.eqns,
        outvars,
        effects: jaxpr.effects.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_jaxpr::{DType, RefOperand, Tracer};

    fn accumulate_body() -> Jaxpr {
        // for i: acc[...] = acc[...] + x[...]
        let mut t = Tracer::new();
        let _i = t.input(AbstractValue::scalar(DType::I32));
        let acc = t.input(AbstractValue::reference(vec![8, 128], DType::F32, None));
        let x = t.input(AbstractValue::reference(vec![8, 128], DType::F32, None));
        let vec = AbstractValue::array(vec![8, 128], DType::F32);
        let a = t.bind1(
            Primitive::Get,
            Params::Load {
                target: RefOperand::whole(0),
                mask: None,
            },
            vec![acc.clone()],
            vec.clone(),
        );
        let b = t.bind1(
            Primitive::Get,
            Params::Load {
                target: RefOperand::whole(0),
                mask: None,
            },
            vec![x],
            vec.clone(),
        );
        let sum = t.binary(Primitive::Add, &a, &b).unwrap();
        t.bind1(
            Primitive::Swap,
            Params::Swap {
                target: RefOperand::whole(0),
                value: 1,
                mask: None,
            },
            vec![acc, sum],
            vec,
        );
        t.finish(vec![])
    }

    #[test]
    fn discharged_refs_become_values() {
        let body = accumulate_body();
        let out = discharge_state(&body, &[false, true, false]).unwrap();
        assert!(out.invars[1].aval.as_array().is_some() && !out.invars[1].aval.is_ref());
        assert!(out.invars[2].aval.is_ref());
        // the acc read and the store disappear; the x read and the add stay
        assert_eq!(out.eqns.len(), 2);
        assert_eq!(out.eqns[1].primitive, Primitive::Add);
        assert_eq!(out.eqns[1].inputs[0], Atom::Var(out.invars[1].clone()));
        assert_eq!(out.outvars.len(), 1);
        assert!(out.outvars[0].is_var(&out.eqns[1].outputs[0]));
    }

    #[test]
    fn static_window_reads_become_slices() {
        let mut t = Tracer::new();
        let r = t.input(AbstractValue::reference(vec![16, 128], DType::F32, None));
        let indexer = NDIndexer {
            indices: vec![
                Index::Scalar(IndexOperand::Static(3)),
                Index::Slice(mosaic_jaxpr::Slice::full(128)),
            ],
            shape: vec![16, 128],
        };
        let row = t.bind1(
            Primitive::Get,
            Params::Load {
                target: RefOperand::indexed(0, vec![indexer]),
                mask: None,
            },
            vec![r],
            AbstractValue::array(vec![128], DType::F32),
        );
        let body = t.finish(vec![row]);
        let out = discharge_state(&body, &[true]).unwrap();
        let prims: Vec<_> = out.eqns.iter().map(|e| e.primitive).collect();
        assert_eq!(prims, vec![Primitive::Slice, Primitive::Reshape]);
        assert_eq!(out.outvars.len(), 2);
    }

    /// `for i: x[i] = x[i] + 1.0` over `x: f32[4]`.
    fn row_update_body() -> Jaxpr {
        let mut t = Tracer::new();
        let i = t.input(AbstractValue::scalar(DType::I32));
        let x = t.input(AbstractValue::reference(vec![4], DType::F32, None));
        let at = |operand| NDIndexer {
            indices: vec![Index::Scalar(IndexOperand::Dynamic(operand))],
            shape: vec![4],
        };
        let elem = t.bind1(
            Primitive::Get,
            Params::Load {
                target: RefOperand::indexed(0, vec![at(1)]),
                mask: None,
            },
            vec![x.clone(), i.clone()],
            AbstractValue::scalar(DType::F32),
        );
        let bumped = t.binary(Primitive::Add, &elem, &mosaic_jaxpr::lit_f32(1.0)).unwrap();
        t.bind1(
            Primitive::Swap,
            Params::Swap {
                target: RefOperand::indexed(0, vec![at(2)]),
                value: 1,
                mask: None,
            },
            vec![x, bumped, i],
            AbstractValue::scalar(DType::F32),
        );
        t.finish(vec![])
    }

    #[test]
    fn bound_loop_index_makes_windows_static() {
        let out = discharge_iteration(&row_update_body(), &[false, true], 2).unwrap();
        assert_eq!(out.invars.len(), 1);
        assert_eq!(out.invars[0].aval.shape(), &[4]);

        let Params::Slice { start_indices, limit_indices, .. } = &out.eqns[0].params else {
            panic!("expected the read to be a slice, got {}", out.eqns[0].primitive);
        };
        assert_eq!((start_indices.as_slice(), limit_indices.as_slice()), (&[2][..], &[3][..]));

        let last = out.eqns.last().unwrap();
        assert_eq!(last.primitive, Primitive::Concatenate);
        assert_eq!(last.inputs.len(), 3);
        assert_eq!(out.outvars.len(), 1);
        assert!(out.outvars[0].is_var(&last.outputs[0]));
    }

    #[test]
    fn windows_at_the_edge_skip_empty_pieces() {
        let out = discharge_iteration(&row_update_body(), &[false, true], 0).unwrap();
        let last = out.eqns.last().unwrap();
        assert_eq!(last.primitive, Primitive::Concatenate);
        assert_eq!(last.inputs.len(), 2);
    }

    #[test]
    fn unbound_dynamic_indices_are_rejected() {
        let err = discharge_state(&row_update_body(), &[false, true]).unwrap_err();
        assert!(matches!(err, LoweringError::UnsupportedOperation(_)));
    }

    #[test]
    fn index_arithmetic_is_folded() {
        // x[i + 1] with i bound to 1 reads element 2.
        let mut t = Tracer::new();
        let i = t.input(AbstractValue::scalar(DType::I32));
        let x = t.input(AbstractValue::reference(vec![4], DType::F32, None));
        let next = t.binary(Primitive::Add, &i, &mosaic_jaxpr::lit_i32(1)).unwrap();
        let elem = t.bind1(
            Primitive::Get,
            Params::Load {
                target: RefOperand::indexed(
                    0,
                    vec![NDIndexer {
                        indices: vec![Index::Scalar(IndexOperand::Dynamic(1))],
                        shape: vec![4],
                    }],
                ),
                mask: None,
            },
            vec![x, next],
            AbstractValue::scalar(DType::F32),
        );
        let out = discharge_iteration(&t.finish(vec![elem]), &[false, true], 1).unwrap();
        let prims: Vec<_> = out.eqns.iter().map(|e| e.primitive).collect();
        assert_eq!(prims, vec![Primitive::Slice, Primitive::Reshape]);
        let Params::Slice { start_indices, .. } = &out.eqns[0].params else {
            unreachable!()
        };
        assert_eq!(start_indices, &vec![2]);
    }

    #[test]
    fn state_passed_to_other_primitives_is_rejected() {
        let mut t = Tracer::new();
        let r = t.input(AbstractValue::reference(vec![8, 128], DType::F32, None));
        t.bind(
            Primitive::DebugCallback,
            Params::None,
            vec![r],
            vec![],
        );
        let body = t.finish(vec![]);
        assert!(discharge_state(&body, &[true]).is_err());
    }
}
