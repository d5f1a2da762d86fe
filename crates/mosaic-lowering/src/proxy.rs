//! Lowering an operation by expressing it in terms of other primitives.
//!
//! A rule traces a small helper jaxpr with the same input avals as the
//! equation being lowered and lowers that jaxpr inline with the equation's
//! arguments and block shapes.

use mosaic_ir::Value;
use mosaic_jaxpr::{AbstractValue, Atom, TraceError, Tracer};

use crate::context::RuleContext;
use crate::error::LoweringError;
use crate::value::{BlockShape, Lowered};

impl<'a> RuleContext<'a> {
    /// Traces `f` over the equation's input avals and lowers the result.
    pub fn lower_fun<F>(&mut self, args: Vec<Lowered>, f: F) -> Result<Vec<Lowered>, LoweringError>
    where
        F: FnOnce(&mut Tracer, &[Atom]) -> Result<Vec<Atom>, TraceError>,
    {
        let avals = self.avals_in.clone();
        let block_shapes = self.block_shapes.clone();
        self.lower_fun_with(&avals, block_shapes, args, f)
    }

    /// Traces `f` over explicit input avals.
    pub fn lower_fun_with<F>(
        &mut self,
        avals: &[AbstractValue],
        block_shapes: Vec<Option<BlockShape>>,
        args: Vec<Lowered>,
        f: F,
    ) -> Result<Vec<Lowered>, LoweringError>
    where
        F: FnOnce(&mut Tracer, &[Atom]) -> Result<Vec<Atom>, TraceError>,
    {
        let mut tracer = Tracer::new();
        let inputs: Vec<Atom> = avals.iter().map(|a| tracer.input(a.clone())).collect();
        let outputs = f(&mut tracer, &inputs)?;
        let jaxpr = tracer.finish(outputs);
        self.subcomp(&jaxpr, block_shapes, args)
    }

    /// [`lower_fun`](Self::lower_fun) for helpers with exactly one output.
    pub fn lower_fun1<F>(&mut self, args: Vec<Lowered>, f: F) -> Result<Value, LoweringError>
    where
        F: FnOnce(&mut Tracer, &[Atom]) -> Result<Atom, TraceError>,
    {
        let outs = self.lower_fun(args, |t, xs| f(t, xs).map(|out| vec![out]))?;
        match outs.as_slice() {
            [single] => single.value(),
            _ => Err(LoweringError::internal("helper jaxpr must have one output")),
        }
    }
}
