//! Structural verification of finished functions.
//!
//! Checks that every operand is defined before use in an enclosing scope,
//! that every block of a region-holding op ends in a terminator, that
//! terminators only appear last, and that the function body returns.

use rustc_hash::FxHashSet;

use crate::error::IrError;
use crate::module::{Func, Module};
use crate::op::{Block, OpKind, Operation, Value};

struct Verifier<'m> {
    module: &'m Module,
    func: &'m str,
    scopes: Vec<FxHashSet<Value>>,
}

impl<'m> Verifier<'m> {
    fn fail(&self, message: String) -> IrError {
        IrError::Verification {
            func: self.func.to_string(),
            message,
        }
    }

    fn is_defined(&self, value: Value) -> bool {
        self.scopes.iter().any(|s| s.contains(&value))
    }

    fn define(&mut self, value: Value) -> Result<(), IrError> {
        if self.module.value_type(value).is_none() {
            return Err(self.fail(format!("{} has no type", value)));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(value);
        }
        Ok(())
    }

    fn block(&mut self, block: &Block, needs_terminator: Option<OpKind>) -> Result<(), IrError> {
        self.scopes.push(FxHashSet::default());
        for arg in &block.arguments {
            self.define(*arg)?;
        }
        let last = block.operations.len().saturating_sub(1);
        for (i, op) in block.operations.iter().enumerate() {
            if op.kind.is_terminator() && i != last {
                return Err(self.fail(format!("`{}` is not the last operation of its block", op.kind)));
            }
            self.operation(op)?;
        }
        if let Some(expected) = needs_terminator {
            match block.terminator() {
                Some(term) if term.kind == expected => {}
                Some(term) => {
                    return Err(self.fail(format!(
                        "block ends in `{}`, expected `{}`",
                        term.kind, expected
                    )))
                }
                None => return Err(self.fail(format!("block does not end in `{}`", expected))),
            }
        }
        self.scopes.pop();
        Ok(())
    }

    fn operation(&mut self, op: &Operation) -> Result<(), IrError> {
        for operand in &op.operands {
            if !self.is_defined(*operand) {
                return Err(self.fail(format!(
                    "`{}` uses {} which is not defined in an enclosing scope",
                    op.kind, operand
                )));
            }
        }
        for (i, region) in op.regions.iter().enumerate() {
            let terminator = match (op.kind, i) {
                (OpKind::While, 0) => Some(OpKind::Condition),
                (OpKind::Region, _) => Some(OpKind::TpuYield),
                (OpKind::For | OpKind::If | OpKind::While, _) => Some(OpKind::Yield),
                _ => None,
            };
            for block in &region.blocks {
                self.block(block, terminator)?;
            }
        }
        for result in &op.results {
            self.define(*result)?;
        }
        Ok(())
    }
}

/// Verifies one function of `module`.
pub fn verify_func(module: &Module, func: &Func) -> Result<(), IrError> {
    let mut verifier = Verifier {
        module,
        func: &func.name,
        scopes: Vec::new(),
    };
    verifier.block(&func.body, Some(OpKind::Return))
}

/// Verifies every function of `module`.
pub fn verify_module(module: &Module) -> Result<(), IrError> {
    module.functions().try_for_each(|f| verify_func(module, f))
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::builder::Builder;
    use crate::types::Type;

    #[test]
    fn values_do_not_escape_their_region() {
        let mut b = Builder::new("m");
        let args = b.open_block(&[Type::i1()]);
        b.open_block(&[]);
        let inner = b
            .op(OpKind::Constant)
            .attr("value", crate::attr::Attribute::i32(0))
            .value(Type::i32());
        b.op(OpKind::Yield).build();
        let then_region = b.close_region().unwrap();
        b.op(OpKind::If)
            .operand(args[0])
            .region(then_region)
            .build();
        b.op(OpKind::Return).operand(inner).build();
        let body = b.close_block().unwrap();
        b.add_function("main", body, vec![Type::i32()], IndexMap::new())
            .unwrap();
        let module = b.finish().unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, IrError::Verification { .. }), "{err}");
    }

    #[test]
    fn missing_return_is_reported() {
        let mut b = Builder::new("m");
        b.open_block(&[]);
        let body = b.close_block().unwrap();
        b.add_function("main", body, vec![], IndexMap::new()).unwrap();
        let module = b.finish().unwrap();
        assert!(verify_module(&module).is_err());
    }
}
