//! Appending operations to a module under construction.
//!
//! The [`Builder`] keeps a stack of open blocks. New operations are appended
//! to the innermost one; closing a block hands it back to the caller, who
//! attaches it to a region or a function. Structured control flow is built
//! by opening a block per region, filling it, and closing it in order.

use indexmap::IndexMap;

use crate::attr::Attribute;
use crate::error::IrError;
use crate::module::{Func, Module};
use crate::op::{Block, OpKind, Operation, Region, Value};
use crate::types::Type;

#[derive(Debug)]
pub struct Builder {
    module: Module,
    stack: Vec<Block>,
    detached: usize,
}

impl Builder {
    pub fn new(module_name: impl Into<String>) -> Self {
        Builder {
            module: Module::new(module_name),
            stack: Vec::new(),
            detached: 0,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Type of a value created by this builder.
    pub fn value_type(&self, value: Value) -> &Type {
        &self.module.value_types[value.index()]
    }

    fn fresh(&mut self, ty: Type) -> Value {
        let value = Value(self.module.value_types.len() as u32);
        self.module.value_types.push(ty);
        value
    }

    /// Opens a new innermost block with arguments of the given types.
    pub fn open_block(&mut self, arg_types: &[Type]) -> Vec<Value> {
        let arguments: Vec<Value> = arg_types.iter().map(|t| self.fresh(t.clone())).collect();
        self.stack.push(Block {
            arguments: arguments.clone(),
            operations: Vec::new(),
        });
        arguments
    }

    /// Closes the innermost block and returns it.
    pub fn close_block(&mut self) -> Result<Block, IrError> {
        self.stack.pop().ok_or(IrError::NoOpenBlock)
    }

    /// Closes the innermost block as a single-block region.
    pub fn close_region(&mut self) -> Result<Region, IrError> {
        self.close_block().map(Region::from)
    }

    /// Number of currently open blocks.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn op(&mut self, kind: OpKind) -> OpBuilder<'_> {
        OpBuilder {
            builder: self,
            op: Operation::new(kind),
            result_types: Vec::new(),
        }
    }

    fn append(&mut self, op: Operation) {
        match self.stack.last_mut() {
            Some(block) => block.operations.push(op),
            None => {
                log::warn!("dropping `{}` created outside of any block", op.kind);
                self.detached += 1;
            }
        }
    }

    /// Inserts a finished function into the module's symbol table.
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        body: Block,
        result_types: Vec<Type>,
        attributes: IndexMap<String, Attribute>,
    ) -> Result<(), IrError> {
        self.module.insert(Func {
            name: name.into(),
            result_types,
            attributes,
            body,
        })
    }

    pub fn set_module_attr(&mut self, name: impl Into<String>, attr: Attribute) {
        self.module.attributes.insert(name.into(), attr);
    }

    /// Consumes the builder, returning the module.
    pub fn finish(self) -> Result<Module, IrError> {
        if self.detached > 0 {
            return Err(IrError::DetachedOperations(self.detached));
        }
        if !self.stack.is_empty() {
            return Err(IrError::UnbalancedBlocks(self.stack.len()));
        }
        Ok(self.module)
    }
}

/// Fluent construction of a single operation.
pub struct OpBuilder<'b> {
    builder: &'b mut Builder,
    op: Operation,
    result_types: Vec<Type>,
}

impl<'b> OpBuilder<'b> {
    pub fn operand(mut self, value: Value) -> Self {
        self.op.operands.push(value);
        self
    }

    pub fn operands(mut self, values: &[Value]) -> Self {
        self.op.operands.extend_from_slice(values);
        self
    }

    pub fn result(mut self, ty: Type) -> Self {
        self.result_types.push(ty);
        self
    }

    pub fn results(mut self, types: impl IntoIterator<Item = Type>) -> Self {
        self.result_types.extend(types);
        self
    }

    pub fn attr(mut self, name: &str, attr: Attribute) -> Self {
        self.op.attributes.insert(name.to_string(), attr);
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.op.regions.push(region);
        self
    }

    /// Appends the op and returns its results.
    pub fn build(self) -> Vec<Value> {
        let OpBuilder {
            builder,
            mut op,
            result_types,
        } = self;
        op.results = result_types.into_iter().map(|t| builder.fresh(t)).collect();
        let results = op.results.clone();
        builder.append(op);
        results
    }

    /// Appends the op with one extra result of type `ty` and returns it.
    pub fn value(mut self, ty: Type) -> Value {
        let index = self.result_types.len();
        self.result_types.push(ty);
        self.build()[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_land_in_the_innermost_block() {
        let mut b = Builder::new("m");
        let args = b.open_block(&[Type::i32()]);
        let c = b
            .op(OpKind::Constant)
            .attr("value", Attribute::i32(1))
            .value(Type::i32());
        b.open_block(&[]);
        b.op(OpKind::AddI).operands(&[args[0], c]).value(Type::i32());
        let inner = b.close_block().unwrap();
        let outer = b.close_block().unwrap();
        assert_eq!(inner.operations.len(), 1);
        assert_eq!(outer.operations.len(), 1);
        assert_eq!(b.value_type(c), &Type::i32());
        assert!(matches!(b.close_block(), Err(IrError::NoOpenBlock)));
    }

    #[test]
    fn duplicate_function_names_are_rejected() {
        let mut b = Builder::new("m");
        b.open_block(&[]);
        let body = b.close_block().unwrap();
        b.add_function("main", body.clone(), vec![], IndexMap::new()).unwrap();
        let err = b.add_function("main", body, vec![], IndexMap::new()).unwrap_err();
        assert_eq!(err, IrError::DuplicateSymbol("main".to_string()));
    }

    #[test]
    fn detached_ops_fail_the_module() {
        let mut b = Builder::new("m");
        b.op(OpKind::TraceStop).build();
        assert_eq!(b.finish().unwrap_err(), IrError::DetachedOperations(1));
    }
}
