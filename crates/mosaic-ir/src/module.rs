//! Functions and the module symbol table.

use indexmap::IndexMap;

use crate::attr::Attribute;
use crate::error::IrError;
use crate::op::{Block, OpKind, Operation, Value};
use crate::types::Type;

/// A `func.func` with a single-block body.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub result_types: Vec<Type>,
    pub attributes: IndexMap<String, Attribute>,
    /// The entry block; its arguments are the function arguments.
    pub body: Block,
}

impl Func {
    pub fn arguments(&self) -> &[Value] {
        &self.body.arguments
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Calls `f` on every operation of the body, pre-order.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Operation)) {
        for op in &self.body.operations {
            op.walk(f);
        }
    }

    /// Number of operations of `kind` anywhere in the body.
    pub fn count(&self, kind: OpKind) -> usize {
        let mut n = 0;
        self.walk(&mut |op| {
            if op.kind == kind {
                n += 1;
            }
        });
        n
    }
}

/// A `builtin.module`: named functions plus module attributes.
///
/// The module also owns the type of every value created for it, so that
/// values can be printed and verified without carrying types around.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub attributes: IndexMap<String, Attribute>,
    functions: IndexMap<String, Func>,
    pub(crate) value_types: Vec<Type>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds `func` to the symbol table; names must be unique.
    pub fn insert(&mut self, func: Func) -> Result<(), IrError> {
        if self.functions.contains_key(&func.name) {
            return Err(IrError::DuplicateSymbol(func.name));
        }
        self.functions.insert(func.name.clone(), func);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&Func> {
        self.functions.get(name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Func> {
        self.functions.get_mut(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Func> {
        self.functions.values()
    }

    pub fn value_type(&self, value: Value) -> Option<&Type> {
        self.value_types.get(value.index())
    }

    /// Types of the arguments of `func`.
    pub fn argument_types(&self, func: &Func) -> Vec<Type> {
        func.arguments()
            .iter()
            .filter_map(|v| self.value_type(*v).cloned())
            .collect()
    }

    /// Number of operations of `kind` across all functions.
    pub fn count(&self, kind: OpKind) -> usize {
        self.functions().map(|f| f.count(kind)).sum()
    }
}
