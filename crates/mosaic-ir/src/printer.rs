//! Textual form of a module, in MLIR's generic operation syntax.

use std::fmt::{self, Write};

use crate::attr::write_dict;
use crate::module::{Func, Module};
use crate::op::{Block, Operation, Value};

struct Printer<'m> {
    module: &'m Module,
    out: String,
}

impl<'m> Printer<'m> {
    fn ty(&self, value: Value) -> String {
        match self.module.value_type(value) {
            Some(t) => t.to_string(),
            None => "<<unknown>>".to_string(),
        }
    }

    fn types(&self, values: &[Value]) -> String {
        values.iter().map(|v| self.ty(*v)).collect::<Vec<_>>().join(", ")
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn block_args(&self, block: &Block) -> String {
        block
            .arguments
            .iter()
            .map(|a| format!("{}: {}", a, self.ty(*a)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn operation(&mut self, op: &Operation, depth: usize) -> fmt::Result {
        self.indent(depth);
        if !op.results.is_empty() {
            let names: Vec<String> = op.results.iter().map(|r| r.to_string()).collect();
            write!(self.out, "{} = ", names.join(", "))?;
        }
        let operands: Vec<String> = op.operands.iter().map(|o| o.to_string()).collect();
        write!(self.out, "\"{}\"({})", op.kind, operands.join(", "))?;
        if !op.regions.is_empty() {
            self.out.push_str(" (");
            for (i, region) in op.regions.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                self.out.push_str("{\n");
                for block in &region.blocks {
                    let args = self.block_args(block);
                    self.indent(depth);
                    writeln!(self.out, "^bb0({}):", args)?;
                    for inner in &block.operations {
                        self.operation(inner, depth + 1)?;
                    }
                }
                self.indent(depth);
                self.out.push('}');
            }
            self.out.push(')');
        }
        if !op.attributes.is_empty() {
            let mut attrs = String::new();
            write_attrs(&mut attrs, op)?;
            write!(self.out, " {}", attrs)?;
        }
        let signature = format!(
            " : ({}) -> ({})",
            self.types(&op.operands),
            self.types(&op.results)
        );
        writeln!(self.out, "{}", signature)
    }

    fn func(&mut self, func: &Func) -> fmt::Result {
        let args = self.block_args(&func.body);
        self.indent(1);
        write!(self.out, "func.func @{}({})", func.name, args)?;
        if !func.result_types.is_empty() {
            let results: Vec<String> = func.result_types.iter().map(|t| t.to_string()).collect();
            write!(self.out, " -> ({})", results.join(", "))?;
        }
        if !func.attributes.is_empty() {
            let mut attrs = String::new();
            DictDisplay(&func.attributes).write_into(&mut attrs)?;
            write!(self.out, " attributes {}", attrs)?;
        }
        self.out.push_str(" {\n");
        for op in &func.body.operations {
            self.operation(op, 2)?;
        }
        self.indent(1);
        self.out.push_str("}\n");
        Ok(())
    }
}

struct DictDisplay<'a>(&'a indexmap::IndexMap<String, crate::attr::Attribute>);

impl fmt::Display for DictDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dict(f, self.0)
    }
}

impl DictDisplay<'_> {
    fn write_into(&self, out: &mut String) -> fmt::Result {
        write!(out, "{}", self)
    }
}

fn write_attrs(out: &mut String, op: &Operation) -> fmt::Result {
    DictDisplay(&op.attributes).write_into(out)
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer {
            module: self,
            out: String::new(),
        };
        write!(printer.out, "module @{}", self.name)?;
        if !self.attributes.is_empty() {
            write!(printer.out, " attributes {}", DictDisplay(&self.attributes))?;
        }
        printer.out.push_str(" {\n");
        for func in self.functions() {
            printer.func(func)?;
        }
        printer.out.push_str("}\n");
        f.write_str(&printer.out)
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use indexmap::IndexMap;

    use crate::attr::Attribute;
    use crate::builder::Builder;
    use crate::op::OpKind;
    use crate::types::Type;

    #[test]
    fn prints_generic_syntax() {
        let mut b = Builder::new("kernel");
        let args = b.open_block(&[Type::f32()]);
        let one = b
            .op(OpKind::Constant)
            .attr("value", Attribute::Float { value: 1.0, ty: Type::f32() })
            .value(Type::f32());
        let sum = b.op(OpKind::AddF).operands(&[args[0], one]).value(Type::f32());
        b.op(OpKind::Return).operand(sum).build();
        let body = b.close_block().unwrap();
        b.add_function("main", body, vec![Type::f32()], IndexMap::new())
            .unwrap();
        let module = b.finish().unwrap();
        expect![[r#"
            module @kernel {
              func.func @main(%0: f32) -> (f32) {
                %1 = "arith.constant"() {value = 1e0 : f32} : () -> (f32)
                %2 = "arith.addf"(%0, %1) : (f32, f32) -> (f32)
                "func.return"(%2) : (f32) -> ()
              }
            }
        "#]]
        .assert_eq(&module.to_string());
    }
}
