//! The jaxpr graph: typed names, literals, equations and effects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aval::{AbstractValue, ShapedArray};
use crate::dtype::DType;
use crate::params::Params;
use crate::primitive::Primitive;

/// A named SSA value. Identity is the `id`; the aval travels with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Var {
    pub id: u32,
    pub aval: AbstractValue,
}

impl Var {
    pub fn new(id: u32, aval: impl Into<AbstractValue>) -> Self {
        Var {
            id,
            aval: aval.into(),
        }
    }
}

/// A host-side scalar constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Bool(b) => Some(*b as i64),
            Scalar::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v,
            Scalar::Bool(b) => *b as i64 as f64,
        }
    }

    /// The dtype a bare host scalar defaults to.
    pub fn default_dtype(&self) -> DType {
        match self {
            Scalar::Int(_) => DType::I32,
            Scalar::Float(_) => DType::F32,
            Scalar::Bool(_) => DType::Bool,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:?}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// A literal operand: a host scalar with its abstract type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub value: Scalar,
    pub aval: ShapedArray,
}

impl Literal {
    pub fn new(value: Scalar, dtype: DType) -> Self {
        Literal {
            value,
            aval: ShapedArray::scalar(dtype),
        }
    }

    /// A weakly typed literal, as produced for Python scalars.
    pub fn weak(value: Scalar) -> Self {
        Literal {
            value,
            aval: ShapedArray::scalar(value.default_dtype()).weak(),
        }
    }
}

/// An equation operand or jaxpr output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atom {
    Var(Var),
    Literal(Literal),
}

impl Atom {
    pub fn aval(&self) -> AbstractValue {
        match self {
            Atom::Var(var) => var.aval.clone(),
            Atom::Literal(lit) => AbstractValue::Array(lit.aval.clone()),
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Atom::Var(var) => Some(var),
            Atom::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Atom::Literal(lit) => Some(lit),
            Atom::Var(_) => None,
        }
    }

    /// True when this atom is the variable `var`.
    pub fn is_var(&self, var: &Var) -> bool {
        matches!(self, Atom::Var(v) if v.id == var.id)
    }
}

impl From<Var> for Atom {
    fn from(var: Var) -> Self {
        Atom::Var(var)
    }
}

impl From<Literal> for Atom {
    fn from(lit: Literal) -> Self {
        Atom::Literal(lit)
    }
}

/// Where an equation came from in user code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Scopes the equation was traced under, outermost first.
    #[serde(default)]
    pub name_stack: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Side effects recorded on a jaxpr.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// The jaxpr reads a named mesh or grid axis.
    NamedAxis { name: String },
}

/// One operation application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub primitive: Primitive,
    pub inputs: Vec<Atom>,
    pub outputs: Vec<Var>,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub source: SourceInfo,
}

impl Equation {
    pub fn new(
        primitive: Primitive,
        params: Params,
        inputs: Vec<Atom>,
        outputs: Vec<Var>,
    ) -> Self {
        Equation {
            primitive,
            inputs,
            outputs,
            params,
            source: SourceInfo::default(),
        }
    }
}

/// A closed equation graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jaxpr {
    pub invars: Vec<Var>,
    pub eqns: Vec<Equation>,
    pub outvars: Vec<Atom>,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

impl Jaxpr {
    pub fn in_avals(&self) -> Vec<AbstractValue> {
        self.invars.iter().map(|v| v.aval.clone()).collect()
    }

    pub fn out_avals(&self) -> Vec<AbstractValue> {
        self.outvars.iter().map(Atom::aval).collect()
    }

    /// One past the largest variable id bound anywhere in this jaxpr.
    ///
    /// Nested jaxprs have their own scopes and are not consulted.
    pub fn next_var_id(&self) -> u32 {
        let invars = self.invars.iter().map(|v| v.id);
        let outs = self.eqns.iter().flat_map(|e| e.outputs.iter().map(|v| v.id));
        invars.chain(outs).max().map_or(0, |id| id + 1)
    }

    /// Every named axis this jaxpr (or anything nested in it) refers to.
    pub fn named_axes(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_named_axes(&mut names);
        names
    }

    fn collect_named_axes(&self, names: &mut Vec<String>) {
        let mut push = |name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };
        for effect in &self.effects {
            let Effect::NamedAxis { name } = effect;
            push(name);
        }
        for eqn in &self.eqns {
            if let Params::AxisIndex { axis_name } = &eqn.params {
                push(axis_name);
            }
        }
        for eqn in &self.eqns {
            for sub in eqn.params.sub_jaxprs() {
                sub.collect_named_axes(names);
            }
        }
    }
}

fn write_var(f: &mut fmt::Formatter<'_>, var: &Var) -> fmt::Result {
    write!(f, "v{}:{}", var.id, var.aval)
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Var(var) => write!(f, "v{}", var.id),
            Atom::Literal(lit) => write!(f, "{}:{}", lit.value, lit.aval.dtype),
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, out) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write_var(f, out)?;
        }
        if self.outputs.is_empty() {
            write!(f, "_")?;
        }
        write!(f, " = {}", self.primitive)?;
        let params = self.params.to_string();
        if !params.is_empty() {
            write!(f, "[{}]", params)?;
        }
        for input in &self.inputs {
            write!(f, " {}", input)?;
        }
        Ok(())
    }
}

impl fmt::Display for Jaxpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ lambda ;")?;
        for var in &self.invars {
            write!(f, " ")?;
            write_var(f, var)?;
        }
        writeln!(f, ". let")?;
        for eqn in &self.eqns {
            writeln!(f, "    {}", eqn)?;
        }
        write!(f, "  in (")?;
        for (i, out) in self.outvars.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", out)?;
        }
        write!(f, ") }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{lit_f32, Tracer};
    use expect_test::expect;

    fn axis_index(tracer: &mut Tracer, name: &str) -> Atom {
        tracer.bind1(
            Primitive::AxisIndex,
            Params::AxisIndex {
                axis_name: name.to_string(),
            },
            vec![],
            ShapedArray::scalar(DType::I32),
        )
    }

    #[test]
    fn named_axes_are_collected_from_nested_jaxprs() {
        let mut branch = Tracer::new();
        let idx = axis_index(&mut branch, "y");
        let branch = branch.finish(vec![idx]);

        let mut t = Tracer::new();
        let p = t.input(ShapedArray::scalar(DType::I32));
        let x = axis_index(&mut t, "x");
        t.bind(
            Primitive::Cond,
            Params::Cond {
                branches: vec![branch.clone(), branch],
            },
            vec![p],
            vec![AbstractValue::scalar(DType::I32)],
        );
        let mut jaxpr = t.finish(vec![x]);
        jaxpr.effects.push(Effect::NamedAxis {
            name: "x".to_string(),
        });

        assert_eq!(jaxpr.named_axes(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn next_var_id_skips_every_bound_name() {
        let mut t = Tracer::new();
        let x = t.input(ShapedArray::scalar(DType::F32));
        let y = t.binary(Primitive::Add, &x, &lit_f32(1.0)).unwrap();
        let jaxpr = t.finish(vec![y]);
        assert_eq!(jaxpr.next_var_id(), 2);
        assert_eq!(Jaxpr::default().next_var_id(), 0);
    }

    #[test]
    fn jaxprs_survive_a_json_round_trip() {
        let mut t = Tracer::new();
        let x = t.input(ShapedArray::new(vec![8, 128], DType::F32));
        t.push_scope("scale");
        let y = t.binary(Primitive::Mul, &x, &lit_f32(0.5)).unwrap();
        t.pop_scope();
        let jaxpr = t.finish(vec![y]);

        let json = serde_json::to_string(&jaxpr).unwrap();
        let back: Jaxpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jaxpr);
        assert_eq!(back.eqns[0].source.name_stack, vec!["scale".to_string()]);
    }

    #[test]
    fn printing_lists_equations_in_order() {
        let mut t = Tracer::new();
        let x = t.input(ShapedArray::scalar(DType::F32));
        let y = t.binary(Primitive::Add, &x, &lit_f32(1.0)).unwrap();
        let z = t.unary(Primitive::Neg, &y).unwrap();
        let jaxpr = t.finish(vec![z]);

        expect![[r#"
            { lambda ; v0:f32[]. let
                v1:f32[] = add v0 1.0:f32
                v2:f32[] = neg v1
              in (v2) }"#]]
        .assert_eq(&jaxpr.to_string());
    }
}
