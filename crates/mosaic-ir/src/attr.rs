//! Operation, function and module attributes.

use std::fmt;

use indexmap::IndexMap;

use crate::types::Type;

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Int { value: i64, ty: Type },
    Float { value: f64, ty: Type },
    String(String),
    Type(Type),
    Array(Vec<Attribute>),
    /// `array<i64: ...>`
    DenseI64(Vec<i64>),
    /// `dense<value> : type`, a splat constant of a vector type.
    Splat { value: Box<Attribute>, ty: Type },
    SymbolRef(String),
    Dict(IndexMap<String, Attribute>),
    /// A dialect attribute kept in its textual form, e.g. `#tpu.dimension_semantics<parallel>`.
    Opaque(String),
}

impl Attribute {
    pub fn i64(value: i64) -> Attribute {
        Attribute::Int {
            value,
            ty: Type::Integer(64),
        }
    }

    pub fn i32(value: i64) -> Attribute {
        Attribute::Int {
            value,
            ty: Type::Integer(32),
        }
    }

    pub fn string(s: impl Into<String>) -> Attribute {
        Attribute::String(s.into())
    }

    pub fn opaque(s: impl Into<String>) -> Attribute {
        Attribute::Opaque(s.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int { value, .. } => Some(*value),
            Attribute::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Attribute::Float { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(s) | Attribute::SymbolRef(s) | Attribute::Opaque(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dense(&self) -> Option<&[i64]> {
        match self {
            Attribute::DenseI64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&IndexMap<String, Attribute>> {
        match self {
            Attribute::Dict(d) => Some(d),
            _ => None,
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_infinite() {
        let bits = if value > 0.0 { "0x7F800000" } else { "0xFF800000" };
        write!(f, "{}", bits)
    } else if value.is_nan() {
        write!(f, "0x7FC00000")
    } else {
        write!(f, "{:e}", value)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Unit => write!(f, "unit"),
            Attribute::Bool(b) => write!(f, "{}", b),
            Attribute::Int { value, ty } => write!(f, "{} : {}", value, ty),
            Attribute::Float { value, ty } => {
                write_float(f, *value)?;
                write!(f, " : {}", ty)
            }
            Attribute::String(s) => write!(f, "{:?}", s),
            Attribute::Type(t) => write!(f, "{}", t),
            Attribute::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Attribute::DenseI64(items) => {
                write!(f, "array<i64")?;
                for (i, item) in items.iter().enumerate() {
                    write!(f, "{}{}", if i == 0 { ": " } else { ", " }, item)?;
                }
                write!(f, ">")
            }
            Attribute::Splat { value, ty } => {
                write!(f, "dense<")?;
                match value.as_ref() {
                    Attribute::Int { value, .. } => write!(f, "{}", value)?,
                    Attribute::Float { value, .. } => write_float(f, *value)?,
                    Attribute::Bool(b) => write!(f, "{}", b)?,
                    other => write!(f, "{}", other)?,
                }
                write!(f, "> : {}", ty)
            }
            Attribute::SymbolRef(s) => write!(f, "@{}", s),
            Attribute::Dict(entries) => write_dict(f, entries),
            Attribute::Opaque(s) => f.write_str(s),
        }
    }
}

/// Writes `{k = v, ...}` for a non-empty attribute dictionary.
pub(crate) fn write_dict(f: &mut fmt::Formatter<'_>, entries: &IndexMap<String, Attribute>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match v {
            Attribute::Unit => write!(f, "{}", k)?,
            _ => write!(f, "{} = {}", k, v)?,
        }
    }
    write!(f, "}}")
}
