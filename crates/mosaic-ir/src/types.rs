//! Target IR types.

use std::fmt;

/// Floating point element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatType {
    BF16,
    F16,
    F32,
    F64,
    F8E5M2,
    F8E4M3FN,
}

impl FloatType {
    pub fn bit_width(self) -> u32 {
        match self {
            FloatType::F8E5M2 | FloatType::F8E4M3FN => 8,
            FloatType::BF16 | FloatType::F16 => 16,
            FloatType::F32 => 32,
            FloatType::F64 => 64,
        }
    }
}

/// Memory spaces of the TPU dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    Any,
    Vmem,
    Smem,
    Cmem,
    Semaphore,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemorySpace::Any => "any",
            MemorySpace::Vmem => "vmem",
            MemorySpace::Smem => "smem",
            MemorySpace::Cmem => "cmem",
            MemorySpace::Semaphore => "semaphore_mem",
        };
        write!(f, "#tpu.memory_space<{}>", name)
    }
}

/// A memref dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(i64),
    Dynamic,
}

/// A type of the target dialect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Signless integer of the given bit width; `i1` is the boolean type.
    Integer(u32),
    Index,
    Float(FloatType),
    Vector {
        shape: Vec<i64>,
        element: Box<Type>,
    },
    MemRef {
        shape: Vec<Dim>,
        element: Box<Type>,
        memory_space: MemorySpace,
    },
    Semaphore,
    DmaSemaphore,
}

impl Type {
    pub fn i1() -> Type {
        Type::Integer(1)
    }

    pub fn i32() -> Type {
        Type::Integer(32)
    }

    pub fn f32() -> Type {
        Type::Float(FloatType::F32)
    }

    pub fn vector(shape: Vec<i64>, element: Type) -> Type {
        Type::Vector {
            shape,
            element: Box::new(element),
        }
    }

    pub fn memref(shape: Vec<Dim>, element: Type, memory_space: MemorySpace) -> Type {
        Type::MemRef {
            shape,
            element: Box::new(element),
            memory_space,
        }
    }

    /// A memref with a fully static shape.
    pub fn static_memref(shape: &[i64], element: Type, memory_space: MemorySpace) -> Type {
        Type::memref(
            shape.iter().map(|&d| Dim::Static(d)).collect(),
            element,
            memory_space,
        )
    }

    /// Element type of vectors and memrefs, or the type itself for scalars.
    pub fn element_type(&self) -> &Type {
        match self {
            Type::Vector { element, .. } | Type::MemRef { element, .. } => element,
            other => other,
        }
    }

    /// Shape of a vector type.
    pub fn vector_shape(&self) -> Option<&[i64]> {
        match self {
            Type::Vector { shape, .. } => Some(shape),
            _ => None,
        }
    }

    pub fn memory_space(&self) -> Option<MemorySpace> {
        match self {
            Type::MemRef { memory_space, .. } => Some(*memory_space),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Type::Index)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    pub fn is_memref(&self) -> bool {
        matches!(self, Type::MemRef { .. })
    }

    /// Bit width of scalar integer and float types.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::Integer(w) => Some(*w),
            Type::Float(f) => Some(f.bit_width()),
            _ => None,
        }
    }
}

impl fmt::Display for FloatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FloatType::BF16 => "bf16",
            FloatType::F16 => "f16",
            FloatType::F32 => "f32",
            FloatType::F64 => "f64",
            FloatType::F8E5M2 => "f8E5M2",
            FloatType::F8E4M3FN => "f8E4M3FN",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Integer(w) => write!(f, "i{}", w),
            Type::Index => write!(f, "index"),
            Type::Float(ft) => write!(f, "{}", ft),
            Type::Vector { shape, element } => {
                write!(f, "vector<")?;
                for d in shape {
                    write!(f, "{}x", d)?;
                }
                write!(f, "{}>", element)
            }
            Type::MemRef {
                shape,
                element,
                memory_space,
            } => {
                write!(f, "memref<")?;
                for d in shape {
                    match d {
                        Dim::Static(n) => write!(f, "{}x", n)?,
                        Dim::Dynamic => write!(f, "?x")?,
                    }
                }
                write!(f, "{}, {}>", element, memory_space)
            }
            Type::Semaphore => write!(f, "!tpu.semaphore"),
            Type::DmaSemaphore => write!(f, "!tpu.dma_semaphore"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_mlir_syntax() {
        let v = Type::vector(vec![8, 128], Type::f32());
        assert_eq!(v.to_string(), "vector<8x128xf32>");
        let m = Type::memref(
            vec![Dim::Dynamic, Dim::Static(128)],
            Type::Integer(32),
            MemorySpace::Vmem,
        );
        assert_eq!(m.to_string(), "memref<?x128xi32, #tpu.memory_space<vmem>>");
        let s = Type::static_memref(&[], Type::DmaSemaphore, MemorySpace::Semaphore);
        assert_eq!(
            s.to_string(),
            "memref<!tpu.dma_semaphore, #tpu.memory_space<semaphore_mem>>"
        );
    }
}
