//! Abstract values: the static type of every jaxpr name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::{DType, SemaphoreKind};

/// Memory space a reference lives in, as chosen by the kernel author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySpace {
    /// Whole-array memory (HBM) that the kernel only reaches through DMAs.
    Any,
    /// Vector memory.
    Vmem,
    /// Scalar memory.
    Smem,
    /// Common memory shared between cores.
    Cmem,
    /// Storage for semaphores.
    Semaphore,
    /// Generic space used for error-checking flags; lives in scalar memory.
    Error,
    /// Generic space used for index operands; lives in scalar memory.
    Index,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemorySpace::Any => "any",
            MemorySpace::Vmem => "vmem",
            MemorySpace::Smem => "smem",
            MemorySpace::Cmem => "cmem",
            MemorySpace::Semaphore => "semaphore_mem",
            MemorySpace::Error => "error",
            MemorySpace::Index => "index",
        };
        f.write_str(name)
    }
}

/// An immutable array or scalar value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapedArray {
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Set for Python-level scalars whose dtype yields to the other operand.
    #[serde(default)]
    pub weak_type: bool,
}

impl ShapedArray {
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        ShapedArray {
            shape: shape.into(),
            dtype,
            weak_type: false,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        ShapedArray::new(Vec::new(), dtype)
    }

    pub fn weak(mut self) -> Self {
        self.weak_type = true;
        self
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn with_shape(&self, shape: impl Into<Vec<usize>>) -> Self {
        ShapedArray {
            shape: shape.into(),
            dtype: self.dtype.clone(),
            weak_type: self.weak_type,
        }
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        ShapedArray {
            shape: self.shape.clone(),
            dtype,
            weak_type: false,
        }
    }
}

/// A mutable reference to an array in some memory space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbstractRef {
    pub inner: ShapedArray,
    #[serde(default)]
    pub memory_space: Option<MemorySpace>,
}

/// Static type of a single jaxpr name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractValue {
    Array(ShapedArray),
    Ref(AbstractRef),
    /// An opaque semaphore handle, not backed by a reference.
    Semaphore(SemaphoreKind),
}

impl AbstractValue {
    pub fn array(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        AbstractValue::Array(ShapedArray::new(shape, dtype))
    }

    pub fn scalar(dtype: DType) -> Self {
        AbstractValue::Array(ShapedArray::scalar(dtype))
    }

    pub fn reference(
        shape: impl Into<Vec<usize>>,
        dtype: DType,
        memory_space: Option<MemorySpace>,
    ) -> Self {
        AbstractValue::Ref(AbstractRef {
            inner: ShapedArray::new(shape, dtype),
            memory_space,
        })
    }

    /// Shape of the value, or of the referenced array for refs.
    pub fn shape(&self) -> &[usize] {
        match self {
            AbstractValue::Array(array) => &array.shape,
            AbstractValue::Ref(r) => &r.inner.shape,
            AbstractValue::Semaphore(_) => &[],
        }
    }

    /// Element dtype of the value, or of the referenced array for refs.
    pub fn dtype(&self) -> DType {
        match self {
            AbstractValue::Array(array) => array.dtype.clone(),
            AbstractValue::Ref(r) => r.inner.dtype.clone(),
            AbstractValue::Semaphore(kind) => DType::Semaphore(*kind),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, AbstractValue::Ref(_))
    }

    pub fn is_weak(&self) -> bool {
        matches!(self, AbstractValue::Array(a) if a.weak_type)
    }

    /// The array behind the value: itself for arrays, the pointee for refs.
    pub fn as_array(&self) -> Option<&ShapedArray> {
        match self {
            AbstractValue::Array(array) => Some(array),
            AbstractValue::Ref(r) => Some(&r.inner),
            AbstractValue::Semaphore(_) => None,
        }
    }

    pub fn memory_space(&self) -> Option<MemorySpace> {
        match self {
            AbstractValue::Ref(r) => r.memory_space,
            _ => None,
        }
    }
}

impl From<ShapedArray> for AbstractValue {
    fn from(array: ShapedArray) -> Self {
        AbstractValue::Array(array)
    }
}

fn write_shape(f: &mut fmt::Formatter<'_>, shape: &[usize]) -> fmt::Result {
    write!(f, "[")?;
    for (i, dim) in shape.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", dim)?;
    }
    write!(f, "]")
}

impl fmt::Display for ShapedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dtype)?;
        write_shape(f, &self.shape)
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Array(array) => write!(f, "{}", array),
            AbstractValue::Ref(r) => match r.memory_space {
                Some(space) => write!(f, "Ref{{{}}}<{}>", space, r.inner),
                None => write!(f, "Ref<{}>", r.inner),
            },
            AbstractValue::Semaphore(kind) => write!(f, "{}", kind),
        }
    }
}
