//! Element types of abstract values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a synchronization primitive dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemaphoreKind {
    /// A regular counting semaphore.
    Regular,
    /// A semaphore signalled by DMA completion.
    Dma,
    /// The per-kernel cross-device barrier semaphore.
    Barrier,
}

impl fmt::Display for SemaphoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemaphoreKind::Regular => write!(f, "semaphore"),
            SemaphoreKind::Dma => write!(f, "dma_semaphore"),
            SemaphoreKind::Barrier => write!(f, "barrier_semaphore"),
        }
    }
}

/// An opaque PRNG key implementation.
///
/// Keys are logical scalars whose physical representation is a small
/// `u32` array of `key_shape`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyImpl {
    pub name: String,
    pub key_shape: Vec<usize>,
}

impl KeyImpl {
    /// Name of the key implementation backed by the TPU hardware PRNG.
    pub const TPU_INTERNAL: &'static str = "pallas_tpu";

    /// The stateful hardware PRNG key: a single 32-bit seed word.
    pub fn tpu_internal() -> Self {
        KeyImpl {
            name: Self::TPU_INTERNAL.to_string(),
            key_shape: vec![1, 1],
        }
    }

    pub fn is_tpu_internal(&self) -> bool {
        self.name == Self::TPU_INTERNAL
    }
}

/// Element dtype of an abstract value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    BF16,
    F16,
    F32,
    F64,
    F8E5M2,
    F8E4M3FN,
    Semaphore(SemaphoreKind),
    Key(KeyImpl),
}

impl DType {
    /// Width in bits of one element as it is laid out in memory.
    ///
    /// Booleans occupy a full 32-bit word in kernel memory. Extended dtypes
    /// have no bit width.
    pub fn bit_width(&self) -> Option<u32> {
        Some(match self {
            DType::Bool => 32,
            DType::I8 | DType::U8 | DType::F8E5M2 | DType::F8E4M3FN => 8,
            DType::I16 | DType::U16 | DType::BF16 | DType::F16 => 16,
            DType::I32 | DType::U32 | DType::F32 => 32,
            DType::I64 | DType::U64 | DType::F64 => 64,
            DType::Semaphore(_) | DType::Key(_) => return None,
        })
    }

    /// Size in bytes of one element, `None` for extended dtypes.
    pub fn itemsize(&self) -> Option<u32> {
        self.bit_width().map(|bits| bits / 8)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, DType::Bool)
    }

    pub fn is_signed_int(&self) -> bool {
        matches!(self, DType::I8 | DType::I16 | DType::I32 | DType::I64)
    }

    pub fn is_unsigned_int(&self) -> bool {
        matches!(self, DType::U8 | DType::U16 | DType::U32 | DType::U64)
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            DType::BF16 | DType::F16 | DType::F32 | DType::F64 | DType::F8E5M2 | DType::F8E4M3FN
        )
    }

    /// True for dtypes that have no plain numeric representation.
    pub fn is_extended(&self) -> bool {
        matches!(self, DType::Semaphore(_) | DType::Key(_))
    }

    pub fn is_key(&self) -> bool {
        matches!(self, DType::Key(_))
    }

    pub fn is_semaphore(&self) -> bool {
        matches!(self, DType::Semaphore(_))
    }

    /// The signed integer dtype with the same width, or `self` when not unsigned.
    pub fn to_signed(&self) -> DType {
        match self {
            DType::U8 => DType::I8,
            DType::U16 => DType::I16,
            DType::U32 => DType::I32,
            DType::U64 => DType::I64,
            other => other.clone(),
        }
    }

    /// Trailing shape an element of this dtype occupies in memory.
    ///
    /// Empty for every dtype except keys, which expand to their key shape.
    pub fn physical_shape(&self) -> &[usize] {
        match self {
            DType::Key(key) => &key.key_shape,
            _ => &[],
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::BF16 => "bf16",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::F8E5M2 => "f8e5m2",
            DType::F8E4M3FN => "f8e4m3fn",
            DType::Semaphore(kind) => return write!(f, "{}", kind),
            DType::Key(key) => return write!(f, "key<{}>", key.name),
        };
        f.write_str(name)
    }
}
