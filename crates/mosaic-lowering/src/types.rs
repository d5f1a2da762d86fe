//! # Type Mapping (`mosaic_lowering::types`)
//!
//! Maps jaxpr dtypes and abstract values onto dialect types. The mapping is
//! a pure function of its inputs.
//!
//! ## Booleans
//!
//! A boolean is an `i1` everywhere except at a kernel boundary, where it is
//! stored as a full `i32` word. Rules that move booleans in or out of memory
//! ask for the boundary form and convert.
//!
//! ## Memory spaces
//!
//! The error-flag and index-operand spaces are placed in scalar memory. A
//! reference without an explicit space lives in vector memory.

use mosaic_ir::{Dim, FloatType, MemorySpace as IrMemorySpace, Type};
use mosaic_jaxpr::{AbstractValue, DType, MemorySpace, SemaphoreKind};

use crate::error::LoweringError;

/// Physical memory space for an optional logical one.
pub fn memory_space_to_ir(space: Option<MemorySpace>) -> IrMemorySpace {
    match space {
        None | Some(MemorySpace::Vmem) => IrMemorySpace::Vmem,
        Some(MemorySpace::Any) => IrMemorySpace::Any,
        Some(MemorySpace::Smem) | Some(MemorySpace::Error) | Some(MemorySpace::Index) => {
            IrMemorySpace::Smem
        }
        Some(MemorySpace::Cmem) => IrMemorySpace::Cmem,
        Some(MemorySpace::Semaphore) => IrMemorySpace::Semaphore,
    }
}

pub fn semaphore_type(kind: SemaphoreKind) -> Type {
    match kind {
        SemaphoreKind::Dma => Type::DmaSemaphore,
        SemaphoreKind::Regular | SemaphoreKind::Barrier => Type::Semaphore,
    }
}

/// Element type of `dtype`. `kernel_boundary` selects the in-memory form of
/// booleans.
pub fn dtype_to_ir_type(dtype: &DType, kernel_boundary: bool) -> Result<Type, LoweringError> {
    Ok(match dtype {
        DType::Bool if kernel_boundary => Type::Integer(32),
        DType::Bool => Type::i1(),
        DType::I8 | DType::U8 => Type::Integer(8),
        DType::I16 | DType::U16 => Type::Integer(16),
        DType::I32 | DType::U32 => Type::Integer(32),
        DType::I64 | DType::U64 => Type::Integer(64),
        DType::BF16 => Type::Float(FloatType::BF16),
        DType::F16 => Type::Float(FloatType::F16),
        DType::F32 => Type::Float(FloatType::F32),
        DType::F64 => Type::Float(FloatType::F64),
        DType::F8E5M2 => Type::Float(FloatType::F8E5M2),
        DType::F8E4M3FN => Type::Float(FloatType::F8E4M3FN),
        DType::Semaphore(kind) => semaphore_type(*kind),
        DType::Key(key) => {
            return Err(LoweringError::UnsupportedType(format!(
                "key<{}> has no scalar element type",
                key.name
            )))
        }
    })
}

/// Dialect type of an abstract value.
///
/// `shape` overrides the shape of a reference (used for block windows) and
/// `memory_space` overrides the space recorded on the aval.
pub fn aval_to_ir_type(
    aval: &AbstractValue,
    shape: Option<&[usize]>,
    memory_space: Option<MemorySpace>,
    kernel_boundary: bool,
) -> Result<Type, LoweringError> {
    match aval {
        AbstractValue::Semaphore(kind) => Ok(Type::memref(
            Vec::new(),
            semaphore_type(*kind),
            IrMemorySpace::Semaphore,
        )),
        AbstractValue::Ref(r) => {
            let shape = shape.unwrap_or(&r.inner.shape);
            let space = memory_space.or(r.memory_space);
            match &r.inner.dtype {
                DType::Key(key) => key_memref(&key.key_shape, shape, space),
                DType::Semaphore(kind) => Ok(Type::memref(
                    static_dims(shape),
                    semaphore_type(*kind),
                    IrMemorySpace::Semaphore,
                )),
                dtype => Ok(Type::memref(
                    static_dims(shape),
                    dtype_to_ir_type(dtype, true)?,
                    memory_space_to_ir(space),
                )),
            }
        }
        AbstractValue::Array(array) => {
            if let DType::Key(key) = &array.dtype {
                return key_memref(&key.key_shape, &array.shape, memory_space);
            }
            let element = dtype_to_ir_type(&array.dtype, kernel_boundary)?;
            if array.is_scalar() {
                Ok(element)
            } else {
                Ok(Type::vector(to_i64(&array.shape), element))
            }
        }
    }
}

/// Keys live in scalar memory as 32-bit words, with the key shape appended.
fn key_memref(
    key_shape: &[usize],
    shape: &[usize],
    space: Option<MemorySpace>,
) -> Result<Type, LoweringError> {
    let placed = memory_space_to_ir(space.or(Some(MemorySpace::Smem)));
    if placed != IrMemorySpace::Smem {
        return Err(LoweringError::InvalidPlacement(format!(
            "PRNG keys must be placed in SMEM, found {}",
            placed
        )));
    }
    let mut dims = shape.to_vec();
    dims.extend_from_slice(key_shape);
    Ok(Type::memref(static_dims(&dims), Type::i32(), IrMemorySpace::Smem))
}

fn static_dims(shape: &[usize]) -> Vec<Dim> {
    shape.iter().map(|&d| Dim::Static(d as i64)).collect()
}

pub(crate) fn to_i64(shape: &[usize]) -> Vec<i64> {
    shape.iter().map(|&d| d as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_jaxpr::KeyImpl;

    #[test]
    fn booleans_widen_only_at_the_boundary() {
        assert_eq!(dtype_to_ir_type(&DType::Bool, false).unwrap(), Type::i1());
        assert_eq!(dtype_to_ir_type(&DType::Bool, true).unwrap(), Type::i32());
    }

    #[test]
    fn unsigned_and_signed_share_a_type() {
        for (u, s) in [(DType::U8, DType::I8), (DType::U32, DType::I32)] {
            assert_eq!(
                dtype_to_ir_type(&u, false).unwrap(),
                dtype_to_ir_type(&s, false).unwrap()
            );
        }
    }

    #[test]
    fn generic_spaces_land_in_smem() {
        assert_eq!(memory_space_to_ir(None), IrMemorySpace::Vmem);
        assert_eq!(memory_space_to_ir(Some(MemorySpace::Error)), IrMemorySpace::Smem);
        assert_eq!(memory_space_to_ir(Some(MemorySpace::Index)), IrMemorySpace::Smem);
    }

    #[test]
    fn arrays_become_vectors_and_scalars_stay_scalar() {
        let v = aval_to_ir_type(&AbstractValue::array(vec![8, 128], DType::F32), None, None, false);
        assert_eq!(v.unwrap(), Type::vector(vec![8, 128], Type::f32()));
        let s = aval_to_ir_type(&AbstractValue::scalar(DType::I32), None, None, false);
        assert_eq!(s.unwrap(), Type::i32());
    }

    #[test]
    fn ref_space_prefers_the_explicit_argument() {
        let aval = AbstractValue::reference(vec![4], DType::F32, Some(MemorySpace::Smem));
        let own = aval_to_ir_type(&aval, None, None, false).unwrap();
        assert_eq!(own.memory_space(), Some(IrMemorySpace::Smem));
        let explicit = aval_to_ir_type(&aval, Some(&[2]), Some(MemorySpace::Any), false).unwrap();
        assert_eq!(explicit, Type::static_memref(&[2], Type::f32(), IrMemorySpace::Any));
    }

    #[test]
    fn semaphore_arrays_live_in_semaphore_memory() {
        let aval = AbstractValue::reference(vec![2], DType::Semaphore(SemaphoreKind::Dma), None);
        let ty = aval_to_ir_type(&aval, None, None, false).unwrap();
        assert_eq!(
            ty,
            Type::static_memref(&[2], Type::DmaSemaphore, IrMemorySpace::Semaphore)
        );
    }

    #[test]
    fn keys_expand_to_smem_words() {
        let key = DType::Key(KeyImpl::tpu_internal());
        let ty = aval_to_ir_type(&AbstractValue::scalar(key.clone()), None, None, false).unwrap();
        assert_eq!(ty, Type::static_memref(&[1, 1], Type::i32(), IrMemorySpace::Smem));
        let err = aval_to_ir_type(
            &AbstractValue::reference(vec![], key, Some(MemorySpace::Vmem)),
            None,
            None,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LoweringError::InvalidPlacement(_)));
    }

    #[test]
    fn mapping_is_pure() {
        let aval = AbstractValue::array(vec![16, 256], DType::BF16);
        let a = aval_to_ir_type(&aval, None, None, true).unwrap();
        let b = aval_to_ir_type(&aval, None, None, true).unwrap();
        assert_eq!(a, b);
    }
}
