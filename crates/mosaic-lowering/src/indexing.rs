//! Turning indexers into start/size/stride triples and sliced references.
//!
//! Dynamic index components name equation inputs by position. They are
//! resolved against the rule's arguments before anything is emitted.

use mosaic_ir::{Builder, Dim, OpKind, Type, Value};
use mosaic_jaxpr::{Index, IndexOperand, NDIndexer, SliceSize};

use crate::constant::{i32_constant, index_constant};
use crate::error::LoweringError;
use crate::value::{BlockShape, Extent, Lowered};

/// A scalar index once dynamic operands are resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexValue {
    Const(i64),
    Dynamic(Value),
}

pub fn resolve_operand(operand: IndexOperand, args: &[Lowered]) -> Result<IndexValue, LoweringError> {
    match operand {
        IndexOperand::Static(i) => Ok(IndexValue::Const(i)),
        IndexOperand::Dynamic(pos) => resolve_scalar(pos, args),
    }
}

/// A scalar equation input, folding literals to constants.
pub fn resolve_scalar(pos: usize, args: &[Lowered]) -> Result<IndexValue, LoweringError> {
    match args.get(pos) {
        Some(Lowered::Value(v)) => Ok(IndexValue::Dynamic(*v)),
        Some(Lowered::Host(lit)) => lit.value.as_i64().map(IndexValue::Const).ok_or_else(|| {
            LoweringError::InvalidIndexer(format!("non-integer index {}", lit.value))
        }),
        Some(Lowered::Bundle(_)) => Err(LoweringError::InvalidIndexer(
            "a key cannot be used as an index".to_string(),
        )),
        None => Err(LoweringError::internal(format!("index operand {} out of range", pos))),
    }
}

/// Converts an index to the `index` type.
pub fn make_index(builder: &mut Builder, index: IndexValue) -> Result<Value, LoweringError> {
    match index {
        IndexValue::Const(i) => index_constant(builder, i),
        IndexValue::Dynamic(v) if builder.value_type(v).is_index() => Ok(v),
        IndexValue::Dynamic(v) => Ok(builder
            .op(OpKind::IndexCast)
            .operand(v)
            .value(Type::Index)),
    }
}

fn start_value(
    builder: &mut Builder,
    index: IndexValue,
    cast_to_index: bool,
) -> Result<Value, LoweringError> {
    match (cast_to_index, index) {
        (true, index) => make_index(builder, index),
        (false, IndexValue::Const(i)) => i32_constant(builder, i),
        (false, IndexValue::Dynamic(v)) => Ok(v),
    }
}

/// Start, size, stride and squeeze flag of each dimension of a reference.
#[derive(Debug, Clone, Default)]
pub struct StartSizeStride {
    pub starts: Vec<Value>,
    pub sizes: Vec<Extent>,
    pub strides: Vec<usize>,
    pub squeeze: Vec<bool>,
}

impl StartSizeStride {
    /// Block shape left after squeezed dimensions are dropped.
    pub fn block_shape(&self) -> BlockShape {
        self.sizes
            .iter()
            .zip(&self.squeeze)
            .filter(|(_, &sq)| !sq)
            .map(|(&s, _)| s)
            .collect()
    }
}

fn index_to_start_size_stride(
    builder: &mut Builder,
    index: &Index,
    args: &[Lowered],
    cast_to_index: bool,
    out: &mut StartSizeStride,
) -> Result<(), LoweringError> {
    match index {
        Index::Slice(slice) => {
            let start = resolve_operand(slice.start, args)?;
            out.starts.push(start_value(builder, start, cast_to_index)?);
            out.sizes.push(match slice.size {
                SliceSize::Static(n) => Extent::Static(n as i64),
                SliceSize::Dynamic(pos) => match resolve_scalar(pos, args)? {
                    IndexValue::Const(n) => Extent::Static(n),
                    IndexValue::Dynamic(v) => Extent::Dynamic(v),
                },
            });
            out.strides.push(slice.stride);
            out.squeeze.push(false);
        }
        Index::Scalar(operand) => {
            let start = resolve_operand(*operand, args)?;
            out.starts.push(start_value(builder, start, cast_to_index)?);
            out.sizes.push(Extent::Static(1));
            out.strides.push(1);
            out.squeeze.push(true);
        }
        Index::Array(pos) => {
            return Err(LoweringError::InvalidIndexer(format!(
                "Can only use ()-shaped and slice indexing, got an array index at input {}",
                pos
            )))
        }
    }
    Ok(())
}

/// Resolves `indexer` against a reference of block shape `ref_block_shape`.
///
/// Mapped dimensions are not covered by the indexer; they are accessed at
/// zero and squeezed.
pub fn indexer_to_start_size_stride(
    builder: &mut Builder,
    indexer: &NDIndexer,
    args: &[Lowered],
    ref_block_shape: &[Extent],
    cast_to_index: bool,
) -> Result<StartSizeStride, LoweringError> {
    let mut out = StartSizeStride::default();
    let mut indices = indexer.indices.iter();
    for dim in ref_block_shape {
        if let Extent::Mapped = dim {
            out.starts.push(start_value(builder, IndexValue::Const(0), cast_to_index)?);
            out.sizes.push(Extent::Static(1));
            out.strides.push(1);
            out.squeeze.push(true);
            continue;
        }
        let index = indices.next().ok_or_else(|| {
            LoweringError::InvalidIndexer(format!(
                "indexer with {} entries does not cover block shape of rank {}",
                indexer.indices.len(),
                ref_block_shape.len()
            ))
        })?;
        index_to_start_size_stride(builder, index, args, cast_to_index, &mut out)?;
    }
    if indices.next().is_some() {
        return Err(LoweringError::InvalidIndexer(format!(
            "indexer with {} entries is longer than block shape of rank {}",
            indexer.indices.len(),
            ref_block_shape.len()
        )));
    }
    Ok(out)
}

fn memref_parts(
    builder: &Builder,
    reference: Value,
) -> Result<(Type, mosaic_ir::MemorySpace), LoweringError> {
    match builder.value_type(reference) {
        Type::MemRef {
            element,
            memory_space,
            ..
        } => Ok(((**element).clone(), *memory_space)),
        other => Err(LoweringError::internal(format!(
            "expected a memref, found {}",
            other
        ))),
    }
}

fn memref_dims<'e>(sizes: impl Iterator<Item = &'e Extent>) -> Vec<Dim> {
    sizes
        .map(|s| match s {
            Extent::Static(n) => Dim::Static(*n),
            _ => Dim::Dynamic,
        })
        .collect()
}

/// Narrows `reference` to the window selected by `indexer`.
pub fn slice_memref(
    builder: &mut Builder,
    reference: Value,
    indexer: &NDIndexer,
    args: &[Lowered],
    ref_block_shape: &[Extent],
) -> Result<(Value, BlockShape), LoweringError> {
    let sss = indexer_to_start_size_stride(builder, indexer, args, ref_block_shape, false)?;
    if sss.strides.iter().any(|&s| s != 1) {
        return Err(LoweringError::UnsupportedIndexing(
            "Strided slices of references are unsupported.".to_string(),
        ));
    }
    let (element, space) = memref_parts(builder, reference)?;
    let dynamic_sizes: Vec<Value> = sss
        .sizes
        .iter()
        .filter_map(|s| match s {
            Extent::Dynamic(v) => Some(*v),
            _ => None,
        })
        .collect();
    let sliced_ty = Type::memref(memref_dims(sss.sizes.iter()), element.clone(), space);
    let mut out = builder
        .op(OpKind::MemRefSlice)
        .operand(reference)
        .operands(&sss.starts)
        .operands(&dynamic_sizes)
        .value(sliced_ty);
    if sss.squeeze.iter().any(|&sq| sq) {
        let kept = sss.sizes.iter().zip(&sss.squeeze).filter(|(_, &sq)| !sq).map(|(s, _)| s);
        let squeezed_ty = Type::memref(memref_dims(kept), element, space);
        out = builder
            .op(OpKind::MemRefSqueeze)
            .operand(out)
            .value(squeezed_ty);
    }
    Ok((out, sss.block_shape()))
}

/// Applies a chain of indexers to a reference.
pub fn index_ref(
    builder: &mut Builder,
    reference: Value,
    ref_block_shape: BlockShape,
    indexers: &[NDIndexer],
    args: &[Lowered],
) -> Result<(Value, BlockShape), LoweringError> {
    let mut current = (reference, ref_block_shape);
    for indexer in indexers {
        current = slice_memref(builder, current.0, indexer, args, &current.1)?;
    }
    Ok(current)
}

/// Splits an indexer chain into the prefix that narrows the reference and
/// the final indexer describing the access. An empty chain accesses the
/// full block.
pub fn split_access<'i>(
    indexers: &'i [NDIndexer],
    full_shape: &[usize],
) -> (&'i [NDIndexer], NDIndexer) {
    match indexers.split_last() {
        Some((last, prefix)) => (prefix, last.clone()),
        None => (indexers, NDIndexer::full(full_shape)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_ir::MemorySpace;
    use mosaic_jaxpr::Slice;

    fn vmem_ref(b: &mut Builder, shape: &[i64]) -> Value {
        let ty = Type::static_memref(shape, Type::f32(), MemorySpace::Vmem);
        b.open_block(&[ty])[0]
    }

    #[test]
    fn full_slice_is_an_identity() {
        let mut b = Builder::new("m");
        let r = vmem_ref(&mut b, &[16, 256]);
        let shape = vec![Extent::Static(16), Extent::Static(256)];
        let (out, bs) = index_ref(&mut b, r, shape.clone(), &[NDIndexer::full(&[16, 256])], &[]).unwrap();
        assert_eq!(b.value_type(out), b.value_type(r));
        assert_eq!(bs, shape);
    }

    #[test]
    fn scalar_indices_squeeze() {
        let mut b = Builder::new("m");
        let r = vmem_ref(&mut b, &[4, 8, 128]);
        let indexer = NDIndexer {
            indices: vec![
                Index::Scalar(IndexOperand::Static(2)),
                Index::Slice(Slice::full(8)),
                Index::Slice(Slice::full(128)),
            ],
            shape: vec![4, 8, 128],
        };
        let shape = vec![Extent::Static(4), Extent::Static(8), Extent::Static(128)];
        let (out, bs) = slice_memref(&mut b, r, &indexer, &[], &shape).unwrap();
        assert_eq!(
            b.value_type(out),
            &Type::static_memref(&[8, 128], Type::f32(), MemorySpace::Vmem)
        );
        assert_eq!(bs, vec![Extent::Static(8), Extent::Static(128)]);
    }

    #[test]
    fn mapped_dims_are_not_indexed() {
        let mut b = Builder::new("m");
        let r = vmem_ref(&mut b, &[1, 8, 128]);
        let shape = vec![Extent::Mapped, Extent::Static(8), Extent::Static(128)];
        let sss =
            indexer_to_start_size_stride(&mut b, &NDIndexer::full(&[8, 128]), &[], &shape, true)
                .unwrap();
        assert_eq!(sss.squeeze, vec![true, false, false]);
        assert_eq!(sss.block_shape(), vec![Extent::Static(8), Extent::Static(128)]);
        assert!(sss.starts.iter().all(|s| b.value_type(*s).is_index()));
        assert!(b.value_type(r).is_memref());
    }

    #[test]
    fn strided_reference_slices_fail() {
        let mut b = Builder::new("m");
        let r = vmem_ref(&mut b, &[16, 128]);
        let indexer = NDIndexer {
            indices: vec![
                Index::Slice(Slice::new(IndexOperand::Static(0), 8, 2)),
                Index::Slice(Slice::full(128)),
            ],
            shape: vec![16, 128],
        };
        let shape = vec![Extent::Static(16), Extent::Static(128)];
        let err = slice_memref(&mut b, r, &indexer, &[], &shape).unwrap_err();
        assert!(matches!(err, LoweringError::UnsupportedIndexing(_)));
    }

    #[test]
    fn short_indexers_are_rejected() {
        let mut b = Builder::new("m");
        let r = vmem_ref(&mut b, &[16, 128]);
        let shape = vec![Extent::Static(16), Extent::Static(128)];
        let err = slice_memref(&mut b, r, &NDIndexer::full(&[16]), &[], &shape).unwrap_err();
        assert!(matches!(err, LoweringError::InvalidIndexer(_)));
    }
}
