//! Kernels shared by the integration tests.
#![allow(dead_code)]

use mosaic_jaxpr::{
    lit_f32, lit_i32, AbstractRef, AbstractValue, BlockDim, BlockMapping, DType, GridDim,
    GridMapping, IndexingMode, Jaxpr, MemorySpace, Params, Primitive, RefOperand, ShapedArray,
    Tracer,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Index map passing the grid indices through as block indices.
pub fn identity_index_map(grid_rank: usize) -> Jaxpr {
    let mut t = Tracer::new();
    let indices: Vec<_> = (0..grid_rank)
        .map(|_| t.input(AbstractValue::scalar(DType::I32)))
        .collect();
    t.finish(indices)
}

/// Index map that always selects block zero.
pub fn zero_index_map(grid_rank: usize, array_rank: usize) -> Jaxpr {
    let mut t = Tracer::new();
    for _ in 0..grid_rank {
        t.input(AbstractValue::scalar(DType::I32));
    }
    t.finish(vec![lit_i32(0); array_rank])
}

pub fn block_mapping(
    block: &[usize],
    array: &[usize],
    space: MemorySpace,
    index_map: Jaxpr,
) -> BlockMapping {
    BlockMapping {
        block_shape: block.iter().map(|&b| BlockDim::Block(b)).collect(),
        array_shape: array.to_vec(),
        array_dtype: DType::F32,
        block_aval: AbstractRef {
            inner: ShapedArray::new(block.to_vec(), DType::F32),
            memory_space: Some(space),
        },
        index_map_jaxpr: index_map,
        indexing_mode: IndexingMode::Blocked,
        origin: "x_ref".to_string(),
    }
}

pub fn grid_mapping(grid: &[usize], block_mappings: Vec<BlockMapping>, num_inputs: usize) -> GridMapping {
    let num_outputs = block_mappings.len() - num_inputs;
    GridMapping {
        grid: grid.iter().map(|&g| GridDim::Static(g)).collect(),
        grid_names: None,
        block_mappings,
        vmapped_dims: Vec::new(),
        num_index_operands: 0,
        num_inputs,
        num_outputs,
        num_scratch_operands: 0,
    }
}

/// `o_ref[...] = x_ref[...] + 1.0` over blocks of `block`.
pub fn add_one_kernel(block: &[usize]) -> Jaxpr {
    let mut t = Tracer::new();
    let x_ref = t.input(AbstractValue::reference(
        block.to_vec(),
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    let o_ref = t.input(AbstractValue::reference(
        block.to_vec(),
        DType::F32,
        Some(MemorySpace::Vmem),
    ));
    t.push_scope("add_one");
    let x = t.bind1(
        Primitive::Get,
        Params::Load {
            target: RefOperand::whole(0),
            mask: None,
        },
        vec![x_ref],
        AbstractValue::array(block.to_vec(), DType::F32),
    );
    let y = t
        .binary(Primitive::Add, &x, &lit_f32(1.0))
        .expect("well-typed add");
    t.bind1(
        Primitive::Swap,
        Params::Swap {
            target: RefOperand::whole(0),
            value: 1,
            mask: None,
        },
        vec![o_ref, y],
        AbstractValue::array(block.to_vec(), DType::F32),
    );
    t.pop_scope();
    t.finish(vec![])
}

/// A `(2, 2)` grid over `256x256` arrays in `128x128` blocks.
pub fn add_one_call() -> (GridMapping, Jaxpr) {
    let block = [128, 128];
    let array = [256, 256];
    let gm = grid_mapping(
        &[2, 2],
        vec![
            block_mapping(&block, &array, MemorySpace::Vmem, identity_index_map(2)),
            block_mapping(&block, &array, MemorySpace::Vmem, identity_index_map(2)),
        ],
        1,
    );
    (gm, add_one_kernel(&block))
}
