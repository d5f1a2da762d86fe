use mosaic_jaxpr::{BlockDim, DType, MemorySpace};
use mosaic_lowering::{
    check_block_mapping, lower_jaxpr_to_module, KernelOptions, LoweringConfig, LoweringError,
};

mod common;
use common::{add_one_kernel, block_mapping, grid_mapping, identity_index_map, zero_index_map};

fn vmem(block: &[usize], array: &[usize]) -> mosaic_jaxpr::BlockMapping {
    block_mapping(block, array, MemorySpace::Vmem, identity_index_map(block.len()))
}

#[test]
fn test_tile_multiples_are_accepted() -> Result<(), LoweringError> {
    check_block_mapping(&vmem(&[128, 128], &[256, 256]), false)?;
    check_block_mapping(&vmem(&[8, 256], &[64, 512]), false)?;
    Ok(())
}

#[test]
fn test_full_extents_are_accepted() -> Result<(), LoweringError> {
    check_block_mapping(&vmem(&[3, 100], &[3, 100]), false)?;
    Ok(())
}

#[test]
fn test_ragged_trailing_dims_are_rejected() {
    let err = check_block_mapping(&vmem(&[128, 50], &[256, 100]), false).unwrap_err();
    let LoweringError::InvalidBlockSpec {
        origin,
        block_shape,
        array_shape,
        ..
    } = &err
    else {
        panic!("expected an invalid block spec, got {err:?}");
    };
    assert_eq!(origin, "x_ref");
    assert_eq!(block_shape, "(128, 50)");
    assert_eq!(array_shape, "(256, 100)");
}

#[test]
fn test_forward_compat_is_stricter() -> Result<(), LoweringError> {
    // Equal to the array but wider than a lane tile.
    let wide = vmem(&[8, 200], &[8, 200]);
    check_block_mapping(&wide, false)?;
    let err = check_block_mapping(&wide, true).unwrap_err();
    assert!(matches!(err, LoweringError::InvalidBlockSpec { .. }));

    let vector = vmem(&[128], &[256]);
    check_block_mapping(&vector, false)?;
    assert!(check_block_mapping(&vector, true).is_err());
    Ok(())
}

#[test]
fn test_rank_one_blocks_follow_the_packed_tiling() -> Result<(), LoweringError> {
    let mut halves = vmem(&[256], &[1024]);
    halves.array_dtype = DType::BF16;
    check_block_mapping(&halves, false)?;

    halves.block_shape = vec![BlockDim::Block(128)];
    let err = check_block_mapping(&halves, false).unwrap_err();
    assert!(matches!(err, LoweringError::InvalidBlockSpec { .. }));
    Ok(())
}

#[test]
fn test_any_space_needs_a_trivial_window() -> Result<(), LoweringError> {
    let whole = block_mapping(&[64, 128], &[64, 128], MemorySpace::Any, zero_index_map(1, 2));
    check_block_mapping(&whole, false)?;

    let windowed = block_mapping(&[32, 128], &[64, 128], MemorySpace::Any, identity_index_map(2));
    let err = check_block_mapping(&windowed, false).unwrap_err();
    assert!(matches!(err, LoweringError::InvalidBlockSpec { .. }));
    Ok(())
}

#[test]
fn test_rank_mismatch_is_rejected() {
    let err = check_block_mapping(&vmem(&[8, 128], &[2, 8, 128]), false).unwrap_err();
    assert!(matches!(err, LoweringError::InvalidBlockSpec { .. }));

    let sems = block_mapping(&[8, 128], &[2, 8, 128], MemorySpace::Semaphore, identity_index_map(2));
    let err = check_block_mapping(&sems, false).unwrap_err();
    assert!(matches!(err, LoweringError::InvalidBlockSpec { .. }));
}

#[test]
fn test_invalid_specs_stop_module_lowering() {
    let block = [128, 50];
    let gm = grid_mapping(
        &[2, 2],
        vec![vmem(&block, &[256, 100]), vmem(&block, &[256, 100])],
        1,
    );
    let opts = KernelOptions {
        name: "ragged",
        ..KernelOptions::default()
    };
    let err = lower_jaxpr_to_module(&gm, &add_one_kernel(&block), &opts, &LoweringConfig::default())
        .unwrap_err();
    assert!(matches!(err, LoweringError::InvalidBlockSpec { .. }));
}
