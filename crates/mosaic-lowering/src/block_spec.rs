//! Static checks on block mappings.
//!
//! The target tiles the last two dimensions of a block by (8, 128). A block
//! whose trailing dimensions are neither tile multiples nor the full array
//! extent cannot be windowed and is rejected before any IR is emitted.

use mosaic_jaxpr::{BlockMapping, GridMapping, MemorySpace};

use crate::error::LoweringError;

const LANES: usize = 128;
const SUBLANES: usize = 8;

fn invalid(bm: &BlockMapping, message: &str) -> LoweringError {
    let list = |items: Vec<String>| format!("({})", items.join(", "));
    LoweringError::InvalidBlockSpec {
        message: message.to_string(),
        origin: if bm.origin.is_empty() {
            "an operand".to_string()
        } else {
            bm.origin.clone()
        },
        block_shape: list(bm.block_shape.iter().map(|b| b.to_string()).collect()),
        array_shape: list(bm.array_shape.iter().map(|d| d.to_string()).collect()),
        index_map_outputs: list(
            bm.index_map_jaxpr
                .outvars
                .iter()
                .map(|o| o.to_string())
                .collect(),
        ),
        memory_space: bm
            .memory_space()
            .map_or_else(|| "None".to_string(), |s| s.to_string()),
    }
}

/// Validates one block mapping.
pub fn check_block_mapping(bm: &BlockMapping, forward_compat: bool) -> Result<(), LoweringError> {
    let space = bm.memory_space();
    if space == Some(MemorySpace::Smem) && bm.has_trivial_window() {
        return Ok(());
    }
    let rank = bm.block_shape.len();
    let min_rank = if forward_compat { 2 } else { 1 };
    if rank < min_rank {
        return Err(invalid(
            bm,
            &format!(
                "The Pallas TPU lowering currently supports only blocks of rank >= {}.",
                min_rank
            ),
        ));
    }
    if space == Some(MemorySpace::Any) && !bm.has_trivial_window() {
        return Err(invalid(
            bm,
            "The Pallas TPU lowering currently supports in memory space ANY only blocks \
             having the same block shape as the array shape and a trivial index_map \
             (returning all 0s).",
        ));
    }
    if bm.array_shape.len() != rank {
        return Err(invalid(bm, "Block shape and array shape have different ranks."));
    }

    let bs0 = bm.block_shape[rank - 1].size();
    let as0 = bm.array_shape[rank - 1];
    if rank >= 2 {
        let bs1 = bm.block_shape[rank - 2].size();
        let as1 = bm.array_shape[rank - 2];
        let divisible = if forward_compat {
            (bs0 % LANES == 0 || (bs0 == as0 && as0 < LANES))
                && (bs1 % SUBLANES == 0 || (bs1 == as1 && as1 < SUBLANES))
        } else {
            (bs0 == as0 || bs0 % LANES == 0) && (bs1 == as1 || bs1 % SUBLANES == 0)
        };
        if !divisible {
            return Err(invalid(
                bm,
                "The Pallas TPU lowering currently requires that the last two dimensions \
                 of your block shape are divisible by 8 and 128 respectively, or be equal \
                 to the respective dimensions of the overall array.",
            ));
        }
    } else {
        let bits = bm.array_dtype.bit_width().unwrap_or(32).min(32) as usize;
        let tiling = LANES * (32 / bits.max(1));
        if !(bs0 == as0 || bs0 % tiling == 0) {
            return Err(invalid(
                bm,
                &format!(
                    "The Pallas TPU lowering currently requires that rank 1 block shapes, \
                     either 1) the first (and only) dimension of the block shape is equal \
                     to the first (and only) dimension of the array shape, or 2) the first \
                     (and only) dimension of the block shape is a multiple of the tiling \
                     size ({}) of the array shape.",
                    tiling
                ),
            ));
        }
    }
    Ok(())
}

/// Validates every block mapping of a grid, stopping at the first failure.
pub fn check_block_mappings(
    grid_mapping: &GridMapping,
    forward_compat: bool,
) -> Result<(), LoweringError> {
    for bm in &grid_mapping.block_mappings {
        check_block_mapping(bm, forward_compat)?;
    }
    Ok(())
}
