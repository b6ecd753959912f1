//! Waterlogged state of the blocks that can hold water inside their own volume.
//!
//! The waterlogged flag is stored in the highest metadata bit, the three lower bits
//! stay available to the block itself (slab half, stair or ladder facing...).

use crate::block;


const WATERLOGGED: u8 = 0b1000;


/// Return true if the given block can be waterlogged.
#[inline]
pub fn is_waterloggable(id: u8) -> bool {
    matches!(id,
        block::SLAB |
        block::WOOD_STAIR |
        block::COBBLESTONE_STAIR |
        block::CHEST |
        block::LADDER |
        block::FENCE |
        block::GLASS_PANE)
}

#[inline]
pub fn is_waterlogged(metadata: u8) -> bool {
    metadata & WATERLOGGED != 0
}

#[inline]
pub fn set_waterlogged(metadata: &mut u8, waterlogged: bool) {
    *metadata &= !WATERLOGGED;
    *metadata |= (waterlogged as u8) << 3;
}
