//! A chunk storing blocks in vertical sections, optimized for runtime performance, and
//! the chunk key packing used to identify chunks.

use std::ops::Range;

use glam::{IVec3, DVec3};

use crate::voxel::{TerraformChunk, Voxel, SectionHint, SECTION_SIZE};
use crate::block::{self, fluid, waterlog};


/// Chunk size in both X and Z coordinates.
pub const CHUNK_WIDTH: usize = 16;
/// Lowest block Y coordinate of a chunk (inclusive).
pub const CHUNK_MIN_Y: i32 = -64;
/// Highest block Y coordinate of a chunk (exclusive).
pub const CHUNK_MAX_Y: i32 = 320;
/// Section Y coordinate of the lowest section.
pub const CHUNK_MIN_SECTION: i32 = CHUNK_MIN_Y >> 4;
/// Number of sections in a chunk.
pub const CHUNK_SECTION_COUNT: usize = ((CHUNK_MAX_Y - CHUNK_MIN_Y) / SECTION_SIZE) as usize;
/// Internal section size, in number of elements per section.
const SECTION_LEN: usize = 16 * 16 * 16;


/// Pack chunk coordinates into a chunk key, X in the low 32 bits and Z in the high
/// 32 bits.
#[inline]
pub const fn chunk_key(cx: i32, cz: i32) -> i64 {
    (cx as u32 as i64) | ((cz as u32 as i64) << 32)
}

/// Unpack a chunk key into its chunk coordinates.
#[inline]
pub const fn chunk_key_pos(key: i64) -> (i32, i32) {
    (key as i32, (key >> 32) as i32)
}

/// Calculate the chunk position corresponding to the given block position. The Y
/// coordinate is ignored, so it may be invalid.
#[inline]
pub fn calc_chunk_pos_unchecked(pos: IVec3) -> (i32, i32) {
    (pos.x >> 4, pos.z >> 4)
}

/// Calculate the chunk position corresponding to the given block position. This returns
/// no position if the Y coordinate is invalid.
#[inline]
pub fn calc_chunk_pos(pos: IVec3) -> Option<(i32, i32)> {
    if pos.y < CHUNK_MIN_Y || pos.y >= CHUNK_MAX_Y {
        None
    } else {
        Some(calc_chunk_pos_unchecked(pos))
    }
}

/// Calculate the chunk position where an observer at the given position stands.
#[inline]
pub fn calc_entity_chunk_pos(pos: DVec3) -> (i32, i32) {
    // NOTE: Using unchecked because observers don't have limit for Y value.
    calc_chunk_pos_unchecked(pos.floor().as_ivec3())
}

/// Calculate the index in the section's arrays for the given position. Only the four
/// lowest bits of each component are used, the layout is `yyyy zzzz xxxx`.
#[inline]
fn calc_index(pos: IVec3) -> usize {
    let x = pos.x as u32 & 0b1111;
    let z = pos.z as u32 & 0b1111;
    let y = pos.y as u32 & 0b1111;
    ((y << 8) | (z << 4) | x) as usize
}


/// Data structure storing every chunk-local data, chunks are a world subdivision of
/// 16x16 columns of blocks between [`CHUNK_MIN_Y`] and [`CHUNK_MAX_Y`].
pub struct Chunk {
    /// Sections from the lowest to the highest, a missing section only contains air.
    sections: [Option<Box<ChunkSection>>; CHUNK_SECTION_COUNT],
    /// Set when the chunk has been modified since last saved.
    dirty: bool,
    /// Number of blocks changed since the counter was last taken.
    changes: u32,
}

/// A 16x16x16 section of a chunk, with block counters maintained on every change so
/// that the section content can be summarized without scanning it.
#[derive(Clone)]
struct ChunkSection {
    /// The numeric identifier of the block.
    block: [u8; SECTION_LEN],
    /// Four byte metadata for each block.
    metadata: SectionNibbleArray,
    /// Number of blocks that are not air.
    non_air_count: u16,
    /// Number of water blocks and waterlogged blocks.
    water_count: u16,
    /// Number of water blocks that are not sources.
    flowing_count: u16,
}

impl Chunk {

    /// Create a new empty chunk, full of air blocks.
    pub fn new() -> Box<Self> {
        Box::new(Self {
            sections: std::array::from_fn(|_| None),
            dirty: false,
            changes: 0,
        })
    }

    /// Internal function to get the array index of a section from its section Y.
    #[inline]
    fn section_index(sy: i32) -> Option<usize> {
        usize::try_from(sy - CHUNK_MIN_SECTION).ok()
            .filter(|&index| index < CHUNK_SECTION_COUNT)
    }

    #[inline]
    fn section(&self, y: i32) -> Option<&ChunkSection> {
        self.sections[Self::section_index(y >> 4)?].as_deref()
    }

    /// Get block id and metadata at the given position, X and Z are rebased to
    /// chunk-local and Y is absolute. Positions outside of the chunk height are air.
    #[inline]
    pub fn block_and_metadata(&self, pos: IVec3) -> (u8, u8) {
        match self.section(pos.y) {
            Some(section) => {
                let index = calc_index(pos);
                (section.block[index], section.metadata.get(index))
            }
            None => (block::AIR, 0),
        }
    }

    /// Get block id at the given position.
    #[inline]
    pub fn block(&self, pos: IVec3) -> u8 {
        self.block_and_metadata(pos).0
    }

    /// Get block metadata at the given position.
    #[inline]
    pub fn metadata(&self, pos: IVec3) -> u8 {
        self.block_and_metadata(pos).1
    }

    /// Set block id and metadata at the given position, X and Z are rebased to
    /// chunk-local and Y is absolute. Positions outside of the chunk height are ignored.
    /// This doesn't mark the chunk dirty.
    pub fn set_block_and_metadata(&mut self, pos: IVec3, id: u8, metadata: u8) {

        let Some(section_index) = Self::section_index(pos.y >> 4) else { return };
        let slot = &mut self.sections[section_index];

        if slot.is_none() {
            if id == block::AIR {
                return;
            }
            *slot = Some(ChunkSection::new_air());
        }

        let Some(section) = slot.as_deref_mut() else { return };
        if section.set(calc_index(pos), id, metadata) {
            self.changes = self.changes.wrapping_add(1);
        }

        if section.non_air_count == 0 {
            *slot = None;
        }

    }

    /// Fill the given chunk area with given block id and metadata.
    pub fn fill_block_and_metadata(&mut self,
        start: IVec3,
        size: IVec3,
        id: u8, metadata: u8
    ) {
        for y in start.y..start.y + size.y {
            for z in start.z..start.z + size.z {
                for x in start.x..start.x + size.x {
                    self.set_block_and_metadata(IVec3::new(x, y, z), id, metadata);
                }
            }
        }
    }

    /// Return true if the chunk has been modified since last saved.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning its previous value.
    #[inline]
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Take the number of block changes since this was last called.
    #[inline]
    pub fn take_changes(&mut self) -> u32 {
        std::mem::take(&mut self.changes)
    }

    /// Return the number of sections actually storing blocks.
    pub fn allocated_section_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_some()).count()
    }

}

impl TerraformChunk for Chunk {

    #[inline]
    fn section_range(&self) -> Range<i32> {
        CHUNK_MIN_SECTION..CHUNK_MIN_SECTION + CHUNK_SECTION_COUNT as i32
    }

    fn section_hint(&self, sy: i32) -> SectionHint {
        let Some(index) = Self::section_index(sy) else {
            return SectionHint::AIR;
        };
        match self.sections[index].as_deref() {
            None => SectionHint::AIR,
            Some(section) => SectionHint {
                only_air: section.non_air_count == 0,
                maybe_air: (section.non_air_count as usize) < SECTION_LEN,
                maybe_water: section.water_count != 0,
                maybe_flowing: section.flowing_count != 0,
            },
        }
    }

    #[inline]
    fn get_voxel(&self, pos: IVec3) -> Voxel {
        let (id, metadata) = self.block_and_metadata(pos);
        block::classify(id, metadata)
    }

    fn set_voxel(&mut self, pos: IVec3, voxel: Voxel) {
        match voxel {
            Voxel::Air => self.set_block_and_metadata(pos, block::AIR, 0),
            Voxel::WaterSource => self.set_block_and_metadata(pos, block::WATER_STILL, 0),
            Voxel::WaterFlowing => {
                let mut metadata = 0;
                fluid::set_distance(&mut metadata, 1);
                self.set_block_and_metadata(pos, block::WATER_MOVING, metadata);
            }
            Voxel::Waterloggable { waterlogged } => {
                let (id, mut metadata) = self.block_and_metadata(pos);
                if waterlog::is_waterloggable(id) {
                    waterlog::set_waterlogged(&mut metadata, waterlogged);
                    self.set_block_and_metadata(pos, id, metadata);
                }
            }
            // There is no block to pick for a generic solid voxel.
            Voxel::Solid => {}
        }
    }

    fn fill_section(&mut self, sy: i32, voxel: Voxel) {

        let (id, metadata) = match voxel {
            Voxel::Air => (block::AIR, 0),
            Voxel::WaterSource => (block::WATER_STILL, 0),
            _ => {
                // Other categories depend on the previous block, go one by one.
                let min_y = sy * SECTION_SIZE;
                for y in min_y..min_y + SECTION_SIZE {
                    for z in 0..SECTION_SIZE {
                        for x in 0..SECTION_SIZE {
                            self.set_voxel(IVec3::new(x, y, z), voxel);
                        }
                    }
                }
                return;
            }
        };

        let Some(index) = Self::section_index(sy) else { return };
        let slot = &mut self.sections[index];

        let changed = if id == block::AIR {
            slot.take().map_or(0, |section| section.non_air_count as u32)
        } else {
            let section = ChunkSection::new_filled(id, metadata);
            let changed = match slot.as_deref() {
                Some(prev) => prev.block.iter().zip(prev.metadata.iter())
                    .filter(|&(&prev_id, prev_metadata)| (prev_id, prev_metadata) != (id, metadata))
                    .count() as u32,
                None => SECTION_LEN as u32,
            };
            *slot = Some(section);
            changed
        };

        self.changes = self.changes.wrapping_add(changed);

    }

    #[inline]
    fn set_dirty(&mut self) {
        self.dirty = true;
    }

}

impl ChunkSection {

    fn new_air() -> Box<Self> {
        Box::new(Self {
            block: [block::AIR; SECTION_LEN],
            metadata: SectionNibbleArray::new(0),
            non_air_count: 0,
            water_count: 0,
            flowing_count: 0,
        })
    }

    fn new_filled(id: u8, metadata: u8) -> Box<Self> {
        let mut section = Self::new_air();
        section.block = [id; SECTION_LEN];
        section.metadata = SectionNibbleArray::new(metadata);
        let (non_air, water, flowing) = Self::counters_of(id, metadata);
        section.non_air_count = non_air as u16 * SECTION_LEN as u16;
        section.water_count = water as u16 * SECTION_LEN as u16;
        section.flowing_count = flowing as u16 * SECTION_LEN as u16;
        section
    }

    /// Return the counters a block contributes to: non air, water, flowing.
    #[inline]
    fn counters_of(id: u8, metadata: u8) -> (bool, bool, bool) {
        match block::classify(id, metadata) {
            Voxel::Air => (false, false, false),
            Voxel::WaterSource => (true, true, false),
            Voxel::WaterFlowing => (true, true, true),
            Voxel::Waterloggable { waterlogged } => (true, waterlogged, false),
            Voxel::Solid => (true, false, false),
        }
    }

    /// Set a block and update counters, return true if the block actually changed.
    fn set(&mut self, index: usize, id: u8, metadata: u8) -> bool {

        let prev_id = self.block[index];
        let prev_metadata = self.metadata.get(index);
        if (prev_id, prev_metadata) == (id, metadata) {
            return false;
        }

        let (prev_non_air, prev_water, prev_flowing) = Self::counters_of(prev_id, prev_metadata);
        let (non_air, water, flowing) = Self::counters_of(id, metadata);

        self.non_air_count = self.non_air_count - prev_non_air as u16 + non_air as u16;
        self.water_count = self.water_count - prev_water as u16 + water as u16;
        self.flowing_count = self.flowing_count - prev_flowing as u16 + flowing as u16;

        self.block[index] = id;
        self.metadata.set(index, metadata);
        true

    }

}

/// Special arrays for sections that stores `u4 * SECTION_LEN` values.
#[derive(Clone)]
struct SectionNibbleArray {
    inner: [u8; SECTION_LEN / 2]
}

impl SectionNibbleArray {

    const fn new(init: u8) -> Self {
        debug_assert!(init <= 0x0F);
        let init = init << 4 | init;
        Self { inner: [init; SECTION_LEN / 2] }
    }

    #[inline]
    fn get(&self, index: usize) -> u8 {
        let slot = self.inner[index >> 1];
        if index & 1 == 0 {
            slot & 0x0F
        } else {
            (slot & 0xF0) >> 4
        }
    }

    #[inline]
    fn set(&mut self, index: usize, value: u8) {
        debug_assert!(value <= 0x0F);
        let slot = &mut self.inner[index >> 1];
        if index & 1 == 0 {
            *slot = (*slot & 0xF0) | value;
        } else {
            *slot = (*slot & 0x0F) | (value << 4);
        }
    }

    fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.inner.iter().flat_map(|&slot| [slot & 0x0F, (slot & 0xF0) >> 4])
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn chunk_keys() {
        for &(cx, cz) in &[(0, 0), (1, 0), (0, 1), (-1, -1), (i32::MAX, i32::MIN), (-30_000, 12)] {
            assert_eq!(chunk_key_pos(chunk_key(cx, cz)), (cx, cz));
        }
        assert_eq!(chunk_key(1, 0), 1);
        assert_eq!(chunk_key(0, 1), 1 << 32);
        assert_eq!(chunk_key(-1, 0), 0xFFFF_FFFF);
        assert_ne!(chunk_key(-1, 0), chunk_key(0, -1));
    }

    #[test]
    fn chunk_positions() {
        assert_eq!(calc_chunk_pos(IVec3::new(17, 0, -1)), Some((1, -1)));
        assert_eq!(calc_chunk_pos(IVec3::new(0, -65, 0)), None);
        assert_eq!(calc_chunk_pos(IVec3::new(0, 320, 0)), None);
        assert_eq!(calc_entity_chunk_pos(DVec3::new(-0.5, 1000.0, 31.9)), (-1, 1));
    }

    #[test]
    fn sections_allocate_lazily() {

        let mut chunk = Chunk::new();
        assert_eq!(chunk.allocated_section_count(), 0);
        assert_eq!(chunk.section_hint(-4), SectionHint::AIR);

        let pos = IVec3::new(3, -60, 7);
        chunk.set_block_and_metadata(pos, block::STONE, 0);
        assert_eq!(chunk.allocated_section_count(), 1);
        assert_eq!(chunk.block(pos), block::STONE);
        assert_eq!(chunk.take_changes(), 1);

        chunk.set_block_and_metadata(pos, block::AIR, 0);
        assert_eq!(chunk.allocated_section_count(), 0);
        assert_eq!(chunk.take_changes(), 1);

        // Setting air in an absent section is not a change.
        chunk.set_block_and_metadata(pos, block::AIR, 0);
        assert_eq!(chunk.take_changes(), 0);

    }

    #[test]
    fn change_counter_wraps() {
        let mut chunk = Chunk::new();
        chunk.changes = u32::MAX;
        chunk.set_block_and_metadata(IVec3::new(0, 0, 0), block::STONE, 0);
        assert_eq!(chunk.take_changes(), 0);
        chunk.changes = u32::MAX;
        chunk.fill_section(0, Voxel::WaterSource);
        assert_eq!(chunk.take_changes(), 4095);
    }

    #[test]
    fn out_of_height_is_ignored() {
        let mut chunk = Chunk::new();
        chunk.set_block_and_metadata(IVec3::new(0, 320, 0), block::STONE, 0);
        chunk.set_block_and_metadata(IVec3::new(0, -65, 0), block::STONE, 0);
        assert_eq!(chunk.allocated_section_count(), 0);
        assert_eq!(chunk.get_voxel(IVec3::new(0, 400, 0)), Voxel::Air);
    }

    #[test]
    fn section_hint_counters() {

        let mut chunk = Chunk::new();
        chunk.set_block_and_metadata(IVec3::new(0, 0, 0), block::STONE, 0);

        let hint = chunk.section_hint(0);
        assert!(!hint.only_air && hint.maybe_air && !hint.maybe_water && !hint.maybe_flowing);

        chunk.set_block_and_metadata(IVec3::new(1, 0, 0), block::WATER_MOVING, 2);
        let hint = chunk.section_hint(0);
        assert!(hint.maybe_water && hint.maybe_flowing);

        // Turning the flowing water into a source keeps water but not flowing.
        chunk.set_voxel(IVec3::new(1, 0, 0), Voxel::WaterSource);
        let hint = chunk.section_hint(0);
        assert!(hint.maybe_water && !hint.maybe_flowing);

        chunk.set_block_and_metadata(IVec3::new(2, 0, 0), block::SLAB, 0b1001);
        chunk.set_voxel(IVec3::new(1, 0, 0), Voxel::Air);
        assert!(chunk.section_hint(0).maybe_water);
        chunk.set_voxel(IVec3::new(2, 0, 0), Voxel::Waterloggable { waterlogged: false });
        assert!(!chunk.section_hint(0).maybe_water);
        // The slab keeps its lower metadata bits.
        assert_eq!(chunk.block_and_metadata(IVec3::new(2, 0, 0)), (block::SLAB, 0b0001));

    }

    #[test]
    fn waterlogging_non_waterloggable_is_ignored() {
        let mut chunk = Chunk::new();
        let pos = IVec3::new(0, 0, 0);
        chunk.set_block_and_metadata(pos, block::STONE, 0);
        chunk.take_changes();
        chunk.set_voxel(pos, Voxel::Waterloggable { waterlogged: true });
        chunk.set_voxel(pos, Voxel::Solid);
        assert_eq!(chunk.block_and_metadata(pos), (block::STONE, 0));
        assert_eq!(chunk.take_changes(), 0);
    }

    #[test]
    fn bulk_fill_section() {

        let mut chunk = Chunk::new();
        chunk.fill_section(-4, Voxel::WaterSource);
        assert_eq!(chunk.take_changes(), 4096);
        let hint = chunk.section_hint(-4);
        assert!(!hint.maybe_air && hint.maybe_water && !hint.maybe_flowing);
        assert_eq!(chunk.get_voxel(IVec3::new(15, -49, 15)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(0, -48, 0)), Voxel::Air);

        // Filling again changes nothing.
        chunk.fill_section(-4, Voxel::WaterSource);
        assert_eq!(chunk.take_changes(), 0);

        chunk.fill_section(-4, Voxel::Air);
        assert_eq!(chunk.take_changes(), 4096);
        assert_eq!(chunk.allocated_section_count(), 0);

    }

    #[test]
    fn fill_area() {
        let mut chunk = Chunk::new();
        chunk.fill_block_and_metadata(IVec3::new(0, -64, 0), IVec3::new(16, 4, 16), block::BEDROCK, 0);
        assert_eq!(chunk.take_changes(), 16 * 16 * 4);
        assert_eq!(chunk.block(IVec3::new(9, -61, 9)), block::BEDROCK);
        assert_eq!(chunk.block(IVec3::new(9, -60, 9)), block::AIR);
        assert!(!chunk.is_dirty());
    }

}
