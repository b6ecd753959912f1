//! The voxel access boundary between the water engine and the host world.
//!
//! The host decides once, at this boundary, which category each of its voxels belongs
//! to, the engine only ever reads and writes these plain categories.

use std::ops::Range;

use glam::{IVec3, DVec3};


/// Size of a chunk section in every axis.
pub const SECTION_SIZE: i32 = 16;


/// Closed enumeration of the voxel categories the water engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voxel {
    /// Empty voxel.
    Air,
    /// A full water source.
    WaterSource,
    /// Water that is not a full source, partial or falling.
    WaterFlowing,
    /// A non-fluid block that can hold water in its own volume. Writing this category
    /// keeps the host block and only changes its waterlogged flag.
    Waterloggable {
        waterlogged: bool,
    },
    /// Any other block, the engine never touches it.
    Solid,
}

impl Voxel {

    /// Return true if this voxel is any kind of water or holds water.
    #[inline]
    pub fn has_water(self) -> bool {
        matches!(self, Voxel::WaterSource | Voxel::WaterFlowing | Voxel::Waterloggable { waterlogged: true })
    }

    /// Return the voxel this one should be replaced with to be drained, if it needs to.
    #[inline]
    pub fn drained(self) -> Option<Voxel> {
        match self {
            Voxel::WaterSource | Voxel::WaterFlowing => Some(Voxel::Air),
            Voxel::Waterloggable { waterlogged: true } => Some(Voxel::Waterloggable { waterlogged: false }),
            _ => None,
        }
    }

    /// Return the voxel this one should be replaced with to be filled, if it needs to.
    #[inline]
    pub fn filled(self) -> Option<Voxel> {
        match self {
            Voxel::Air | Voxel::WaterFlowing => Some(Voxel::WaterSource),
            _ => None,
        }
    }

}


/// Conservative summary of a section content, used to skip whole sections. Every
/// `maybe_` flag may be a false positive but never a false negative, `only_air` must
/// only be true when the section provably contains nothing else than air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHint {
    /// The section only contains air.
    pub only_air: bool,
    /// The section may contain air.
    pub maybe_air: bool,
    /// The section may contain water or waterlogged blocks.
    pub maybe_water: bool,
    /// The section may contain flowing water.
    pub maybe_flowing: bool,
}

impl SectionHint {

    /// A hint that allows no shortcut at all.
    pub const UNKNOWN: Self = Self {
        only_air: false,
        maybe_air: true,
        maybe_water: true,
        maybe_flowing: true,
    };

    /// The hint of a section that only contains air.
    pub const AIR: Self = Self {
        only_air: true,
        maybe_air: true,
        maybe_water: false,
        maybe_flowing: false,
    };

}


/// A loaded chunk handle, as seen by the water engine. Positions given to this trait
/// are chunk-local on X and Z (0..16) and absolute on Y.
pub trait TerraformChunk {

    /// The range of section Y coordinates of this chunk, the section `sy` covers the
    /// blocks `sy * 16..sy * 16 + 16`.
    fn section_range(&self) -> Range<i32>;

    /// Return a conservative summary of the given section's content.
    fn section_hint(&self, sy: i32) -> SectionHint {
        let _ = sy;
        SectionHint::UNKNOWN
    }

    /// Read the voxel category at the given position.
    fn get_voxel(&self, pos: IVec3) -> Voxel;

    /// Raw write of a voxel category at the given position, the host must not notify
    /// neighbors nor schedule any update, only record the change for synchronization.
    fn set_voxel(&mut self, pos: IVec3, voxel: Voxel);

    /// Bulk write of a whole section, this is used when a section is known to only
    /// contain air and should be filled. The default implementation writes voxels one
    /// by one.
    fn fill_section(&mut self, sy: i32, voxel: Voxel) {
        let min_y = sy * SECTION_SIZE;
        for y in min_y..min_y + SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                for z in 0..SECTION_SIZE {
                    self.set_voxel(IVec3::new(x, y, z), voxel);
                }
            }
        }
    }

    /// Mark this chunk as modified so that the host saves it.
    fn set_dirty(&mut self);

}


/// The host world as seen by the water engine.
pub trait TerraformWorld {

    /// The chunk handle type.
    type Chunk: TerraformChunk;

    /// Return true if the chunk is currently resident.
    fn is_chunk_loaded(&self, cx: i32, cz: i32) -> bool;

    /// Get a mutable handle to a resident chunk, this must never block waiting for the
    /// chunk to load and return none instead.
    fn get_chunk_mut(&mut self, cx: i32, cz: i32) -> Option<&mut Self::Chunk>;

    /// Iterate over the world position of every active observer.
    fn iter_observers(&self) -> impl Iterator<Item = DVec3> + '_;

}
