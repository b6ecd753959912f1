//! Surface replacements applied once to freshly generated chunks.

use glam::IVec3;

use crate::chunk::Chunk;
use crate::voxel::{TerraformChunk, SECTION_SIZE};
use crate::block;


/// Replace every grass block of the chunk with dirt, keeping metadata. Sections that
/// only contain air are skipped. The chunk is marked dirty if anything changed, the
/// number of replaced blocks is returned.
pub fn replace_grass_with_dirt(chunk: &mut Chunk) -> usize {

    let mut count = 0;

    for sy in chunk.section_range() {

        if chunk.section_hint(sy).only_air {
            continue;
        }

        let min_y = sy * SECTION_SIZE;
        for y in min_y..min_y + SECTION_SIZE {
            for z in 0..SECTION_SIZE {
                for x in 0..SECTION_SIZE {
                    let pos = IVec3::new(x, y, z);
                    let (id, metadata) = chunk.block_and_metadata(pos);
                    if id == block::GRASS {
                        chunk.set_block_and_metadata(pos, block::DIRT, metadata);
                        count += 1;
                    }
                }
            }
        }

    }

    if count != 0 {
        chunk.set_dirty();
    }

    count

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn grass_becomes_dirt() {

        let mut chunk = Chunk::new();
        chunk.fill_block_and_metadata(IVec3::new(0, 62, 0), IVec3::new(16, 1, 16), block::GRASS, 0);
        chunk.set_block_and_metadata(IVec3::new(3, 63, 3), block::TALL_GRASS, 1);
        chunk.set_block_and_metadata(IVec3::new(4, -10, 4), block::GRASS, 0);

        assert_eq!(replace_grass_with_dirt(&mut chunk), 257);
        assert!(chunk.is_dirty());
        assert_eq!(chunk.block(IVec3::new(15, 62, 15)), block::DIRT);
        assert_eq!(chunk.block(IVec3::new(4, -10, 4)), block::DIRT);
        assert_eq!(chunk.block_and_metadata(IVec3::new(3, 63, 3)), (block::TALL_GRASS, 1));

    }

    #[test]
    fn nothing_to_replace() {
        let mut chunk = Chunk::new();
        chunk.set_block_and_metadata(IVec3::new(0, 0, 0), block::STONE, 0);
        assert_eq!(replace_grass_with_dirt(&mut chunk), 0);
        assert!(!chunk.is_dirty());
    }

}
