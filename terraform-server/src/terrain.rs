//! Deterministic terrain generator for the server's in-memory world.
//!
//! The terrain is a smooth height field with a sea level, so that lakes and oceans give
//! the water engine something to drain and basins something to fill. A few slabs and
//! fences are scattered on shores, waterlogged when under the sea.

use glam::IVec3;

use terraform::chunk::{Chunk, CHUNK_MIN_Y};
use terraform::block::{self, waterlog, fluid};


/// Sea level of the generated world, water sources are placed up to this level.
const SEA_LEVEL: i32 = 62;
/// Distance between two lattice points of the height noise.
const LATTICE: i32 = 32;


/// The terrain generator, entirely determined by its seed.
#[derive(Debug, Clone)]
pub struct TerrainGenerator {
    seed: i64,
}

impl TerrainGenerator {

    pub fn new(seed: i64) -> Self {
        Self { seed }
    }

    /// Generate the chunk at the given position.
    pub fn generate(&self, cx: i32, cz: i32) -> Box<Chunk> {
        let mut chunk = Chunk::new();
        self.gen_terrain(cx, cz, &mut chunk);
        self.gen_surface(cx, cz, &mut chunk);
        chunk
    }

    /// Internal function to hash a lattice or block position with the seed, the result
    /// is uniformly distributed over the whole `u64` range.
    fn hash(&self, x: i32, z: i32, salt: u64) -> u64 {
        let mut h = (self.seed as u64) ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        h ^= (x as u32 as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        h = h.rotate_left(31) ^ (z as u32 as u64).wrapping_mul(0x1656_67B1_9E37_79F9);
        // Final mix from splitmix64.
        h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        h ^ (h >> 31)
    }

    /// Return a value between 0 and 1 for the given lattice point.
    fn lattice_value(&self, lx: i32, lz: i32) -> f64 {
        (self.hash(lx, lz, 1) >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Return the surface height of the given block column.
    fn height(&self, x: i32, z: i32) -> i32 {

        let lx = x.div_euclid(LATTICE);
        let lz = z.div_euclid(LATTICE);
        let fx = x.rem_euclid(LATTICE) as f64 / LATTICE as f64;
        let fz = z.rem_euclid(LATTICE) as f64 / LATTICE as f64;

        // Smoothstep interpolation between the four lattice corners.
        let sx = fx * fx * (3.0 - 2.0 * fx);
        let sz = fz * fz * (3.0 - 2.0 * fz);

        let v00 = self.lattice_value(lx, lz);
        let v10 = self.lattice_value(lx + 1, lz);
        let v01 = self.lattice_value(lx, lz + 1);
        let v11 = self.lattice_value(lx + 1, lz + 1);

        let v0 = v00 + (v10 - v00) * sx;
        let v1 = v01 + (v11 - v01) * sx;
        let v = v0 + (v1 - v0) * sz;

        // Heights between 40 and 88, so about half of the world is under the sea.
        40 + (v * 48.0) as i32

    }

    fn gen_terrain(&self, cx: i32, cz: i32, chunk: &mut Chunk) {

        for z in 0..16 {
            for x in 0..16 {

                let height = self.height(cx * 16 + x, cz * 16 + z);
                let column = IVec3::new(x, CHUNK_MIN_Y, z);

                chunk.set_block_and_metadata(column, block::BEDROCK, 0);
                chunk.fill_block_and_metadata(column + IVec3::Y, IVec3::new(1, height - CHUNK_MIN_Y - 1, 1), block::STONE, 0);

                if height < SEA_LEVEL {
                    chunk.fill_block_and_metadata(IVec3::new(x, height + 1, z), IVec3::new(1, SEA_LEVEL - height, 1), block::WATER_STILL, 0);
                }

            }
        }

    }

    fn gen_surface(&self, cx: i32, cz: i32, chunk: &mut Chunk) {

        for z in 0..16 {
            for x in 0..16 {

                let (bx, bz) = (cx * 16 + x, cz * 16 + z);
                let height = self.height(bx, bz);
                let rand = self.hash(bx, bz, 2);

                let top = IVec3::new(x, height, z);
                let thickness = 3 + (rand % 2) as i32;

                let (top_id, filler_id) = if height <= SEA_LEVEL + 1 {
                    (block::SAND, block::SAND)
                } else {
                    (block::GRASS, block::DIRT)
                };

                chunk.set_block_and_metadata(top, top_id, 0);
                for dy in 1..thickness {
                    chunk.set_block_and_metadata(top - IVec3::Y * dy, filler_id, 0);
                }

                // Decorations on top of the surface.
                let above = top + IVec3::Y;
                match (rand >> 8) % 64 {
                    0 | 1 => {
                        let mut metadata = (rand >> 16) as u8 & 0b1;
                        waterlog::set_waterlogged(&mut metadata, height < SEA_LEVEL);
                        chunk.set_block_and_metadata(above, block::SLAB, metadata);
                    }
                    2 => {
                        let mut metadata = 0;
                        waterlog::set_waterlogged(&mut metadata, height < SEA_LEVEL);
                        chunk.set_block_and_metadata(above, block::FENCE, metadata);
                    }
                    3 if height >= SEA_LEVEL => {
                        // A small spring with its flowing water around.
                        chunk.set_block_and_metadata(above, block::WATER_STILL, 0);
                        let mut metadata = 0;
                        fluid::set_distance(&mut metadata, 1);
                        for dir in [IVec3::X, IVec3::NEG_X, IVec3::Z, IVec3::NEG_Z] {
                            let pos = above + dir;
                            if (0..16).contains(&pos.x) && (0..16).contains(&pos.z) && chunk.block(pos) == block::AIR {
                                chunk.set_block_and_metadata(pos, block::WATER_MOVING, metadata);
                            }
                        }
                    }
                    4..=7 if height > SEA_LEVEL => {
                        chunk.set_block_and_metadata(above, block::TALL_GRASS, 1);
                    }
                    _ => {}
                }

            }
        }

    }

}
