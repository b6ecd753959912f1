//! Resumable per-chunk section scan, draining water above the level and filling up to it.

use glam::IVec3;

use crate::voxel::{TerraformChunk, Voxel, SECTION_SIZE};

use super::queue::{ChunkWork, TaskScope};


/// A ring-only scan reads 60 of the 256 columns of a section, so this many ring
/// sections are charged as a single section of budget.
const RING_SECTIONS_PER_BUDGET: usize = 4;

/// Counters returned by a single reconcile call on a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Number of voxels drained of their water.
    pub drained: usize,
    /// Number of voxels filled with a water source.
    pub filled: usize,
    /// Number of sections visited by this call, including skipped ones.
    pub sections_visited: usize,
    /// True when the cursor has reached the top of the chunk.
    pub complete: bool,
}

/// Reconcile the given chunk against the water level, at most `budget` sections are
/// visited, starting at the work's cursor which is then advanced. A cleanup work only
/// scans the boundary ring and visits up to 4 times more sections for the same budget. Voxels strictly above
/// the level are drained and voxels at or below it are filled, solid voxels are never
/// touched. The chunk is marked dirty once if at least one voxel changed.
pub fn reconcile<C: TerraformChunk>(
    chunk: &mut C,
    level: i32,
    work: &mut ChunkWork,
    budget: usize,
) -> ReconcileReport {

    let range = chunk.section_range();
    let section_count = range.len() as u32;
    let ring_only = work.scope == TaskScope::Cleanup;

    let budget = if ring_only {
        budget.saturating_mul(RING_SECTIONS_PER_BUDGET)
    } else {
        budget
    };

    let mut report = ReconcileReport::default();

    while work.cursor < section_count && report.sections_visited < budget {

        let sy = range.start + work.cursor as i32;
        let min_y = sy * SECTION_SIZE;
        let max_y = min_y + SECTION_SIZE - 1;
        let hint = chunk.section_hint(sy);

        // Drain rows strictly above the level.
        let drain_min_y = min_y.max(level.saturating_add(1));
        if drain_min_y <= max_y && !hint.only_air && hint.maybe_water {
            report.drained += scan_rows(chunk, drain_min_y, max_y, ring_only, Voxel::drained);
        }

        // Fill rows at or below the level.
        let fill_max_y = max_y.min(level);
        if min_y <= fill_max_y && (hint.maybe_air || hint.maybe_flowing) {
            if !ring_only && fill_max_y == max_y && hint.only_air {
                chunk.fill_section(sy, Voxel::WaterSource);
                report.filled += (SECTION_SIZE * SECTION_SIZE * SECTION_SIZE) as usize;
            } else {
                report.filled += scan_rows(chunk, min_y, fill_max_y, ring_only, Voxel::filled);
            }
        }

        work.cursor += 1;
        report.sections_visited += 1;

    }

    report.complete = work.cursor >= section_count;

    if report.drained != 0 || report.filled != 0 {
        chunk.set_dirty();
    }

    report

}

/// Apply the given replacement function to every voxel of the rows between both Y
/// coordinates (inclusive), return the number of voxels replaced.
fn scan_rows<C: TerraformChunk>(
    chunk: &mut C,
    min_y: i32,
    max_y: i32,
    ring_only: bool,
    replace: fn(Voxel) -> Option<Voxel>,
) -> usize {

    let mut count = 0;

    for y in min_y..=max_y {
        for z in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {

                if ring_only && !is_ring_column(x, z) {
                    continue;
                }

                let pos = IVec3::new(x, y, z);
                if let Some(new_voxel) = replace(chunk.get_voxel(pos)) {
                    chunk.set_voxel(pos, new_voxel);
                    count += 1;
                }

            }
        }
    }

    count

}

/// Return true if the local column is on the chunk's boundary ring.
#[inline]
pub fn is_ring_column(x: i32, z: i32) -> bool {
    x == 0 || x == SECTION_SIZE - 1 || z == 0 || z == SECTION_SIZE - 1
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::block;
    use crate::chunk::{Chunk, chunk_key, CHUNK_SECTION_COUNT};
    use crate::water::queue::ChunkQueue;

    fn full_work() -> ChunkWork {
        let mut queue = ChunkQueue::new();
        queue.track_loaded(chunk_key(0, 0));
        queue.ensure_task(chunk_key(0, 0), TaskScope::Full);
        queue.finish(chunk_key(0, 0)).unwrap()
    }

    fn cleanup_work() -> ChunkWork {
        let mut work = full_work();
        work.scope = TaskScope::Cleanup;
        work
    }

    fn reconcile_all(chunk: &mut Chunk, level: i32, mut work: ChunkWork) -> ReconcileReport {
        reconcile(chunk, level, &mut work, usize::MAX)
    }

    /// A chunk with a stone floor from -64 to -61.
    fn floor_chunk() -> Box<Chunk> {
        let mut chunk = Chunk::new();
        chunk.fill_block_and_metadata(IVec3::new(0, -64, 0), IVec3::new(16, 4, 16), block::STONE, 0);
        chunk
    }

    #[test]
    fn fills_to_level_and_skips_solid() {

        let mut chunk = floor_chunk();
        let report = reconcile_all(&mut chunk, -60, full_work());

        assert!(report.complete);
        assert_eq!(report.drained, 0);
        assert_eq!(report.filled, 256);
        assert_eq!(report.sections_visited, CHUNK_SECTION_COUNT);
        assert!(chunk.is_dirty());

        for y in -64..=-61 {
            assert_eq!(chunk.get_voxel(IVec3::new(4, y, 4)), Voxel::Solid);
        }
        assert_eq!(chunk.get_voxel(IVec3::new(4, -60, 4)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(4, -59, 4)), Voxel::Air);

    }

    #[test]
    fn drains_above_level() {

        let mut chunk = floor_chunk();
        chunk.set_block_and_metadata(IVec3::new(1, 10, 1), block::WATER_STILL, 0);
        chunk.set_block_and_metadata(IVec3::new(2, 10, 1), block::WATER_MOVING, 3);
        chunk.set_block_and_metadata(IVec3::new(3, 10, 1), block::SLAB, 0b1001);
        chunk.set_block_and_metadata(IVec3::new(4, 10, 1), block::SLAB, 0b0001);
        chunk.set_block_and_metadata(IVec3::new(1, -62, 1), block::WATER_STILL, 0);

        let report = reconcile_all(&mut chunk, -64, full_work());
        assert_eq!(report.drained, 4);
        assert_eq!(report.filled, 0);

        assert_eq!(chunk.get_voxel(IVec3::new(1, 10, 1)), Voxel::Air);
        assert_eq!(chunk.get_voxel(IVec3::new(2, 10, 1)), Voxel::Air);
        assert_eq!(chunk.block_and_metadata(IVec3::new(3, 10, 1)), (block::SLAB, 0b0001));
        assert_eq!(chunk.block_and_metadata(IVec3::new(4, 10, 1)), (block::SLAB, 0b0001));
        // Only the bottom row is at or below -64.
        assert_eq!(chunk.get_voxel(IVec3::new(1, -62, 1)), Voxel::Air);

    }

    #[test]
    fn flowing_water_becomes_source_and_waterlogged_stays() {

        let mut chunk = floor_chunk();
        chunk.set_block_and_metadata(IVec3::new(5, -58, 5), block::WATER_MOVING, 2);
        chunk.set_block_and_metadata(IVec3::new(6, -58, 5), block::SLAB, 0b1000);
        chunk.set_block_and_metadata(IVec3::new(7, -58, 5), block::SLAB, 0);

        reconcile_all(&mut chunk, -58, full_work());
        assert_eq!(chunk.get_voxel(IVec3::new(5, -58, 5)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(6, -58, 5)), Voxel::Waterloggable { waterlogged: true });
        // Fill never waterlogs.
        assert_eq!(chunk.get_voxel(IVec3::new(7, -58, 5)), Voxel::Waterloggable { waterlogged: false });

    }

    #[test]
    fn bulk_fill_of_air_sections() {

        let mut chunk = Chunk::new();
        let report = reconcile_all(&mut chunk, -1, full_work());
        assert_eq!(report.filled, 64 * 256);
        assert_eq!(chunk.get_voxel(IVec3::new(0, -64, 0)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(15, -1, 15)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(0, 0, 0)), Voxel::Air);
        assert!(!chunk.section_hint(-1).maybe_air);

    }

    #[test]
    fn idempotent() {

        let mut chunk = floor_chunk();
        chunk.set_block_and_metadata(IVec3::new(8, 30, 8), block::WATER_STILL, 0);
        chunk.set_block_and_metadata(IVec3::new(8, -50, 8), block::WATER_MOVING, 1);
        reconcile_all(&mut chunk, -40, full_work());
        chunk.take_dirty();
        chunk.take_changes();

        let report = reconcile_all(&mut chunk, -40, full_work());
        assert_eq!((report.drained, report.filled), (0, 0));
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.take_changes(), 0);

    }

    #[test]
    fn resumes_from_cursor() {

        let mut chunk = Chunk::new();
        let mut work = full_work();

        let mut total = ReconcileReport::default();
        let mut calls = 0;
        loop {
            let report = reconcile(&mut *chunk, -33, &mut work, 2);
            assert!(report.sections_visited <= 2);
            total.filled += report.filled;
            calls += 1;
            if report.complete {
                break;
            }
        }

        assert_eq!(calls, CHUNK_SECTION_COUNT / 2);
        assert_eq!(total.filled, 32 * 256);
        assert_eq!(work.cursor as usize, CHUNK_SECTION_COUNT);
        assert_eq!(chunk.get_voxel(IVec3::new(3, -33, 3)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(3, -32, 3)), Voxel::Air);

        // A completed work does nothing more.
        let report = reconcile(&mut *chunk, -33, &mut work, 2);
        assert_eq!(report.sections_visited, 0);
        assert!(report.complete);

    }

    #[test]
    fn cleanup_only_touches_ring() {

        let mut chunk = floor_chunk();
        chunk.set_block_and_metadata(IVec3::new(0, 20, 7), block::WATER_STILL, 0);
        chunk.set_block_and_metadata(IVec3::new(7, 20, 7), block::WATER_STILL, 0);

        let report = reconcile_all(&mut chunk, -60, cleanup_work());
        assert_eq!(report.drained, 1);
        assert_eq!(report.filled, 60);

        assert_eq!(chunk.get_voxel(IVec3::new(0, 20, 7)), Voxel::Air);
        assert_eq!(chunk.get_voxel(IVec3::new(7, 20, 7)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(15, -60, 3)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(7, -60, 7)), Voxel::Air);

    }

    #[test]
    fn cleanup_budget_covers_more_sections() {

        let mut chunk = floor_chunk();
        let mut work = cleanup_work();
        let report = reconcile(&mut *chunk, -60, &mut work, 8);
        assert!(report.complete);
        assert_eq!(report.sections_visited, CHUNK_SECTION_COUNT);
        assert_eq!(report.filled, 60);

        // A full scan with the same budget only covers a third of the chunk.
        let mut chunk = floor_chunk();
        let mut work = full_work();
        let report = reconcile(&mut *chunk, -60, &mut work, 8);
        assert!(!report.complete);
        assert_eq!(report.sections_visited, 8);

        let mut work = cleanup_work();
        let report = reconcile(&mut *chunk, -60, &mut work, 2);
        assert!(!report.complete);
        assert_eq!(report.sections_visited, 8);

    }

    #[test]
    fn ring_columns() {
        let count = (0..16).flat_map(|x| (0..16).map(move |z| (x, z)))
            .filter(|&(x, z)| is_ring_column(x, z))
            .count();
        assert_eq!(count, 60);
        assert!(!is_ring_column(1, 14));
    }

}
