//! Neighbor cleanup propagation, keeping chunk seams consistent.

use tracing::trace;

use crate::chunk::chunk_key;
use crate::state::TerraformState;

use super::queue::ChunkQueue;


/// Offsets of the 8 horizontal neighbors of a chunk.
const NEIGHBORS: [(i32, i32); 8] = [
    (-1, -1), (0, -1), (1, -1),
    (-1, 0),           (1, 0),
    (-1, 1),  (0, 1),  (1, 1),
];

/// Flag every loaded and already reconciled neighbor of the given chunk for a cleanup
/// pass, neighbors are also promoted when the propagation is priority-driven. Return
/// the number of flagged neighbors.
pub fn propagate(
    queue: &mut ChunkQueue,
    state: &TerraformState,
    cx: i32,
    cz: i32,
    priority: bool,
) -> usize {

    let mut count = 0;

    for (dx, dz) in NEIGHBORS {

        let (ncx, ncz) = (cx.wrapping_add(dx), cz.wrapping_add(dz));
        let key = chunk_key(ncx, ncz);

        if !queue.is_loaded(key) || !state.is_chunk_reconciled(key) {
            continue;
        }

        queue.flag_cleanup(key);
        if priority {
            queue.promote(key);
        }

        count += 1;

    }

    if count != 0 {
        trace!("chunk {cx}/{cz} flagged {count} neighbors for cleanup (priority: {priority})");
    }

    count

}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::water::queue::{Lane, TaskScope};

    #[test]
    fn only_loaded_reconciled_neighbors() {

        let mut state = TerraformState::new();
        state.set_water_level_y(-60);
        let mut queue = ChunkQueue::new();

        // East is loaded and reconciled, west is loaded but stale, north is reconciled
        // but not loaded, and a chunk two steps away is loaded and reconciled.
        state.mark_chunk_reconciled(chunk_key(1, 0), -60);
        queue.track_loaded(chunk_key(1, 0));
        queue.track_loaded(chunk_key(-1, 0));
        state.mark_chunk_reconciled(chunk_key(0, -1), -60);
        state.mark_chunk_reconciled(chunk_key(2, 0), -60);
        queue.track_loaded(chunk_key(2, 0));

        assert_eq!(propagate(&mut queue, &state, 0, 0, false), 1);
        assert_eq!(queue.task(chunk_key(1, 0)).unwrap().scope, TaskScope::Cleanup);
        assert_eq!(queue.lane_of(chunk_key(1, 0)), Some(Lane::Normal));
        assert!(!queue.has_task(chunk_key(-1, 0)));
        assert!(!queue.has_task(chunk_key(0, -1)));
        assert!(!queue.has_task(chunk_key(2, 0)));

    }

    #[test]
    fn priority_promotes() {

        let mut state = TerraformState::new();
        let mut queue = ChunkQueue::new();
        for (cx, cz) in [(-1, -1), (1, 1)] {
            state.mark_chunk_reconciled(chunk_key(cx, cz), state.water_level_y());
            queue.track_loaded(chunk_key(cx, cz));
        }

        assert_eq!(propagate(&mut queue, &state, 0, 0, true), 2);
        assert_eq!(queue.lane_of(chunk_key(-1, -1)), Some(Lane::Priority));
        assert_eq!(queue.lane_of(chunk_key(1, 1)), Some(Lane::Priority));

    }

    #[test]
    fn stale_levels_are_not_neighbors() {

        let mut state = TerraformState::new();
        let mut queue = ChunkQueue::new();
        state.mark_chunk_reconciled(chunk_key(0, 1), -50);
        queue.track_loaded(chunk_key(0, 1));

        assert_eq!(propagate(&mut queue, &state, 0, 0, true), 0);
        assert!(queue.is_empty());

    }

}
