//! The water engine, keeping loaded chunks consistent with the global water level by
//! doing a bounded amount of work on each step.
//!
//! The engine is made of a [`ChunkQueue`] of pending chunk works, a resumable
//! [`reconcile`](reconcile::reconcile) scan applied to a few chunks per step and a
//! [`propagate`](propagate::propagate) function that schedules cleanup passes on the
//! neighbors of freshly reconciled chunks.

use crossbeam_channel::{unbounded, Sender, Receiver};
use tracing::{debug, trace, instrument};

use crate::chunk::{chunk_key, chunk_key_pos, calc_entity_chunk_pos};
use crate::voxel::TerraformWorld;
use crate::state::TerraformState;
use crate::world::ChunkRange;

pub mod queue;
pub mod reconcile;
pub mod propagate;

use queue::{ChunkQueue, Lane, TaskScope};
use reconcile::reconcile;
use propagate::propagate;


/// Tuning of the water engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterConfig {
    /// Maximum number of chunk tasks popped on each step.
    pub chunks_per_step: usize,
    /// Radius, in chunks, of the square around each observer where stale chunks are
    /// promoted.
    pub priority_radius: u8,
    /// Maximum number of sections visited in a chunk by a single task dispatch, a
    /// cleanup task visits 4 times more.
    pub sections_per_call: usize,
}

impl Default for WaterConfig {
    fn default() -> Self {
        Self {
            chunks_per_step: 2,
            priority_radius: 2,
            sections_per_call: 8,
        }
    }
}


/// Counters of what happened during a single engine step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Number of tasks popped from the queue.
    pub popped: usize,
    /// Number of chunks that completed their task and are now reconciled.
    pub reconciled: usize,
    /// Number of tasks put back in their lane because the chunk was unavailable.
    pub deferred: usize,
    /// Number of tasks dropped because their chunk was no longer loaded.
    pub dropped: usize,
    /// Total voxels drained.
    pub drained: usize,
    /// Total voxels filled.
    pub filled: usize,
}


/// A notification from the host about the residency of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkNotice {
    Loaded { cx: i32, cz: i32 },
    Unloaded { cx: i32, cz: i32 },
}

/// A cloneable handle that can be sent to other threads in order to notify the engine
/// of chunk residency changes, notices are applied at the beginning of the next step.
#[derive(Debug, Clone)]
pub struct ChunkNotifier {
    sender: Sender<ChunkNotice>,
}

impl ChunkNotifier {

    /// Notify that a chunk has been loaded, return false if the engine no longer exists.
    pub fn loaded(&self, cx: i32, cz: i32) -> bool {
        self.sender.send(ChunkNotice::Loaded { cx, cz }).is_ok()
    }

    /// Notify that a chunk has been unloaded, return false if the engine no longer
    /// exists.
    pub fn unloaded(&self, cx: i32, cz: i32) -> bool {
        self.sender.send(ChunkNotice::Unloaded { cx, cz }).is_ok()
    }

}


/// The water engine of a single world, the global state is owned by the caller and
/// given to every method that needs it.
#[derive(Debug)]
pub struct WaterEngine {
    config: WaterConfig,
    queue: ChunkQueue,
    notice_sender: Sender<ChunkNotice>,
    notice_receiver: Receiver<ChunkNotice>,
}

impl WaterEngine {

    pub fn new(config: WaterConfig) -> Self {
        let (notice_sender, notice_receiver) = unbounded();
        Self {
            config,
            queue: ChunkQueue::new(),
            notice_sender,
            notice_receiver,
        }
    }

    #[inline]
    pub fn config(&self) -> &WaterConfig {
        &self.config
    }

    #[inline]
    pub fn queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Create a new notifier handle for this engine.
    pub fn notifier(&self) -> ChunkNotifier {
        ChunkNotifier { sender: self.notice_sender.clone() }
    }

    /// Handle a chunk that has just been loaded by the host. A stale chunk is promoted
    /// and its reconciled neighbors are promoted for cleanup, an already reconciled
    /// chunk only gets a lightweight cleanup task.
    pub fn note_loaded(&mut self, state: &TerraformState, cx: i32, cz: i32) {
        let key = chunk_key(cx, cz);
        let reconciled = state.is_chunk_reconciled(key);
        debug!("chunk loaded {cx}/{cz}, reconciled: {reconciled}");
        self.queue.note_loaded(key, reconciled);
        propagate(&mut self.queue, state, cx, cz, !reconciled);
    }

    /// Handle a chunk that has just been unloaded by the host, its progress is lost.
    pub fn note_unloaded(&mut self, cx: i32, cz: i32) {
        debug!("chunk unloaded {cx}/{cz}");
        self.queue.note_unloaded(chunk_key(cx, cz));
    }

    /// Restart a full task for every loaded chunk, this is needed after the water level
    /// changed.
    pub fn requeue_all(&mut self) {
        self.queue.requeue_all();
        debug!("requeued {} loaded chunks", self.queue.len());
    }

    /// Apply every notice received through notifiers, return the number of notices.
    fn apply_notices(&mut self, state: &TerraformState) -> usize {
        let mut count = 0;
        while let Ok(notice) = self.notice_receiver.try_recv() {
            match notice {
                ChunkNotice::Loaded { cx, cz } => self.note_loaded(state, cx, cz),
                ChunkNotice::Unloaded { cx, cz } => self.note_unloaded(cx, cz),
            }
            count += 1;
        }
        count
    }

    /// Promote every stale and loaded chunk around observers.
    fn prioritize_observers<W: TerraformWorld>(&mut self, world: &W, state: &TerraformState) {

        let radius = self.config.priority_radius;

        for pos in world.iter_observers() {
            let (ocx, ocz) = calc_entity_chunk_pos(pos);
            for (cx, cz) in ChunkRange::around(ocx, ocz, radius) {

                let key = chunk_key(cx, cz);
                if state.is_chunk_reconciled(key) || !world.is_chunk_loaded(cx, cz) {
                    continue;
                }

                self.queue.track_loaded(key);
                self.queue.ensure_task(key, TaskScope::Full);
                self.queue.promote(key);

            }
        }

    }

    /// Run a single step of the engine against the given world: apply pending notices,
    /// promote chunks around observers and then dispatch a bounded number of tasks.
    /// This never blocks, chunks that are not available are simply deferred.
    #[instrument(level = "debug", skip_all)]
    pub fn step<W: TerraformWorld>(&mut self, world: &mut W, state: &mut TerraformState) -> StepReport {

        let notices = self.apply_notices(state);
        if notices != 0 {
            trace!("applied {notices} chunk notices");
        }

        self.prioritize_observers(world, state);

        let level = state.water_level_y();
        let mut report = StepReport::default();

        for slot in 0..self.config.chunks_per_step {

            let prefer = if slot == 0 { Lane::Priority } else { Lane::Normal };
            let Some((key, lane)) = self.queue.pop_next(prefer) else { break };
            report.popped += 1;

            let Some(work) = self.queue.task_mut(key) else { continue };
            let (cx, cz) = chunk_key_pos(key);

            // A cleanup pass is only meaningful on an already reconciled chunk.
            if work.scope == TaskScope::Cleanup && !state.is_chunk_reconciled(key) {
                work.scope = TaskScope::Full;
                work.cursor = 0;
            }

            let Some(chunk) = world.get_chunk_mut(cx, cz) else {
                if self.queue.is_loaded(key) {
                    trace!("chunk {cx}/{cz} unavailable, deferred");
                    self.queue.requeue(key, lane);
                    report.deferred += 1;
                } else {
                    trace!("chunk {cx}/{cz} unavailable, dropped");
                    self.queue.finish(key);
                    report.dropped += 1;
                }
                continue;
            };

            let scope = work.scope;
            let chunk_report = reconcile(chunk, level, work, self.config.sections_per_call);
            report.drained += chunk_report.drained;
            report.filled += chunk_report.filled;

            if chunk_report.drained != 0 || chunk_report.filled != 0 {
                debug!("chunk {cx}/{cz} ({scope:?}): drained {}, filled {}",
                    chunk_report.drained, chunk_report.filled);
            }

            if chunk_report.complete {
                self.queue.finish(key);
                state.mark_chunk_reconciled(key, level);
                report.reconciled += 1;
                trace!("chunk {cx}/{cz} reconciled against {level}");
                if scope == TaskScope::Full {
                    propagate(&mut self.queue, state, cx, cz, lane == Lane::Priority);
                }
            } else {
                self.queue.requeue(key, Lane::Normal);
            }

        }

        report

    }

}


#[cfg(test)]
mod tests {

    use glam::{IVec3, DVec3};

    use super::*;
    use crate::block;
    use crate::chunk::Chunk;
    use crate::voxel::{TerraformChunk, Voxel};
    use crate::world::World;

    /// A chunk with a stone floor from -64 to -61 and a few water blocks high in the
    /// air, as left by a previous higher water level.
    fn test_chunk() -> Box<Chunk> {
        let mut chunk = Chunk::new();
        chunk.fill_block_and_metadata(IVec3::new(0, -64, 0), IVec3::new(16, 4, 16), block::STONE, 0);
        chunk.set_block_and_metadata(IVec3::new(3, 40, 3), block::WATER_STILL, 0);
        chunk.set_block_and_metadata(IVec3::new(4, 40, 3), block::WATER_MOVING, 4);
        chunk.take_changes();
        chunk
    }

    fn load(engine: &mut WaterEngine, world: &mut World, state: &TerraformState, cx: i32, cz: i32) {
        world.set_chunk(cx, cz, test_chunk());
        engine.note_loaded(state, cx, cz);
    }

    /// Run steps until the queue is empty, return the number of steps.
    fn run_until_idle(engine: &mut WaterEngine, world: &mut World, state: &mut TerraformState) -> usize {
        let mut steps = 0;
        while !engine.queue().is_empty() {
            let report = engine.step(world, state);
            assert!(report.popped <= engine.config().chunks_per_step);
            engine.queue().check_invariants();
            steps += 1;
            assert!(steps < 10_000, "engine doesn't converge");
        }
        steps
    }

    fn new_engine() -> (WaterEngine, World, TerraformState) {
        (WaterEngine::new(WaterConfig::default()), World::new(), TerraformState::new())
    }

    #[test]
    fn fill_and_drain_to_level() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        load(&mut engine, &mut world, &state, 0, 0);

        run_until_idle(&mut engine, &mut world, &mut state);

        let chunk = world.get_chunk(0, 0).unwrap();
        assert_eq!(chunk.get_voxel(IVec3::new(8, -60, 8)), Voxel::WaterSource);
        assert_eq!(chunk.get_voxel(IVec3::new(8, -61, 8)), Voxel::Solid);
        assert_eq!(chunk.get_voxel(IVec3::new(8, -59, 8)), Voxel::Air);
        assert_eq!(chunk.get_voxel(IVec3::new(3, 40, 3)), Voxel::Air);
        assert_eq!(chunk.get_voxel(IVec3::new(4, 40, 3)), Voxel::Air);
        assert!(chunk.is_dirty());
        assert!(state.is_chunk_reconciled(chunk_key(0, 0)));
        assert!(state.is_dirty());

    }

    #[test]
    fn level_change_reconverges() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        for (cx, cz) in ChunkRange::new(0, 0, 1, 1) {
            load(&mut engine, &mut world, &state, cx, cz);
        }
        run_until_idle(&mut engine, &mut world, &mut state);

        assert!(state.set_water_level_y(0));
        assert!(state.revisions().is_empty());
        engine.requeue_all();
        assert_eq!(engine.queue().len(), 4);
        run_until_idle(&mut engine, &mut world, &mut state);

        for (cx, cz) in ChunkRange::new(0, 0, 1, 1) {
            let chunk = world.get_chunk(cx, cz).unwrap();
            assert_eq!(chunk.get_voxel(IVec3::new(0, 0, 15)), Voxel::WaterSource);
            assert_eq!(chunk.get_voxel(IVec3::new(0, -30, 15)), Voxel::WaterSource);
            assert_eq!(chunk.get_voxel(IVec3::new(0, 1, 15)), Voxel::Air);
            assert!(state.is_chunk_reconciled(chunk_key(cx, cz)));
        }

        // Going back down drains everything above.
        state.set_water_level_y(-60);
        engine.requeue_all();
        run_until_idle(&mut engine, &mut world, &mut state);
        let chunk = world.get_chunk(1, 1).unwrap();
        assert_eq!(chunk.get_voxel(IVec3::new(5, -59, 5)), Voxel::Air);
        assert_eq!(chunk.get_voxel(IVec3::new(5, 0, 5)), Voxel::Air);
        assert_eq!(chunk.get_voxel(IVec3::new(5, -60, 5)), Voxel::WaterSource);

    }

    #[test]
    fn neighbor_is_flagged_for_cleanup() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        load(&mut engine, &mut world, &state, 0, 0);
        run_until_idle(&mut engine, &mut world, &mut state);

        // The new stale chunk promotes its reconciled neighbor for cleanup on load.
        load(&mut engine, &mut world, &state, 1, 0);
        let work = engine.queue().task(chunk_key(0, 0)).unwrap();
        assert_eq!(work.scope, TaskScope::Cleanup);
        assert_eq!(engine.queue().lane_of(chunk_key(0, 0)), Some(Lane::Priority));
        assert_eq!(engine.queue().lane_of(chunk_key(1, 0)), Some(Lane::Priority));

        run_until_idle(&mut engine, &mut world, &mut state);
        assert!(state.is_chunk_reconciled(chunk_key(1, 0)));

        // Seams are consistent.
        let west = world.get_chunk(0, 0).unwrap();
        let east = world.get_chunk(1, 0).unwrap();
        assert_eq!(west.get_voxel(IVec3::new(15, -60, 7)), Voxel::WaterSource);
        assert_eq!(east.get_voxel(IVec3::new(0, -60, 7)), Voxel::WaterSource);

    }

    #[test]
    fn full_completion_flags_neighbors() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        load(&mut engine, &mut world, &state, 0, 0);
        run_until_idle(&mut engine, &mut world, &mut state);

        // Loaded through the normal lane, as if the level was already known reconciled
        // and then invalidated for this chunk only.
        world.set_chunk(1, 0, test_chunk());
        engine.queue.track_loaded(chunk_key(1, 0));
        engine.queue.ensure_task(chunk_key(1, 0), TaskScope::Full);
        assert!(!engine.queue().has_task(chunk_key(0, 0)));

        engine.config.chunks_per_step = 1;
        engine.config.sections_per_call = usize::MAX;
        let report = engine.step(&mut world, &mut state);
        assert_eq!(report.reconciled, 1);

        // Completion from the normal lane flags without promotion.
        assert_eq!(engine.queue().task(chunk_key(0, 0)).unwrap().scope, TaskScope::Cleanup);
        assert_eq!(engine.queue().lane_of(chunk_key(0, 0)), Some(Lane::Normal));

        // Cleanup completion never propagates.
        let report = engine.step(&mut world, &mut state);
        assert_eq!(report.reconciled, 1);
        assert!(engine.queue().is_empty());

    }

    #[test]
    fn second_pass_is_idempotent() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-50);
        for (cx, cz) in ChunkRange::new(-1, -1, 1, 1) {
            load(&mut engine, &mut world, &state, cx, cz);
        }
        run_until_idle(&mut engine, &mut world, &mut state);

        for (cx, cz) in ChunkRange::new(-1, -1, 1, 1) {
            let chunk = world.get_chunk_mut(cx, cz).unwrap();
            chunk.take_dirty();
            chunk.take_changes();
        }
        state.clear_dirty();

        engine.requeue_all();
        let mut drained = 0;
        let mut filled = 0;
        while !engine.queue().is_empty() {
            let report = engine.step(&mut world, &mut state);
            drained += report.drained;
            filled += report.filled;
        }

        assert_eq!((drained, filled), (0, 0));
        assert!(!state.is_dirty());
        for (cx, cz) in ChunkRange::new(-1, -1, 1, 1) {
            let chunk = world.get_chunk_mut(cx, cz).unwrap();
            assert!(!chunk.is_dirty());
            assert_eq!(chunk.take_changes(), 0);
        }

    }

    #[test]
    fn bounded_work_per_step() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        for (cx, cz) in ChunkRange::new(0, 0, 3, 3) {
            load(&mut engine, &mut world, &state, cx, cz);
        }

        let report = engine.step(&mut world, &mut state);
        assert_eq!(report.popped, 2);
        // Sections per call is smaller than the chunk height.
        assert_eq!(report.reconciled, 0);
        assert_eq!(engine.queue().len(), 16);

        // A full task needs 3 dispatches of 8 sections, a cleanup task scans the ring of
        // the whole chunk in a single dispatch.
        let mut popped = report.popped;
        let mut reconciled = 0;
        while !engine.queue().is_empty() {
            let report = engine.step(&mut world, &mut state);
            assert!(report.popped <= 2);
            assert_eq!(report.deferred, 0);
            engine.queue().check_invariants();
            popped += report.popped;
            reconciled += report.reconciled;
        }

        let cleanups = reconciled - 16;
        assert!(cleanups > 0);
        assert_eq!(popped, 16 * 3 + cleanups);
        for (cx, cz) in ChunkRange::new(0, 0, 3, 3) {
            assert!(state.is_chunk_reconciled(chunk_key(cx, cz)));
        }

    }

    #[test]
    fn priority_completion_promotes_neighbor_cleanup() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        load(&mut engine, &mut world, &state, 0, 0);
        run_until_idle(&mut engine, &mut world, &mut state);

        // Two stale chunks in the priority lane, 1/0 at the front.
        for (cx, cz) in [(5, 5), (1, 0)] {
            world.set_chunk(cx, cz, test_chunk());
            engine.queue.track_loaded(chunk_key(cx, cz));
            engine.queue.ensure_task(chunk_key(cx, cz), TaskScope::Full);
            engine.queue.promote(chunk_key(cx, cz));
        }
        assert!(!engine.queue().has_task(chunk_key(0, 0)));

        engine.config.chunks_per_step = 1;
        engine.config.sections_per_call = usize::MAX;
        let report = engine.step(&mut world, &mut state);
        assert_eq!(report.reconciled, 1);
        assert!(state.is_chunk_reconciled(chunk_key(1, 0)));

        // The reconciled neighbor jumped ahead of the pending priority task.
        assert_eq!(engine.queue().task(chunk_key(0, 0)).unwrap().scope, TaskScope::Cleanup);
        assert_eq!(engine.queue().priority_len(), 2);
        assert_eq!(engine.queue.pop_next(Lane::Priority), Some((chunk_key(0, 0), Lane::Priority)));
        assert_eq!(engine.queue.pop_next(Lane::Priority), Some((chunk_key(5, 5), Lane::Priority)));

    }

    #[test]
    fn unload_and_reload() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        load(&mut engine, &mut world, &state, 0, 0);

        // Partial progress is lost on unload, the single task has been dispatched on
        // both slots.
        engine.step(&mut world, &mut state);
        assert_eq!(engine.queue().task(chunk_key(0, 0)).unwrap().cursor, 16);
        world.remove_chunk(0, 0);
        engine.note_unloaded(0, 0);
        assert!(!engine.queue().has_task(chunk_key(0, 0)));
        assert!(!state.is_chunk_reconciled(chunk_key(0, 0)));

        load(&mut engine, &mut world, &state, 0, 0);
        assert_eq!(engine.queue().task(chunk_key(0, 0)).unwrap().cursor, 0);
        run_until_idle(&mut engine, &mut world, &mut state);
        assert!(state.is_chunk_reconciled(chunk_key(0, 0)));

        // Reloading a reconciled chunk only schedules a cleanup that changes nothing.
        let chunk = world.remove_chunk(0, 0).unwrap();
        engine.note_unloaded(0, 0);
        world.set_chunk(0, 0, chunk);
        engine.note_loaded(&state, 0, 0);
        assert_eq!(engine.queue().task(chunk_key(0, 0)).unwrap().scope, TaskScope::Cleanup);

        let mut total = StepReport::default();
        while !engine.queue().is_empty() {
            let report = engine.step(&mut world, &mut state);
            total.drained += report.drained;
            total.filled += report.filled;
        }
        assert_eq!((total.drained, total.filled), (0, 0));

    }

    #[test]
    fn unavailable_chunks_are_deferred() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);

        // Reported loaded but never given to the world, each slot is consumed.
        engine.note_loaded(&state, 5, 5);
        let report = engine.step(&mut world, &mut state);
        assert_eq!((report.popped, report.deferred, report.dropped), (2, 2, 0));
        assert_eq!(engine.queue().lane_of(chunk_key(5, 5)), Some(Lane::Priority));
        assert_eq!(engine.queue().task(chunk_key(5, 5)).unwrap().cursor, 0);

        // Once available it's processed from where it was.
        world.set_chunk(5, 5, test_chunk());
        let report = engine.step(&mut world, &mut state);
        assert_eq!((report.popped, report.deferred), (2, 0));
        assert_eq!(engine.queue().task(chunk_key(5, 5)).unwrap().cursor, 16);

    }

    #[test]
    fn notifier_applied_on_step() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);
        let notifier = engine.notifier();

        world.set_chunk(2, 3, test_chunk());
        let thread_notifier = notifier.clone();
        std::thread::spawn(move || assert!(thread_notifier.loaded(2, 3)))
            .join().unwrap();
        assert!(!engine.queue().is_loaded(chunk_key(2, 3)));

        engine.step(&mut world, &mut state);
        assert!(engine.queue().is_loaded(chunk_key(2, 3)));

        assert!(notifier.unloaded(2, 3));
        engine.step(&mut world, &mut state);
        assert!(!engine.queue().is_loaded(chunk_key(2, 3)));
        assert!(engine.queue().is_empty());

        drop(engine);
        assert!(!notifier.loaded(0, 0));

    }

    #[test]
    fn observers_prioritize_nearby_chunks() {

        let (mut engine, mut world, mut state) = new_engine();
        state.set_water_level_y(-60);

        for cx in 0..8 {
            load(&mut engine, &mut world, &state, cx, 0);
        }
        // Move all promoted tasks to the normal lane.
        engine.requeue_all();

        // Observer standing in chunk 6/0, chunks 4..=7 are within radius 2.
        world.spawn_observer(DVec3::new(6.0 * 16.0 + 3.0, 70.0, 5.0));
        engine.step(&mut world, &mut state);

        // The first slot was taken from the priority lane.
        let near = (4..8).map(|cx| engine.queue().task(chunk_key(cx, 0)).unwrap().cursor).sum::<u32>();
        assert_eq!(near, 8);
        assert_eq!(engine.queue().task(chunk_key(0, 0)).unwrap().cursor, 8);
        // The dispatched chunk went back to the normal lane.
        assert_eq!(engine.queue().priority_len(), 3);

        // Unloaded chunks around observers are ignored.
        assert!(!engine.queue().is_loaded(chunk_key(8, 0)));

    }

}
