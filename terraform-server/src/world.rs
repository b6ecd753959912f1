//! Server world structure.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use glam::DVec3;

use indexmap::IndexMap;

use tracing::{debug, info, warn, trace, instrument};

use arcstr::ArcStr;

use terraform::chunk::{Chunk, calc_entity_chunk_pos};
use terraform::manager::TerraformManager;
use terraform::serde::state::{self as state_file, STATE_FILE_NAME};
use terraform::state::TerraformState;
use terraform::water::{ChunkNotifier, StepReport};
use terraform::world::{World, ChunkRange, Event, ChunkEvent, BlockEvent, ObserverEvent};
use terraform::surface;
use terraform::block;

use crate::terrain::TerrainGenerator;
use crate::config;


/// Server world seed is currently hardcoded.
const SEED: i64 = 9999;
/// Maximum number of chunks brought in the world on each tick.
const LOADS_PER_TICK: usize = 16;
/// Default maximum number of unloaded chunks kept in memory.
const STASH_CAPACITY: usize = 1024;


/// A single world in the server, running the terraform engine against chunks streamed
/// around the observers.
pub struct ServerWorld {
    /// The inner world data structure.
    pub world: World,
    /// The remaining world state, this is put is a separate struct in order to facilitate
    /// borrowing when handling commands.
    pub state: ServerWorldState,
}

/// Represent the whole state of a world.
pub struct ServerWorldState {
    /// World name.
    pub name: String,
    /// The server-side time, increased on every tick even when the engine is frozen.
    pub time: u64,
    /// Control whether the terraform engine is stepped on each tick.
    pub tick_mode: TickMode,
    /// The terraform context of this world.
    pub manager: TerraformManager,
    /// Observers' ids in the world, from their name.
    pub observers: HashMap<ArcStr, u32>,
    /// Report of the last engine step.
    pub last_step: StepReport,
    /// Accumulated counters of every engine step since startup.
    pub total_step: StepReport,
    /// Notifier used to forward chunk residency events to the engine.
    notifier: ChunkNotifier,
    /// Chunks unloaded from the world, they are kept here so that reloading them gives
    /// back the same content instead of a freshly generated chunk. Ordered from the
    /// least recently unloaded.
    stash: IndexMap<(i32, i32), Box<Chunk>>,
    /// Maximum number of chunks in the stash, the oldest ones are discarded first.
    stash_capacity: usize,
    /// Generator for chunks that were never loaded.
    generator: TerrainGenerator,
    /// Path of the terraform state file.
    state_path: PathBuf,
    /// Instant of the last save of the state.
    last_save: Instant,
    /// Sliding average tick duration, in seconds.
    pub tick_duration: f32,
    /// Sliding average interval between two ticks.
    pub tick_interval: f32,
    /// Instant of the last tick.
    tick_last: Instant,
}

/// Indicate the current mode for stepping the terraform engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// The engine is stepped on each server tick (20 TPS).
    Auto,
    /// The engine is stepped on each server tick (20 TPS), but the counter decrease and
    /// it is no longer stepped when reaching 0.
    Manual(u32),
}

impl ServerWorld {

    /// Create a server world, loading its terraform state from the data directory.
    pub fn new(name: impl Into<String>) -> Self {
        let state_path = config::data_dir().join(STATE_FILE_NAME);
        let state = match state_file::load(&state_path) {
            Ok(state) => state,
            Err(e) => {
                warn!("failed to load terraform state from {}: {e}, using default state", state_path.display());
                TerraformState::new()
            }
        };
        Self::with_state(name, state, state_path)
    }

    /// Create a server world with the given terraform state, saved to the given path.
    pub fn with_state(name: impl Into<String>, state: TerraformState, state_path: PathBuf) -> Self {

        let mut inner = World::new();

        // Make sure that the world initially have an empty events queue.
        inner.swap_events(Some(Vec::new()));

        let manager = TerraformManager::new(state, config::water_config());
        let notifier = manager.notifier();

        let name = name.into();
        let info = manager.info();
        info!("world {name}: terraform index {}, water level {}",
            info.terraform_index, info.water_level_y);

        Self {
            world: inner,
            state: ServerWorldState {
                name,
                time: 0,
                tick_mode: TickMode::Auto,
                manager,
                observers: HashMap::new(),
                last_step: StepReport::default(),
                total_step: StepReport::default(),
                notifier,
                stash: IndexMap::new(),
                stash_capacity: STASH_CAPACITY,
                generator: TerrainGenerator::new(SEED),
                state_path,
                last_save: Instant::now(),
                tick_duration: 0.0,
                tick_interval: 0.0,
                tick_last: Instant::now(),
            },
        }

    }

    /// Save the terraform state of this world, return true on success.
    pub fn save(&mut self) -> bool {
        self.state.save()
    }

    /// Tick this world.
    #[instrument(skip(self))]
    pub fn tick(&mut self) {

        let start = Instant::now();
        self.state.tick_interval = (self.state.tick_interval * 0.98) + (start - self.state.tick_last).as_secs_f32() * 0.02;
        self.state.tick_last = start;

        // Load and unload chunks depending on observers' positions.
        self.stream_chunks();

        // Swap events out in order to proceed them, residency events are forwarded to
        // the engine before it steps.
        let mut events = self.world.swap_events(None).unwrap_or_default();
        for event in events.drain(..) {
            match event {
                Event::Chunk { cx, cz, inner } => match inner {
                    ChunkEvent::Set => {
                        self.state.notifier.loaded(cx, cz);
                    }
                    ChunkEvent::Remove => {
                        self.state.notifier.unloaded(cx, cz);
                    }
                }
                Event::Block { pos, inner } => match inner {
                    BlockEvent::Set { id, metadata, prev_id, prev_metadata } => {
                        trace!("block set at {pos}: {}/{prev_metadata} -> {}/{metadata}",
                            block::name(prev_id), block::name(id));
                    }
                }
                Event::Observer { id, inner } => match inner {
                    ObserverEvent::Spawn =>
                        debug!("observer #{id} spawned"),
                    ObserverEvent::Position { pos } =>
                        debug!("observer #{id} moved to {pos}"),
                    ObserverEvent::Remove =>
                        debug!("observer #{id} removed"),
                }
            }
        }

        // Reinsert events after processing.
        self.world.swap_events(Some(events));

        // Only step the engine if not frozen.
        let step = match self.state.tick_mode {
            TickMode::Auto => true,
            TickMode::Manual(0) => false,
            TickMode::Manual(ref mut n) => {
                *n -= 1;
                true
            }
        };

        if step {
            let report = self.state.manager.on_step(&mut self.world);
            self.state.accumulate(report);
        }

        // Save the state if it has been modified for long enough.
        if self.state.manager.state().is_dirty() && self.state.last_save.elapsed() >= config::save_interval() {
            self.state.save();
        }

        // Update tick duration metric.
        let tick_duration = start.elapsed();
        self.state.tick_duration = (self.state.tick_duration * 0.98) + tick_duration.as_secs_f32() * 0.02;

        // Finally increase server-side tick time.
        self.state.time += 1;

    }

    /// Internal function to load chunks in view of observers and unload chunks that are
    /// no longer viewed by any of them.
    fn stream_chunks(&mut self) {

        let view_distance = config::view_distance();

        let mut viewed = HashSet::new();
        for (_, pos) in self.world.iter_observers() {
            let (cx, cz) = calc_entity_chunk_pos(pos);
            viewed.extend(ChunkRange::around(cx, cz, view_distance));
        }

        let unloaded = self.world.iter_chunks()
            .filter(|pos| !viewed.contains(pos))
            .collect::<Vec<_>>();

        for (cx, cz) in unloaded {
            if let Some(chunk) = self.world.remove_chunk(cx, cz) {
                debug!("unloading chunk {cx}/{cz}");
                self.state.stash_chunk(cx, cz, chunk);
            }
        }

        let mut loads = 0;
        for (cx, cz) in viewed {

            if loads >= LOADS_PER_TICK {
                break;
            }

            if self.world.contains_chunk(cx, cz) {
                continue;
            }

            let chunk = match self.state.stash.shift_remove(&(cx, cz)) {
                Some(chunk) => chunk,
                None => self.state.generate_chunk(cx, cz),
            };

            self.world.set_chunk(cx, cz, chunk);
            loads += 1;

        }

    }

    /// Spawn a named observer at the given horizontal position, return false if an
    /// observer with this name already exists.
    pub fn add_observer(&mut self, name: ArcStr, x: f64, z: f64) -> bool {

        if self.state.observers.contains_key(&name) {
            return false;
        }

        let pos = DVec3::new(x, self.state.manager.state().water_level_y() as f64, z);
        let id = self.world.spawn_observer(pos);
        self.state.observers.insert(name.clone(), id);

        let sync = self.state.manager.on_observer_joined();
        info!("observer {name} joined at {pos}, syncing terraform index {}", sync.terraform_index);
        true

    }

    /// Move a named observer, return false if it doesn't exist.
    pub fn move_observer(&mut self, name: &str, x: f64, z: f64) -> bool {
        let Some(&id) = self.state.observers.get(name) else { return false };
        let y = self.world.get_observer(id).map(|pos| pos.y).unwrap_or_default();
        self.world.set_observer_pos(id, DVec3::new(x, y, z))
    }

    /// Remove a named observer, return false if it doesn't exist.
    pub fn remove_observer(&mut self, name: &str) -> bool {
        match self.state.observers.remove(name) {
            Some(id) => self.world.remove_observer(id),
            None => false,
        }
    }

}

impl ServerWorldState {

    /// Save the terraform state, the dirty flag is only cleared on success. Return true
    /// if the state has been written.
    pub fn save(&mut self) -> bool {

        info!("saving {}...", self.name);
        self.last_save = Instant::now();

        match state_file::save(&self.state_path, self.manager.state()) {
            Ok(()) => {
                self.manager.mark_saved();
                debug!("saved {} terraform state to {}", self.name, self.state_path.display());
                true
            }
            Err(e) => {
                warn!("failed to save {} terraform state to {}: {e}", self.name, self.state_path.display());
                false
            }
        }

    }

    /// Keep an unloaded chunk in the stash, discarding the oldest stashed chunks over
    /// capacity. A discarded chunk will be generated again, so its revision is dropped.
    fn stash_chunk(&mut self, cx: i32, cz: i32, chunk: Box<Chunk>) {
        self.stash.insert((cx, cz), chunk);
        while self.stash.len() > self.stash_capacity {
            let Some(((old_cx, old_cz), _)) = self.stash.shift_remove_index(0) else { break };
            debug!("discarding stashed chunk {old_cx}/{old_cz}");
            self.manager.on_chunk_discarded(old_cx, old_cz);
        }
    }

    /// Return the number of chunks unloaded from the world but kept in memory.
    pub fn stash_count(&self) -> usize {
        self.stash.len()
    }

    fn generate_chunk(&self, cx: i32, cz: i32) -> Box<Chunk> {
        let mut chunk = self.generator.generate(cx, cz);
        if config::surface_sweep() {
            let count = surface::replace_grass_with_dirt(&mut chunk);
            trace!("surface sweep of chunk {cx}/{cz}: {count} blocks replaced");
        }
        debug!("generated chunk {cx}/{cz}");
        chunk
    }

    fn accumulate(&mut self, report: StepReport) {
        self.last_step = report;
        let total = &mut self.total_step;
        total.popped += report.popped;
        total.reconciled += report.reconciled;
        total.deferred += report.deferred;
        total.dropped += report.dropped;
        total.drained += report.drained;
        total.filled += report.filled;
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    use glam::IVec3;
    use terraform::chunk::chunk_key;
    use terraform::voxel::{TerraformChunk, Voxel};

    fn test_world() -> ServerWorld {
        let path = std::env::temp_dir().join(format!("terraform-test-{}-{STATE_FILE_NAME}", std::process::id()));
        ServerWorld::with_state("test", TerraformState::new(), path)
    }

    #[test]
    fn observers_stream_chunks() {

        let mut world = test_world();
        assert!(world.add_observer(ArcStr::from("alice"), 8.0, 8.0));
        assert!(!world.add_observer(ArcStr::from("alice"), 0.0, 0.0));

        let side = config::view_distance() as usize * 2 + 1;
        for _ in 0..side * side {
            world.tick();
        }

        assert_eq!(world.world.get_chunk_count(), side * side);
        assert!(world.state.manager.engine().queue().is_loaded(chunk_key(0, 0)));

        // Moving far away unloads every chunk into the stash.
        assert!(world.move_observer("alice", 100_000.0, 100_000.0));
        world.tick();
        assert_eq!(world.state.stash_count(), side * side);
        assert!(world.world.get_chunk(0, 0).is_none());

        assert!(world.remove_observer("alice"));
        assert!(!world.remove_observer("alice"));

    }

    #[test]
    fn stash_is_bounded() {

        let mut world = test_world();
        world.state.stash_capacity = 4;
        world.add_observer(ArcStr::from("dave"), 8.0, 8.0);

        let side = config::view_distance() as usize * 2 + 1;
        for _ in 0..20_000 {
            world.tick();
            if world.state.manager.engine().queue().is_empty() && world.state.time > 200 {
                break;
            }
        }
        assert_eq!(world.state.manager.state().revisions().len(), side * side);

        // Only the last unloaded chunks are kept, the others lose their revision.
        world.move_observer("dave", 100_000.0, 100_000.0);
        world.tick();
        assert_eq!(world.state.stash_count(), 4);
        let revisions = world.state.manager.state().revisions();
        assert_eq!(revisions.len(), 4);
        for &(cx, cz) in world.state.stash.keys() {
            assert!(world.state.manager.state().is_chunk_reconciled(chunk_key(cx, cz)));
        }

        // A kept chunk comes back with its drained content.
        let (&(kept_cx, kept_cz), kept) = world.state.stash.first().unwrap();
        let column = (-64..128)
            .map(|y| kept.block_and_metadata(IVec3::new(8, y, 8)))
            .collect::<Vec<_>>();

        world.state.stash_capacity = 64;
        world.move_observer("dave", kept_cx as f64 * 16.0 + 8.0, kept_cz as f64 * 16.0 + 8.0);
        for _ in 0..10 {
            world.tick();
        }

        assert!(!world.state.stash.contains_key(&(kept_cx, kept_cz)));
        let chunk = world.world.get_chunk(kept_cx, kept_cz).unwrap();
        for (y, &block) in (-64..128).zip(&column) {
            assert_eq!(chunk.block_and_metadata(IVec3::new(8, y, 8)), block);
        }
        assert!(world.state.manager.state().is_chunk_reconciled(chunk_key(kept_cx, kept_cz)));

    }

    #[test]
    fn failed_save_keeps_state_dirty() {

        // The parent of the state file is a regular file.
        let blocker = std::env::temp_dir().join(format!("terraform-test-{}-blocker", std::process::id()));
        std::fs::write(&blocker, b"").unwrap();
        let mut world = ServerWorld::with_state("test", TerraformState::new(), blocker.join(STATE_FILE_NAME));

        world.state.manager.set_terraform_index(3);
        assert!(!world.save());
        assert!(world.state.manager.state().is_dirty());

        world.state.state_path = std::env::temp_dir().join(format!("terraform-test-{}-saved-{STATE_FILE_NAME}", std::process::id()));
        assert!(world.save());
        assert!(!world.state.manager.state().is_dirty());

    }

    #[test]
    fn frozen_engine_does_not_step() {

        let mut world = test_world();
        world.state.tick_mode = TickMode::Manual(0);
        world.add_observer(ArcStr::from("bob"), 0.0, 0.0);

        for _ in 0..10 {
            world.tick();
        }
        assert_eq!(world.state.total_step.popped, 0);
        // Residency notices are only applied by a step.
        assert!(world.state.manager.engine().queue().is_empty());

        world.state.tick_mode = TickMode::Manual(3);
        for _ in 0..10 {
            world.tick();
        }
        assert_eq!(world.state.tick_mode, TickMode::Manual(0));
        assert!(world.state.total_step.popped > 0);

    }

    #[test]
    fn generated_sea_is_drained() {

        let mut world = test_world();
        world.add_observer(ArcStr::from("carol"), 8.0, 8.0);

        for _ in 0..20_000 {
            world.tick();
            if world.state.manager.engine().queue().is_empty() && world.state.time > 200 {
                break;
            }
        }

        // Default water level is the bottom of the world, no water may remain.
        let chunk = world.world.get_chunk(0, 0).unwrap();
        for y in -63..128 {
            for x in 0..16 {
                assert!(!chunk.get_voxel(IVec3::new(x, y, 8)).has_water(), "water at {x}/{y}/8");
            }
        }
        assert_eq!(chunk.get_voxel(IVec3::new(0, -64, 0)), Voxel::Solid);
        assert!(world.state.manager.state().is_chunk_reconciled(chunk_key(0, 0)));

    }

}
