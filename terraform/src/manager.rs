//! Per-world terraform context, this is the narrow surface the host calls into.

use thiserror::Error;
use tracing::{info, debug};

use crate::chunk::chunk_key;
use crate::state::{TerraformState, WATER_LEVEL_RANGE};
use crate::water::{WaterEngine, WaterConfig, ChunkNotifier, StepReport};
use crate::voxel::{TerraformWorld, Voxel};


/// Terraform index below which observers can't place water.
pub const WATER_PLACE_THRESHOLD: i64 = 1_000_000;


/// Snapshot of the global terraform values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerraformInfo {
    pub terraform_index: i64,
    pub water_level_y: i32,
}

/// Message to send to an observer that just joined, so that it knows the current index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSync {
    pub terraform_index: i64,
}

/// What the host should do with a voxel an observer just placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceVerdict {
    /// Keep the placed voxel.
    Allow,
    /// Revert the placed voxel to air.
    Revert,
}


/// The terraform context of a single managed world, owning the persisted global state
/// and the water engine. The host calls the `on_` methods on the matching events and
/// saves the state when it's dirty.
#[derive(Debug)]
pub struct TerraformManager {
    state: TerraformState,
    engine: WaterEngine,
}

impl TerraformManager {

    pub fn new(state: TerraformState, config: WaterConfig) -> Self {
        Self {
            state,
            engine: WaterEngine::new(config),
        }
    }

    #[inline]
    pub fn state(&self) -> &TerraformState {
        &self.state
    }

    #[inline]
    pub fn engine(&self) -> &WaterEngine {
        &self.engine
    }

    /// Clear the dirty flag of the state after it has been successfully saved.
    #[inline]
    pub fn mark_saved(&mut self) {
        self.state.clear_dirty();
    }

    /// Create a notifier that can be used from any thread to report chunk residency.
    pub fn notifier(&self) -> ChunkNotifier {
        self.engine.notifier()
    }

    pub fn info(&self) -> TerraformInfo {
        TerraformInfo {
            terraform_index: self.state.terraform_index(),
            water_level_y: self.state.water_level_y(),
        }
    }

    /// Change the target water level, every chunk revision is invalidated and every
    /// loaded chunk gets a new full task. Return false if the level is unchanged.
    pub fn set_water_level(&mut self, water_level_y: i32) -> Result<bool, LevelOutOfRange> {

        if !WATER_LEVEL_RANGE.contains(&water_level_y) {
            return Err(LevelOutOfRange(water_level_y));
        }

        let prev = self.state.water_level_y();
        if !self.state.set_water_level_y(water_level_y) {
            return Ok(false);
        }

        self.engine.requeue_all();
        info!("water level changed from {prev} to {water_level_y}, {} chunks requeued",
            self.engine.queue().len());
        Ok(true)

    }

    pub fn set_terraform_index(&mut self, terraform_index: i64) {
        self.state.set_terraform_index(terraform_index);
        debug!("terraform index set to {terraform_index}");
    }

    /// Add the given delta to the terraform index, saturating at the bounds, and return
    /// the new index.
    pub fn add_terraform_index(&mut self, delta: i64) -> i64 {
        let terraform_index = self.state.terraform_index().saturating_add(delta);
        self.set_terraform_index(terraform_index);
        terraform_index
    }

    /// The host has loaded the given chunk.
    pub fn on_chunk_loaded(&mut self, cx: i32, cz: i32) {
        self.engine.note_loaded(&self.state, cx, cz);
    }

    /// The host has unloaded the given chunk.
    pub fn on_chunk_unloaded(&mut self, cx: i32, cz: i32) {
        self.engine.note_unloaded(cx, cz);
    }

    /// The host has dropped the content of the given unloaded chunk, a later load brings
    /// a chunk that was never reconciled.
    pub fn on_chunk_discarded(&mut self, cx: i32, cz: i32) {
        self.state.forget_chunk(chunk_key(cx, cz));
    }

    /// Run one engine step against the world, this should be called once per host tick.
    pub fn on_step<W: TerraformWorld>(&mut self, world: &mut W) -> StepReport {
        self.engine.step(world, &mut self.state)
    }

    /// An observer has placed the given voxel, water can't be placed before the index
    /// reaches [`WATER_PLACE_THRESHOLD`].
    pub fn on_block_placed(&self, voxel: Voxel) -> PlaceVerdict {
        let is_water = matches!(voxel, Voxel::WaterSource | Voxel::WaterFlowing);
        if is_water && self.state.terraform_index() < WATER_PLACE_THRESHOLD {
            PlaceVerdict::Revert
        } else {
            PlaceVerdict::Allow
        }
    }

    /// An observer has joined, return the sync message to send to it.
    pub fn on_observer_joined(&self) -> IndexSync {
        IndexSync { terraform_index: self.state.terraform_index() }
    }

}


/// Error returned when trying to set a water level outside of [`WATER_LEVEL_RANGE`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("water level {0} is out of range {min}..={max}", min = WATER_LEVEL_RANGE.start(), max = WATER_LEVEL_RANGE.end())]
pub struct LevelOutOfRange(pub i32);
