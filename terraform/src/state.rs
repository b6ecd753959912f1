//! Global terraform state persisted with the managed world: the terraform index, the
//! target water level and the revision store recording which chunks are already
//! reconciled against that level.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::RangeInclusive;

use tracing::{debug, info};


/// Default water level, this is the floor of the world so nothing gets filled.
pub const DEFAULT_WATER_LEVEL: i32 = -64;

/// The range of water levels accepted by the administrative surface.
pub const WATER_LEVEL_RANGE: RangeInclusive<i32> = -64..=320;

/// Version of the revision store layout. Any persisted store written with another
/// revision is discarded on load because its bookkeeping can't be trusted.
pub const FORMAT_REVISION: i32 = 2;


/// Mapping from chunk keys to the water level the chunk was last reconciled against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionStore {
    inner: HashMap<i64, i32>,
}

impl RevisionStore {

    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from the two parallel persisted arrays. Only the shortest length
    /// of both is used, remaining values are discarded.
    pub fn from_arrays(keys: &[i64], levels: &[i32]) -> Self {
        Self {
            inner: keys.iter().copied()
                .zip(levels.iter().copied())
                .collect(),
        }
    }

    /// Return the two parallel arrays to persist this store, with keys sorted so that
    /// the output is stable.
    pub fn to_arrays(&self) -> (Vec<i64>, Vec<i32>) {
        let mut entries = self.inner.iter()
            .map(|(&key, &level)| (key, level))
            .collect::<Vec<_>>();
        entries.sort_unstable_by_key(|&(key, _)| key);
        entries.into_iter().unzip()
    }

    /// Get the level the given chunk was last reconciled against, if any.
    #[inline]
    pub fn get(&self, key: i64) -> Option<i32> {
        self.inner.get(&key).copied()
    }

    /// Return true if the given chunk was reconciled against exactly the given level.
    #[inline]
    pub fn is_reconciled(&self, key: i64, level: i32) -> bool {
        self.get(key) == Some(level)
    }

    /// Record the given chunk as reconciled against the given level, return true if
    /// the stored value has actually changed.
    pub fn mark_reconciled(&mut self, key: i64, level: i32) -> bool {
        match self.inner.entry(key) {
            Entry::Occupied(o) if *o.get() == level => false,
            Entry::Occupied(mut o) => {
                o.insert(level);
                true
            }
            Entry::Vacant(v) => {
                v.insert(level);
                true
            }
        }
    }

    /// Forget a single chunk, return true if it was present.
    pub fn remove(&mut self, key: i64) -> bool {
        self.inner.remove(&key).is_some()
    }

    /// Forget every chunk, return true if the store was not already empty.
    pub fn invalidate_all(&mut self) -> bool {
        let was_empty = self.inner.is_empty();
        self.inner.clear();
        !was_empty
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

}


/// The whole persisted terraform state of a managed world.
///
/// Every mutation that changes the persisted content raises the dirty flag, the host
/// is expected to save the state when it's dirty and then call [`Self::clear_dirty`].
#[derive(Debug, Clone)]
pub struct TerraformState {
    /// External progress scalar, independent of the water engine.
    terraform_index: i64,
    /// The target horizontal plane, inclusive on the fill side.
    water_level_y: i32,
    /// Chunk key to reconciled level.
    revisions: RevisionStore,
    /// The revision of the revision store layout.
    format_revision: i32,
    /// True when the state has changed since last saved.
    dirty: bool,
}

impl Default for TerraformState {
    fn default() -> Self {
        Self {
            terraform_index: 0,
            water_level_y: DEFAULT_WATER_LEVEL,
            revisions: RevisionStore::new(),
            format_revision: FORMAT_REVISION,
            dirty: false,
        }
    }
}

impl TerraformState {

    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state from persisted parts. If the persisted format revision doesn't
    /// match the current one, the revision store is discarded and the state is marked
    /// dirty so that the upgraded layout gets written back.
    pub fn from_parts(
        terraform_index: i64,
        water_level_y: i32,
        revisions: RevisionStore,
        format_revision: i32,
    ) -> Self {

        let mut state = Self {
            terraform_index,
            water_level_y,
            revisions,
            format_revision,
            dirty: false,
        };

        state.ensure_format_revision();
        state

    }

    /// Discard the revision store if it has been written by another layout revision.
    fn ensure_format_revision(&mut self) {
        if self.format_revision != FORMAT_REVISION {
            info!("discarding {} chunk revisions from format revision {}, expected {}",
                self.revisions.len(), self.format_revision, FORMAT_REVISION);
            self.format_revision = FORMAT_REVISION;
            self.revisions.invalidate_all();
            self.dirty = true;
        }
    }

    #[inline]
    pub fn terraform_index(&self) -> i64 {
        self.terraform_index
    }

    pub fn set_terraform_index(&mut self, terraform_index: i64) {
        if self.terraform_index != terraform_index {
            self.terraform_index = terraform_index;
            self.dirty = true;
        }
    }

    #[inline]
    pub fn water_level_y(&self) -> i32 {
        self.water_level_y
    }

    /// Change the target water level, this invalidates every chunk revision. Return
    /// true if the level has actually changed. The given level is assumed to be
    /// already validated against [`WATER_LEVEL_RANGE`].
    pub fn set_water_level_y(&mut self, water_level_y: i32) -> bool {
        debug_assert!(WATER_LEVEL_RANGE.contains(&water_level_y));
        if self.water_level_y == water_level_y {
            return false;
        }
        debug!("water level {} -> {water_level_y}, invalidating {} revisions",
            self.water_level_y, self.revisions.len());
        self.water_level_y = water_level_y;
        self.revisions.invalidate_all();
        self.dirty = true;
        true
    }

    #[inline]
    pub fn format_revision(&self) -> i32 {
        self.format_revision
    }

    #[inline]
    pub fn revisions(&self) -> &RevisionStore {
        &self.revisions
    }

    /// Return true if the chunk is reconciled against the current water level.
    #[inline]
    pub fn is_chunk_reconciled(&self, key: i64) -> bool {
        self.revisions.is_reconciled(key, self.water_level_y)
    }

    /// Mark a chunk as reconciled against the given level, the state only gets dirty if
    /// the stored level changed.
    pub fn mark_chunk_reconciled(&mut self, key: i64, level: i32) {
        if self.revisions.mark_reconciled(key, level) {
            self.dirty = true;
        }
    }

    /// Forget the revision of a chunk whose content has been discarded by the host, it
    /// will be fully reconciled on its next load.
    pub fn forget_chunk(&mut self, key: i64) {
        if self.revisions.remove(key) {
            self.dirty = true;
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

}
