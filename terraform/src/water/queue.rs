//! Chunk work queue with a priority lane and a normal lane.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;
use tracing::trace;

use crate::chunk::chunk_key_pos;


/// The amount of work a chunk task has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskScope {
    /// Scan the whole chunk, every column.
    Full,
    /// Only scan the boundary ring columns of the chunk, used to repair the seams with
    /// a freshly reconciled neighbor.
    Cleanup,
}

/// One of the two queue lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Priority,
    Normal,
}

/// Pending or in flight work for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWork {
    /// The chunk X coordinate.
    pub cx: i32,
    /// The chunk Z coordinate.
    pub cz: i32,
    /// The amount of work to do.
    pub scope: TaskScope,
    /// Offset of the next section to scan, from the lowest section of the chunk.
    pub cursor: u32,
    /// The lane this task is queued in, none when the task has been popped and is in
    /// flight.
    lane: Option<Lane>,
}

impl ChunkWork {

    fn new(key: i64, scope: TaskScope) -> Self {
        let (cx, cz) = chunk_key_pos(key);
        Self { cx, cz, scope, cursor: 0, lane: Some(Lane::Normal) }
    }

    /// Return the lane this work is queued in, none if in flight.
    #[inline]
    pub fn lane(&self) -> Option<Lane> {
        self.lane
    }

    /// Return true if the task has been popped and is not yet finished or requeued.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.lane.is_none()
    }

}


/// The queue of chunk works.
///
/// Every task belongs to a loaded chunk, a queued task is in exactly one lane and an in
/// flight task is in none of them. Both lanes are FIFO, promotion moves a task to the
/// front of the priority lane.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    /// Chunks currently reported loaded, in the order they were loaded.
    loaded: IndexSet<i64>,
    /// Chunk keys in the priority lane.
    priority: VecDeque<i64>,
    /// Chunk keys in the normal lane.
    normal: VecDeque<i64>,
    /// Chunk works, queued or in flight.
    tasks: HashMap<i64, ChunkWork>,
}

impl ChunkQueue {

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<i64> {
        match lane {
            Lane::Priority => &mut self.priority,
            Lane::Normal => &mut self.normal,
        }
    }

    /// Remove the given key from the lane, the key is searched from the front.
    fn remove_from_lane(&mut self, lane: Lane, key: i64) {
        let lane = self.lane_mut(lane);
        if let Some(index) = lane.iter().position(|&k| k == key) {
            lane.remove(index);
        }
    }

    /// Track the given chunk as loaded, without creating any task. Return true if it
    /// was not already tracked.
    pub fn track_loaded(&mut self, key: i64) -> bool {
        self.loaded.insert(key)
    }

    /// Track the chunk as loaded and ensure that it has a task. A stale chunk gets a
    /// full task that is promoted, an already reconciled one only gets a cleanup task
    /// if it has no task yet.
    pub fn note_loaded(&mut self, key: i64, reconciled: bool) {
        self.track_loaded(key);
        if reconciled {
            self.ensure_task(key, TaskScope::Cleanup);
        } else {
            self.ensure_task(key, TaskScope::Full);
            self.promote(key);
        }
    }

    /// Forget the chunk and cancel its task, any progress is lost.
    pub fn note_unloaded(&mut self, key: i64) {
        self.loaded.shift_remove(&key);
        self.finish(key);
    }

    /// Drop every task and create a fresh full task in the normal lane for every loaded
    /// chunk, in the order they were loaded.
    pub fn requeue_all(&mut self) {
        self.tasks.clear();
        self.priority.clear();
        self.normal.clear();
        for &key in &self.loaded {
            self.tasks.insert(key, ChunkWork::new(key, TaskScope::Full));
            self.normal.push_back(key);
        }
    }

    /// Ensure that the chunk has a task with at least the given scope. A new task is
    /// pushed at the back of the normal lane, a full request upgrades an existing
    /// cleanup task and restarts it from the lowest section. Return false if the chunk
    /// is not loaded and therefore can't have any task.
    pub fn ensure_task(&mut self, key: i64, scope: TaskScope) -> bool {

        if !self.loaded.contains(&key) {
            return false;
        }

        match self.tasks.get_mut(&key) {
            Some(work) => {
                if scope == TaskScope::Full && work.scope == TaskScope::Cleanup {
                    work.scope = TaskScope::Full;
                    work.cursor = 0;
                }
            }
            None => {
                self.tasks.insert(key, ChunkWork::new(key, scope));
                self.normal.push_back(key);
            }
        }

        true

    }

    /// Ensure that the chunk has at least a cleanup task, an existing full task is kept.
    #[inline]
    pub fn flag_cleanup(&mut self, key: i64) -> bool {
        self.ensure_task(key, TaskScope::Cleanup)
    }

    /// Move the chunk's task to the front of the priority lane, whatever its current
    /// lane. Return false if the chunk has no task or its task is in flight.
    pub fn promote(&mut self, key: i64) -> bool {

        let Some(work) = self.tasks.get_mut(&key) else { return false };
        let Some(lane) = work.lane else { return false };
        work.lane = Some(Lane::Priority);

        if lane == Lane::Priority && self.priority.front() == Some(&key) {
            return true;
        }

        self.remove_from_lane(lane, key);
        self.priority.push_front(key);
        trace!("promoted chunk {:?}", chunk_key_pos(key));
        true

    }

    /// Pop the next task from the preferred lane, falling back to the other one. The
    /// task stays in flight until it is finished or requeued.
    pub fn pop_next(&mut self, prefer: Lane) -> Option<(i64, Lane)> {

        let fallback = match prefer {
            Lane::Priority => Lane::Normal,
            Lane::Normal => Lane::Priority,
        };

        for lane in [prefer, fallback] {
            if let Some(key) = self.lane_mut(lane).pop_front() {
                if let Some(work) = self.tasks.get_mut(&key) {
                    work.lane = None;
                }
                return Some((key, lane));
            }
        }

        None

    }

    /// Push an in flight task at the back of the given lane. Return false if the chunk
    /// has no task or its task is not in flight.
    pub fn requeue(&mut self, key: i64, lane: Lane) -> bool {
        let Some(work) = self.tasks.get_mut(&key) else { return false };
        if work.lane.is_some() {
            return false;
        }
        work.lane = Some(lane);
        self.lane_mut(lane).push_back(key);
        true
    }

    /// Remove the task of the given chunk, whether it's queued or in flight, and return
    /// it. The chunk stays loaded.
    pub fn finish(&mut self, key: i64) -> Option<ChunkWork> {
        let work = self.tasks.remove(&key)?;
        if let Some(lane) = work.lane {
            self.remove_from_lane(lane, key);
        }
        Some(work)
    }

    #[inline]
    pub fn is_loaded(&self, key: i64) -> bool {
        self.loaded.contains(&key)
    }

    #[inline]
    pub fn has_task(&self, key: i64) -> bool {
        self.tasks.contains_key(&key)
    }

    #[inline]
    pub fn task(&self, key: i64) -> Option<&ChunkWork> {
        self.tasks.get(&key)
    }

    #[inline]
    pub fn task_mut(&mut self, key: i64) -> Option<&mut ChunkWork> {
        self.tasks.get_mut(&key)
    }

    /// Return the lane of the chunk's task, none if it has no task or is in flight.
    #[inline]
    pub fn lane_of(&self, key: i64) -> Option<Lane> {
        self.tasks.get(&key).and_then(|work| work.lane)
    }

    /// Return the number of tasks, queued or in flight.
    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Return true if there is no task.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[inline]
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    #[inline]
    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }

    #[inline]
    pub fn normal_len(&self) -> usize {
        self.normal.len()
    }

    /// Check every structural invariant of the queue, used by tests.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        for (&key, work) in &self.tasks {
            assert!(self.loaded.contains(&key), "task for unloaded chunk {key}");
            let in_priority = self.priority.iter().filter(|&&k| k == key).count();
            let in_normal = self.normal.iter().filter(|&&k| k == key).count();
            match work.lane {
                Some(Lane::Priority) => assert_eq!((in_priority, in_normal), (1, 0)),
                Some(Lane::Normal) => assert_eq!((in_priority, in_normal), (0, 1)),
                None => assert_eq!((in_priority, in_normal), (0, 0)),
            }
        }
        for key in self.priority.iter().chain(self.normal.iter()) {
            assert!(self.tasks.contains_key(key), "lane key {key} without task");
        }
    }

}
