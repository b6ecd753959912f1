//! Data structure for storing an in-memory world with its chunks and observers.

use std::collections::HashMap;
use std::iter::FusedIterator;
use std::mem;

use glam::{IVec3, DVec3};

use crate::chunk::{Chunk, calc_chunk_pos};
use crate::voxel::{TerraformWorld, TerraformChunk};


/// Data structure for a whole world.
///
/// This structure can be used as a data structure to read and modify the world's
/// content, it is made of two kind of components:
/// - Chunks, a world is made of 16x16 columns of blocks, every chunk is owned by the
///   world and must be present in order to set block in the world.
/// - Observers, anonymous positions in the world around which work should be done
///   first, they are referred to by their unique id.
///
/// This data structure is not designed to handle automatic chunk loading and saving,
/// every chunk needs to be manually inserted and removed.
///
/// # Events
///
/// This structure also allows listening for events within it through a queue of
/// [`Event`], events listening is disabled by default but can be enabled by swapping
/// a `Vec<Event>` into the world using the [`World::swap_events`].
#[derive(Default)]
pub struct World {
    /// When enabled, this contains the list of events that happened in the world since
    /// it was last swapped. By temporarily taking ownership of events, the caller can
    /// get a mutable reference to that world at the same time.
    events: Option<Vec<Event>>,
    /// The mapping of world chunks.
    chunks: HashMap<(i32, i32), Box<Chunk>>,
    /// Total observers count spawned since the world is running. Also used to give
    /// observers a unique id.
    observers_count: u32,
    /// Observers' position mapping from their unique id.
    observers: HashMap<u32, DVec3>,
}

impl World {

    /// Create a new empty world with no events queue by default, so events are disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// This function can be used to swap in a new events queue and return the previous
    /// one if relevant. Giving *None* events queue disable events registration using
    /// the [`Self::push_event`] method. Swapping out the events is the only way of
    /// reading them afterward.
    pub fn swap_events(&mut self, events: Option<Vec<Event>>) -> Option<Vec<Event>> {
        mem::replace(&mut self.events, events)
    }

    /// Push an event in this world. This only actually push the event if events are
    /// enabled.
    #[inline]
    pub fn push_event(&mut self, event: Event) {
        if let Some(events) = &mut self.events {
            events.push(event);
        }
    }

    // =================== //
    //        CHUNKS       //
    // =================== //

    /// Insert a chunk at the specified position, replacing any previous one.
    pub fn set_chunk(&mut self, cx: i32, cz: i32, chunk: Box<Chunk>) {
        self.chunks.insert((cx, cz), chunk);
        self.push_event(Event::Chunk { cx, cz, inner: ChunkEvent::Set });
    }

    /// Return true if a chunk is loaded at the given position.
    #[inline]
    pub fn contains_chunk(&self, cx: i32, cz: i32) -> bool {
        self.chunks.contains_key(&(cx, cz))
    }

    #[inline]
    pub fn get_chunk(&self, cx: i32, cz: i32) -> Option<&Chunk> {
        self.chunks.get(&(cx, cz)).map(|chunk| &**chunk)
    }

    #[inline]
    pub fn get_chunk_mut(&mut self, cx: i32, cz: i32) -> Option<&mut Chunk> {
        self.chunks.get_mut(&(cx, cz)).map(|chunk| &mut **chunk)
    }

    /// Remove a chunk at the given position, returning it if it was present.
    pub fn remove_chunk(&mut self, cx: i32, cz: i32) -> Option<Box<Chunk>> {
        let ret = self.chunks.remove(&(cx, cz));
        if ret.is_some() {
            self.push_event(Event::Chunk { cx, cz, inner: ChunkEvent::Remove });
        }
        ret
    }

    /// Return the number of loaded chunks.
    #[inline]
    pub fn get_chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterate over the position of all loaded chunks, in no particular order.
    pub fn iter_chunks(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.chunks.keys().copied()
    }

    // =================== //
    //        BLOCKS       //
    // =================== //

    /// Set block and metadata at given position in the world, if the chunk is not
    /// loaded, none is returned, but if it is existing the previous block and metadata
    /// is returned. The chunk is marked dirty if the block actually changed.
    pub fn set_block(&mut self, pos: IVec3, id: u8, metadata: u8) -> Option<(u8, u8)> {

        let (cx, cz) = calc_chunk_pos(pos)?;
        let chunk = self.get_chunk_mut(cx, cz)?;

        let (prev_id, prev_metadata) = chunk.block_and_metadata(pos);
        if (prev_id, prev_metadata) != (id, metadata) {

            chunk.set_block_and_metadata(pos, id, metadata);
            chunk.set_dirty();

            self.push_event(Event::Block {
                pos,
                inner: BlockEvent::Set {
                    id,
                    metadata,
                    prev_id,
                    prev_metadata,
                }
            });

        }

        Some((prev_id, prev_metadata))

    }

    /// Get block and metadata at given position in the world, if the chunk is not
    /// loaded, none is returned.
    pub fn get_block(&self, pos: IVec3) -> Option<(u8, u8)> {
        let (cx, cz) = calc_chunk_pos(pos)?;
        let chunk = self.get_chunk(cx, cz)?;
        Some(chunk.block_and_metadata(pos))
    }

    // =================== //
    //      OBSERVERS      //
    // =================== //

    /// Spawn a new observer at the given position and return its unique id.
    pub fn spawn_observer(&mut self, pos: DVec3) -> u32 {
        let id = self.observers_count;
        self.observers_count = self.observers_count.wrapping_add(1);
        self.observers.insert(id, pos);
        self.push_event(Event::Observer { id, inner: ObserverEvent::Spawn });
        id
    }

    /// Return true if an observer with the given id exists.
    #[inline]
    pub fn contains_observer(&self, id: u32) -> bool {
        self.observers.contains_key(&id)
    }

    #[inline]
    pub fn get_observer(&self, id: u32) -> Option<DVec3> {
        self.observers.get(&id).copied()
    }

    /// Move an existing observer, return false if it doesn't exist.
    pub fn set_observer_pos(&mut self, id: u32, pos: DVec3) -> bool {
        let Some(prev) = self.observers.get_mut(&id) else { return false };
        if *prev != pos {
            *prev = pos;
            self.push_event(Event::Observer { id, inner: ObserverEvent::Position { pos } });
        }
        true
    }

    /// Remove an observer, return false if it doesn't exist.
    pub fn remove_observer(&mut self, id: u32) -> bool {
        if self.observers.remove(&id).is_some() {
            self.push_event(Event::Observer { id, inner: ObserverEvent::Remove });
            true
        } else {
            false
        }
    }

    /// Return the number of observers in this world.
    #[inline]
    pub fn get_observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Iterate over all observers and their position, in no particular order.
    pub fn iter_observers(&self) -> impl Iterator<Item = (u32, DVec3)> + '_ {
        self.observers.iter().map(|(&id, &pos)| (id, pos))
    }

}

impl TerraformWorld for World {

    type Chunk = Chunk;

    #[inline]
    fn is_chunk_loaded(&self, cx: i32, cz: i32) -> bool {
        self.contains_chunk(cx, cz)
    }

    #[inline]
    fn get_chunk_mut(&mut self, cx: i32, cz: i32) -> Option<&mut Chunk> {
        World::get_chunk_mut(self, cx, cz)
    }

    #[inline]
    fn iter_observers(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.observers.values().copied()
    }

}


/// An event that happened in the world.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An event with a chunk.
    Chunk {
        /// The chunk X position.
        cx: i32,
        /// The chunk Z position.
        cz: i32,
        /// Inner chunk event.
        inner: ChunkEvent,
    },
    /// An event with a block.
    Block {
        /// The position of the block.
        pos: IVec3,
        /// Inner block event.
        inner: BlockEvent,
    },
    /// An event with an observer given its id.
    Observer {
        /// The unique id of the observer.
        id: u32,
        /// Inner observer event.
        inner: ObserverEvent,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    /// The chunk has been set, it may be a new chunk or a replacement one.
    Set,
    /// The chunk has been removed from the world.
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockEvent {
    /// A block has been changed in the world.
    Set {
        /// The new block id.
        id: u8,
        /// The new block metadata.
        metadata: u8,
        /// Previous block id.
        prev_id: u8,
        /// Previous block metadata.
        prev_metadata: u8,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    /// The observer has been spawned.
    Spawn,
    /// The observer has been moved to the given position.
    Position {
        pos: DVec3,
    },
    /// The observer has been removed.
    Remove,
}


/// Iterator of chunk coordinates, both start and end are inclusive, X is iterated first.
#[derive(Debug, Clone)]
pub struct ChunkRange {
    cx: i32,
    cz: i32,
    start_cx: i32,
    end_cx: i32,
    end_cz: i32,
}

impl ChunkRange {

    /// Construct a chunk range iterator, note that both start and end are included in
    /// the range.
    #[inline]
    pub fn new(start_cx: i32, start_cz: i32, end_cx: i32, end_cz: i32) -> Self {
        Self {
            cx: start_cx,
            cz: start_cz,
            start_cx,
            end_cx,
            end_cz,
        }
    }

    /// Construct a chunk range iterator over the square of the given radius around the
    /// center chunk, the center is included.
    #[inline]
    pub fn around(cx: i32, cz: i32, radius: u8) -> Self {
        let radius = radius as i32;
        Self::new(
            cx.saturating_sub(radius),
            cz.saturating_sub(radius),
            cx.saturating_add(radius),
            cz.saturating_add(radius))
    }

}

impl FusedIterator for ChunkRange {}
impl Iterator for ChunkRange {

    type Item = (i32, i32);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {

        if self.cx > self.end_cx || self.cz > self.end_cz {
            return None;
        }

        let ret = (self.cx, self.cz);

        if self.cx == self.end_cx {
            if self.cz == self.end_cz {
                // Make the next call fail without overflowing.
                self.start_cx = 1;
                self.cx = 1;
                self.end_cx = 0;
            } else {
                self.cx = self.start_cx;
                self.cz += 1;
            }
        } else {
            self.cx += 1;
        }

        Some(ret)

    }

}
