//! A throttled and resumable terraforming engine, keeping a voxel world consistent with
//! a global water level.

pub mod io;

pub mod block;
pub mod voxel;

pub mod chunk;
pub mod world;
pub mod state;
pub mod serde;

pub mod water;
pub mod surface;
pub mod manager;
