//! Serialization and deserialization utilities for the persisted terraform state.

pub mod nbt;
pub mod state;
