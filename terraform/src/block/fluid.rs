//! Fluid block special functions (mostly for water).


/// Return true if this still/moving fluid block acts like a source.
#[inline]
pub fn is_source(metadata: u8) -> bool {
    metadata == 0
}

/// Set the distance to source of a fluid block, up to 7, the falling bit is kept.
#[inline]
pub fn set_distance(metadata: &mut u8, distance: u8) {
    debug_assert!(distance <= 7);
    *metadata &= !7;
    *metadata |= distance;
}
