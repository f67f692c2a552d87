/// Generic slot arena with index reuse, backing the tracker's and
/// dispatcher's typed-index arenas.
pub mod arena;

/// Small bit-twiddling helpers shared by the on-disk header layouts.
pub mod math;

/// Physical core count, used to size worker pools when not configured explicitly.
pub mod system_info;
