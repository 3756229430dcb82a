//! Build-generated configuration constants.
//!
//! The values come from `memque.toml` (or the file named by the
//! `MEMQUE_CONFIG` env var) and are validated by `build.rs`.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

/// Number of block cache classes.
pub const NUM_CLASSES: usize = BLOCK_CLASSES.len();

/// Largest size served by the block cache. Larger requests go straight to
/// the chunk heap.
pub const MAX_BLOCK_SIZE: u32 = BLOCK_CLASSES[NUM_CLASSES - 1];
