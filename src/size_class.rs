//! Size class lookup for the block cache.
//!
//! Requests are rounded up to one of the configured power-of-two block
//! sizes so freed blocks can be recycled by class. The table itself is
//! generated at build time from `memque.toml`.

use crate::config::{BLOCK_CLASSES, MAX_BLOCK_SIZE};

/// Smallest class whose block size fits `size`, or `None` for requests
/// above the largest class (those bypass the cache).
#[inline]
pub fn class_for(size: u32) -> Option<usize> {
    if size > MAX_BLOCK_SIZE {
        return None;
    }
    // The table has 8 entries; a linear scan beats anything fancier.
    BLOCK_CLASSES.iter().position(|&b| b >= size)
}

/// Class whose block size is exactly `size` — the release-side lookup.
/// Cached blocks are always allocated at exact class sizes, so anything
/// else is a pass-through block.
#[inline]
pub fn class_of_block(size: u32) -> Option<usize> {
    if size > MAX_BLOCK_SIZE {
        return None;
    }
    BLOCK_CLASSES.iter().position(|&b| b == size)
}

/// Block size of a class.
#[inline]
pub fn class_size(cls: usize) -> u32 {
    BLOCK_CLASSES[cls]
}
