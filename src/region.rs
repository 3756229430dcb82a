//! Shared memory region provider.
//!
//! The queue only needs a `(pointer, length)` pair into memory that all
//! peers see coherently, with atomicity of aligned 32- and 64-bit
//! accesses. [`SharedMemory`] covers the two common ways of getting one:
//! an unnamed mapping handed to children, and a named file any process can
//! open. Anything else (hugetlbfs, `shm_open`, a pre-existing mapping) can
//! go through [`MsgQueue::from_raw`](crate::MsgQueue::from_raw) instead.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::Path;
use thiserror::Error;

/// Why a region could not be mapped or attached.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region mapping failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("null region pointer")]
    Null,

    #[error("region of {len} bytes is too small (minimum {min})")]
    TooSmall { len: usize, min: usize },

    #[error("region of {len} bytes exceeds the addressable maximum ({max})")]
    TooLarge { len: usize, max: usize },
}

/// A writable `MAP_SHARED` byte region, unmapped on drop.
pub struct SharedMemory {
    map: MmapMut,
}

impl SharedMemory {
    /// An unnamed shared region: an unlinked temporary file mapped
    /// shared. Fork-inherited or passed by fd, children see the same
    /// bytes; the backing file vanishes with the last user.
    pub fn anonymous(size: usize) -> Result<Self, RegionError> {
        let file = tempfile::tempfile()?;
        file.set_len(size as u64)?;
        let map = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        Ok(Self { map })
    }

    /// A named shared region: the file is created if missing and resized
    /// to `size`, so unrelated processes agree on the geometry by opening
    /// the same path.
    pub fn open<P: AsRef<Path>>(path: P, size: usize) -> Result<Self, RegionError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(size as u64)?;
        let map = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        Ok(Self { map })
    }

    /// Base pointer of the mapping. Mutation happens through atomics in
    /// the layers above, which is why a shared borrow suffices.
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.map.as_ptr() as *mut u8
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_region_is_zeroed_and_writable() {
        let shm = SharedMemory::anonymous(4096).unwrap();
        assert_eq!(shm.len(), 4096);
        unsafe {
            for i in 0..4096 {
                assert_eq!(*shm.ptr().add(i), 0);
            }
            *shm.ptr() = 0xAB;
            assert_eq!(*shm.ptr(), 0xAB);
        }
    }

    #[test]
    fn test_named_region_shares_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let a = SharedMemory::open(&path, 8192).unwrap();
        let b = SharedMemory::open(&path, 8192).unwrap();
        unsafe {
            *a.ptr().add(100) = 0x5A;
            assert_eq!(*b.ptr().add(100), 0x5A);
        }
    }

    #[test]
    fn test_region_is_page_aligned() {
        let shm = SharedMemory::anonymous(4096).unwrap();
        assert_eq!(shm.ptr() as usize % 4096, 0);
    }
}
