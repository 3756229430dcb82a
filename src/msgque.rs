//! Public queue facade.
//!
//! [`MsgQueue`] attaches to a shared region, validates its geometry, and
//! exposes the message queue operations. The region is self-describing:
//! after one process runs [`init`](MsgQueue::init) once, any peer that
//! maps the same bytes can enqueue and dequeue.

use crate::queue::{MAX_REGION_SIZE, MIN_REGION_SIZE, QueueImpl};
use crate::region::{RegionError, SharedMemory};
use core::marker::PhantomData;

/// A lock-free multi-process FIFO message queue over a shared region.
///
/// Operations never block: `enq` fails (and counts an overflow) when the
/// region is out of memory, `deq` fails when the queue is empty, and
/// callers poll. Every attached peer is an equal — there is no owning
/// process and no background task.
pub struct MsgQueue<'a> {
    que: QueueImpl,
    _region: PhantomData<&'a SharedMemory>,
}

impl<'a> MsgQueue<'a> {
    /// Attach to a mapped region.
    pub fn new(shm: &'a SharedMemory) -> Result<Self, RegionError> {
        unsafe { Self::from_raw(shm.ptr(), shm.len()) }
    }

    /// Attach to a caller-provided region.
    ///
    /// # Safety
    ///
    /// `base..base+len` must be a live mapping shared with all peers,
    /// page-aligned, coherent, and valid for `'a`. Aligned 32- and 64-bit
    /// accesses within it must be atomic across peers.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Result<Self, RegionError> {
        if base.is_null() {
            return Err(RegionError::Null);
        }
        if len < MIN_REGION_SIZE {
            return Err(RegionError::TooSmall {
                len,
                min: MIN_REGION_SIZE,
            });
        }
        if len > MAX_REGION_SIZE {
            return Err(RegionError::TooLarge {
                len,
                max: MAX_REGION_SIZE,
            });
        }

        let que = unsafe { QueueImpl::new(base, len) };
        debug_assert!(que.is_valid());
        Ok(Self {
            que,
            _region: PhantomData,
        })
    }

    /// One-time initialization of the region. Exactly one peer must run
    /// this (or [`init_once`](Self::init_once)) before any operation.
    pub fn init(&self) -> bool {
        self.que.init()
    }

    /// Initialize only if the region's magic or recorded size mismatch —
    /// the safe way to attach to a file that may already carry a queue.
    pub fn init_once(&self) -> bool {
        self.que.init_once()
    }

    /// Append one message. False means the allocation failed; the
    /// overflow counter was incremented.
    pub fn enq(&self, data: &[u8]) -> bool {
        self.que.enqv(&[data])
    }

    /// Append the concatenation of `parts` as one message.
    pub fn enqv(&self, parts: &[&[u8]]) -> bool {
        self.que.enqv(parts)
    }

    /// Pop the oldest message into `buf`. False means the queue was empty.
    pub fn deq(&self, buf: &mut Vec<u8>) -> bool {
        self.que.deq(buf)
    }

    pub fn is_empty(&self) -> bool {
        self.que.is_empty()
    }

    /// Number of `enq` calls rejected since init (or the last reset).
    pub fn overflowed_count(&self) -> u32 {
        self.que.overflowed_count()
    }

    /// Zero the overflow counter and return its previous value.
    pub fn reset_overflowed_count(&self) -> u32 {
        self.que.reset_overflowed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MIN_REGION_SIZE;

    #[test]
    fn test_attach_and_roundtrip() {
        let shm = SharedMemory::anonymous(64 * 1024).unwrap();
        let que = MsgQueue::new(&shm).unwrap();
        assert!(que.init());

        assert!(que.enq(b"hello"));
        let mut buf = Vec::new();
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"hello");
        assert!(que.is_empty());
    }

    #[test]
    fn test_rejects_undersized_region() {
        let shm = SharedMemory::anonymous(MIN_REGION_SIZE - 1).unwrap();
        match MsgQueue::new(&shm) {
            Err(RegionError::TooSmall { min, .. }) => assert_eq!(min, MIN_REGION_SIZE),
            other => panic!("expected TooSmall, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_rejects_null_region() {
        match unsafe { MsgQueue::from_raw(core::ptr::null_mut(), 1 << 20) } {
            Err(RegionError::Null) => {}
            other => panic!("expected Null, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_two_handles_one_region() {
        let shm = SharedMemory::anonymous(64 * 1024).unwrap();
        let p1 = MsgQueue::new(&shm).unwrap();
        let p2 = MsgQueue::new(&shm).unwrap();
        assert!(p1.init());

        let mut buf = Vec::new();
        assert!(p1.enq(b"X"));
        assert!(p2.deq(&mut buf));
        assert_eq!(buf, b"X");

        assert!(p2.enq(b"Y"));
        assert!(p1.deq(&mut buf));
        assert_eq!(buf, b"Y");
    }
}
