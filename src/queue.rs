//! Michael–Scott FIFO queue over reference-counted blocks.
//!
//! Queue nodes are blocks from the [`BlockCache`]; the links between them
//! are 32-bit descriptors stored in the first word of each block's
//! payload. `head` and `tail` in the region header are descriptors too, so
//! every pointer the queue follows is protected by a refcount (no reuse
//! while referenced) and a version tag (stale snapshots are detected).
//!
//! Region layout:
//!
//! ```text
//! [0           .. 32)           queue header (magic, sizes, head, tail, counter)
//! [32          .. 32+classes)   block cache class records
//! [32+classes  .. len)          chunk heap (node headers, then chunks)
//! ```

use crate::block_cache::{BlockCache, CLASS_TABLE_SIZE};
use crate::chunk_heap::BYTES_PER_NODE;
use crate::node::{Descriptor, NODE_INDEX_LIMIT};
use crate::sync;
use crate::{stat_add, stat_inc};
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

/// Identifies an initialized region (original wire format, NUL-padded).
pub const MAGIC: [u8; 12] = *b"IMQUE-0.1.2\0";

/// Queue header at offset 0 of the region, padded so that everything
/// behind it stays 8-aligned.
#[repr(C, align(8))]
pub struct QueueHeader {
    magic: [u8; 12],
    region_size: u32,
    head: AtomicU32,
    tail: AtomicU32,
    overflowed: AtomicU32,
    _pad: u32,
}

pub const HEADER_SIZE: usize = core::mem::size_of::<QueueHeader>();
const _: () = assert!(HEADER_SIZE == 32);

/// Offset of the chunk heap's node array within the region.
pub const ALLOC_OFFSET: usize = HEADER_SIZE + CLASS_TABLE_SIZE;

/// Smallest region that still fits the headers and a handful of nodes.
pub const MIN_REGION_SIZE: usize = ALLOC_OFFSET + 8 * BYTES_PER_NODE as usize;

/// Largest mappable region, bounded by the 22-bit node index.
pub const MAX_REGION_SIZE: usize =
    ALLOC_OFFSET + NODE_INDEX_LIMIT as usize * BYTES_PER_NODE as usize - 1;

/// Per-node byte layout inside a block payload:
/// `{ next: u32 descriptor, data_size: u32, data: [u8] }`.
pub const NODE_HEADER_SIZE: usize = 8;
const DATA_SIZE_OFFSET: usize = 4;

/// List terminator: the null descriptor.
const END: u32 = 0;

/// Scoped reference on a descriptor: acquired with `dup`, dropped with
/// `release`, so a concurrent freer can never recycle the node while the
/// reference lives. Acquisition fails if the block already died; callers
/// re-read the pointer and retry.
struct NodeRef<'a> {
    alc: &'a BlockCache,
    desc: Descriptor,
}

impl<'a> NodeRef<'a> {
    fn acquire(alc: &'a BlockCache, raw: u32) -> Option<Self> {
        let desc = Descriptor::from_raw(raw);
        if desc.is_null() || !alc.dup(desc, 1) {
            return None;
        }
        Some(Self { alc, desc })
    }

    #[inline]
    fn desc(&self) -> Descriptor {
        self.desc
    }
}

impl Drop for NodeRef<'_> {
    fn drop(&mut self) {
        let ok = self.alc.release(self.desc);
        debug_assert!(ok);
    }
}

/// The queue proper: header bookkeeping plus the two-CAS Michael–Scott
/// enqueue and the head-swing dequeue.
pub struct QueueImpl {
    region_size: u32,
    header: *mut QueueHeader,
    alc: BlockCache,
}

// SAFETY: header fields are atomics (or init-time-only plain fields); the
// pointer refers to the shared mapping for the queue's lifetime.
unsafe impl Send for QueueImpl {}
unsafe impl Sync for QueueImpl {}

impl QueueImpl {
    /// Carve the region into header, class table and heap.
    ///
    /// # Safety
    ///
    /// `base..base+len` must be a live mapping shared with all peers,
    /// 8-aligned (any page-aligned mapping qualifies), and valid for the
    /// queue's lifetime.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self {
            region_size: len.min(u32::MAX as usize) as u32,
            header: base as *mut QueueHeader,
            alc: unsafe { BlockCache::new(base.add(HEADER_SIZE), len.saturating_sub(HEADER_SIZE)) },
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.header.is_null() && self.alc.is_valid()
    }

    #[inline]
    fn header(&self) -> &QueueHeader {
        unsafe { &*self.header }
    }

    /// One-time initialization: allocator structures, then the sentinel
    /// node both `head` and `tail` start on. The magic goes in last so a
    /// peer that can read it may trust the rest of the header.
    pub fn init(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.alc.init();

        let Some(sentinel) = self.alc.allocate(NODE_HEADER_SIZE as u32) else {
            return false;
        };
        self.next_of(sentinel).store(END, Ordering::Release);
        let ok = self.alc.dup(sentinel, 1); // held by head AND tail
        debug_assert!(ok);

        let h = self.header();
        h.head.store(sentinel.raw(), Ordering::Release);
        h.tail.store(sentinel.raw(), Ordering::Release);
        h.overflowed.store(0, Ordering::Release);

        unsafe {
            ptr::addr_of_mut!((*self.header).region_size).write_volatile(self.region_size);
            ptr::addr_of_mut!((*self.header).magic).write_volatile(MAGIC);
        }
        true
    }

    /// Initialize only if the region does not already carry a matching
    /// magic and size. Best-effort: two peers racing the very first
    /// initialization must be coordinated externally.
    pub fn init_once(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        let (magic, size) = unsafe {
            (
                ptr::addr_of!((*self.header).magic).read_volatile(),
                ptr::addr_of!((*self.header).region_size).read_volatile(),
            )
        };
        if magic != MAGIC || size != self.region_size {
            return self.init();
        }
        true
    }

    /// Enqueue the concatenation of `parts`. Returns false (and counts an
    /// overflow) when no block can be allocated for the message.
    pub fn enqv(&self, parts: &[&[u8]]) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let Ok(size) = u32::try_from(NODE_HEADER_SIZE + total) else {
            self.header().overflowed.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let Some(md) = self.alc.allocate(size) else {
            self.header().overflowed.fetch_add(1, Ordering::Relaxed);
            stat_inc!(enq_overflows);
            return false;
        };

        // Fill the node before the link CAS publishes it.
        self.next_of(md).store(END, Ordering::Relaxed);
        unsafe {
            let base = self.alc.ptr(md);
            (base.add(DATA_SIZE_OFFSET) as *mut u32).write(total as u32);
            let mut offset = NODE_HEADER_SIZE;
            for part in parts {
                ptr::copy_nonoverlapping(part.as_ptr(), base.add(offset), part.len());
                offset += part.len();
            }
        }

        if !self.enq_impl(md) {
            return false;
        }
        stat_inc!(enq_count);
        stat_add!(enq_bytes, total as u64);
        true
    }

    /// Dequeue into `buf`. Returns false when the queue is empty.
    pub fn deq(&self, buf: &mut Vec<u8>) -> bool {
        let Some(md) = self.deq_impl() else {
            return false;
        };

        unsafe {
            let base = self.alc.ptr(md);
            let size = (base.add(DATA_SIZE_OFFSET) as *const u32).read() as usize;
            buf.clear();
            buf.extend_from_slice(core::slice::from_raw_parts(
                base.add(NODE_HEADER_SIZE),
                size,
            ));
        }

        let ok = self.alc.release(md);
        debug_assert!(ok);
        stat_inc!(deq_count);
        true
    }

    /// Empty iff the head node has no successor.
    pub fn is_empty(&self) -> bool {
        loop {
            let raw = self.header().head.load(Ordering::Acquire);
            let Some(head) = NodeRef::acquire(&self.alc, raw) else {
                if raw == END {
                    return true; // never initialized
                }
                std::hint::spin_loop();
                continue;
            };
            return self.next_of(head.desc()).load(Ordering::Acquire) == END;
        }
    }

    /// Number of enqueues rejected for want of memory.
    pub fn overflowed_count(&self) -> u32 {
        self.header().overflowed.load(Ordering::Relaxed)
    }

    /// Reset the overflow counter, returning the previous value.
    pub fn reset_overflowed_count(&self) -> u32 {
        sync::fetch_and_clear(&self.header().overflowed)
    }

    /// The Michael–Scott link of a node lives in the first payload word.
    #[inline]
    fn next_of(&self, desc: Descriptor) -> &AtomicU32 {
        unsafe { &*(self.alc.ptr(desc) as *const AtomicU32) }
    }

    /// Two-step enqueue: CAS the tail node's link, then swing `tail`.
    /// Whenever the tail is found lagging, any caller helps it forward
    /// first — a stalled (or dead) enqueuer must not stall the queue.
    fn enq_impl(&self, new_node: Descriptor) -> bool {
        // One reference for the predecessor's link, one for `tail`.
        let ok = self.alc.dup(new_node, 2);
        debug_assert!(ok);

        let h = self.header();
        loop {
            let raw = h.tail.load(Ordering::Acquire);
            if raw == END {
                // Enqueue on a never-initialized queue: drop all three
                // references so the block is not leaked.
                debug_assert!(false, "enq on uninitialized queue");
                for _ in 0..3 {
                    self.alc.release(new_node);
                }
                return false;
            }
            let Some(tail) = NodeRef::acquire(&self.alc, raw) else {
                std::hint::spin_loop();
                continue;
            };

            let next = self.next_of(tail.desc()).load(Ordering::Acquire);
            if next != END {
                // Lagging tail: finish someone else's second step.
                self.try_move(&h.tail, tail.desc(), next);
                continue;
            }

            if self
                .next_of(tail.desc())
                .compare_exchange(END, new_node.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.try_move(&h.tail, tail.desc(), new_node.raw());
                return true;
            }
        }
    }

    /// Swing `head` past the sentinel; the new head carries the payload.
    fn deq_impl(&self) -> Option<Descriptor> {
        let h = self.header();
        loop {
            let raw = h.head.load(Ordering::Acquire);
            if raw == END {
                return None; // never initialized
            }
            let Some(head) = NodeRef::acquire(&self.alc, raw) else {
                std::hint::spin_loop();
                continue;
            };

            let next = self.next_of(head.desc()).load(Ordering::Acquire);
            if next == END {
                return None; // empty
            }
            if self.try_move(&h.head, head.desc(), next) {
                return Some(Descriptor::from_raw(next));
            }
        }
    }

    /// CAS a header pointer forward, releasing the reference the pointer
    /// held on the node it moved off of.
    fn try_move(&self, place: &AtomicU32, from: Descriptor, to: u32) -> bool {
        if place
            .compare_exchange(from.raw(), to, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let ok = self.alc.release(from);
            debug_assert!(ok);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_queue(len: usize) -> QueueImpl {
        let layout = std::alloc::Layout::from_size_align(len, 32).unwrap();
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        let que = unsafe { QueueImpl::new(base, len) };
        assert!(que.is_valid());
        assert!(que.init());
        que
    }

    #[test]
    fn test_smoke() {
        let que = make_queue(64 * 1024);
        let mut buf = Vec::new();

        assert!(que.is_empty());
        assert!(que.enqv(&[b"hello"]));
        assert!(!que.is_empty());
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"hello");
        assert!(que.is_empty());
        assert_eq!(que.overflowed_count(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let que = make_queue(64 * 1024);
        assert!(que.enqv(&[b"a"]));
        assert!(que.enqv(&[b"bb"]));
        assert!(que.enqv(&[b"ccc"]));

        let mut buf = Vec::new();
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"a");
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"bb");
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"ccc");
        assert!(!que.deq(&mut buf));
    }

    #[test]
    fn test_enqv_concatenates() {
        let que = make_queue(64 * 1024);
        assert!(que.enqv(&[b"ab", b"", b"cde"]));

        let mut buf = Vec::new();
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"abcde");
    }

    #[test]
    fn test_zero_length_message() {
        let que = make_queue(64 * 1024);
        assert!(que.enqv(&[]));
        assert!(!que.is_empty());

        let mut buf = vec![0xAA];
        assert!(que.deq(&mut buf));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_deq_empty_returns_false() {
        let que = make_queue(64 * 1024);
        let mut buf = Vec::new();
        assert!(!que.deq(&mut buf));
    }

    #[test]
    fn test_init_once_detects_initialized_region() {
        let que = make_queue(64 * 1024);
        assert!(que.enqv(&[b"keep me"]));

        // A matching magic and size must not re-initialize.
        assert!(que.init_once());
        let mut buf = Vec::new();
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"keep me");
    }

    #[test]
    fn test_init_is_idempotent_in_effect() {
        let que = make_queue(64 * 1024);
        assert!(que.init());
        assert!(que.is_empty());
        assert!(que.enqv(&[b"x"]));
        let mut buf = Vec::new();
        assert!(que.deq(&mut buf));
        assert_eq!(buf, b"x");
        assert!(que.is_empty());
        assert_eq!(que.overflowed_count(), 0);
    }

    #[test]
    fn test_overflow_counter() {
        let que = make_queue(MIN_REGION_SIZE);
        // A message far beyond the region must be rejected and counted.
        let huge = vec![0u8; 1 << 16];
        assert!(!que.enqv(&[&huge]));
        assert_eq!(que.overflowed_count(), 1);
        assert_eq!(que.reset_overflowed_count(), 1);
        assert_eq!(que.overflowed_count(), 0);
    }
}
