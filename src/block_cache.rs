//! Fixed-size-class block cache (middle-end) layered over the chunk heap.
//!
//! Freed blocks are recycled through per-class lock-free LIFO lists, so
//! steady-state traffic never touches the heap's coalescing free list —
//! each class contends on a single head word instead. The head word packs
//! `{version, descriptor}`; the version bumps on every CAS to defeat ABA
//! on the list. Requests above the largest class pass straight through to
//! the heap.

use crate::chunk_heap::ChunkHeap;
use crate::config::NUM_CLASSES;
use crate::node::Descriptor;
use crate::size_class;
use crate::stat_inc;
use crate::sync::{Pack, Snapshot};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Per-class record in the region: advisory counters plus the tagged list
/// head. 24 bytes each so consecutive `list_head` words stay 8-aligned.
#[repr(C)]
pub struct ClassRecord {
    block_size: u32,
    used: AtomicU32,
    free: AtomicU32,
    _pad: u32,
    list_head: AtomicU64,
}

pub const CLASS_RECORD_SIZE: usize = core::mem::size_of::<ClassRecord>();
const _: () = assert!(CLASS_RECORD_SIZE == 24);

/// Region bytes occupied by the class table.
pub const CLASS_TABLE_SIZE: usize = NUM_CLASSES * CLASS_RECORD_SIZE;

/// Tagged head of one class list. `next` is the raw descriptor of the
/// first cached block (0 = empty); each cached block stores its successor
/// in the first word of its payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ListHead {
    version: u32,
    next: u32,
}

impl Pack for ListHead {
    #[inline]
    fn pack(self) -> u64 {
        self.version as u64 | (self.next as u64) << 32
    }

    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            version: raw as u32,
            next: (raw >> 32) as u32,
        }
    }
}

/// Size-class recycling cache over the [`ChunkHeap`].
pub struct BlockCache {
    classes: *mut ClassRecord,
    heap: ChunkHeap,
}

// SAFETY: the class records are only mutated through their atomics after
// init; the raw pointer refers to the shared mapping (caller contract).
unsafe impl Send for BlockCache {}
unsafe impl Sync for BlockCache {}

impl BlockCache {
    /// Lay the cache out at `base`: the class table first, the chunk heap
    /// over the remainder.
    ///
    /// # Safety
    ///
    /// Same contract as [`ChunkHeap::new`]: `base..base+len` must be a live
    /// shared mapping, 32-byte aligned, valid for the cache's lifetime.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        let heap_len = len.saturating_sub(CLASS_TABLE_SIZE);
        Self {
            classes: base as *mut ClassRecord,
            heap: unsafe { ChunkHeap::new(base.add(CLASS_TABLE_SIZE), heap_len) },
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.classes.is_null() && self.heap.is_valid()
    }

    pub fn heap(&self) -> &ChunkHeap {
        &self.heap
    }

    /// One-time initialization of the class table and the heap below it.
    pub fn init(&self) {
        if !self.is_valid() {
            return;
        }
        self.heap.init();
        for cls in 0..NUM_CLASSES {
            unsafe {
                let rec = self.classes.add(cls);
                (*rec).block_size = size_class::class_size(cls);
                (*rec).used.store(0, Ordering::Release);
                (*rec).free.store(0, Ordering::Release);
                (*rec)
                    .list_head
                    .store(ListHead { version: 0, next: 0 }.pack(), Ordering::Release);
            }
        }
    }

    #[inline]
    fn class(&self, cls: usize) -> &ClassRecord {
        debug_assert!(cls < NUM_CLASSES);
        unsafe { &*self.classes.add(cls) }
    }

    /// The recycling link of a cached block lives in the first word of its
    /// payload (the block is dead while cached, so the bytes are ours).
    #[inline]
    fn link_at(&self, desc: Descriptor) -> &AtomicU32 {
        unsafe { &*(self.heap.ptr(desc) as *const AtomicU32) }
    }

    /// Allocate at least `size` bytes, preferring a recycled block of the
    /// matching class. Returns `None` on exhaustion.
    pub fn allocate(&self, size: u32) -> Option<Descriptor> {
        if size == 0 {
            return None;
        }
        let Some(cls) = size_class::class_for(size) else {
            return self.heap.allocate(size); // above the ceiling
        };
        let rec = self.class(cls);
        // The region records its geometry; it must match what we were
        // compiled with.
        debug_assert_eq!(rec.block_size, size_class::class_size(cls));

        loop {
            let mut head = Snapshot::<ListHead>::new(&rec.list_head);
            let h = head.value();
            if h.next == 0 {
                break; // class list empty
            }
            let popped = Descriptor::from_raw(h.next);
            // Read the link before the pop CAS; if the block is stolen and
            // rewritten under us the CAS fails on the version tag.
            let next = self.link_at(popped).load(Ordering::Acquire);
            if head.cas(ListHead {
                version: h.version.wrapping_add(1),
                next,
            }) {
                let fresh = self.heap.dup_new(popped.index());
                debug_assert!(fresh.is_some(), "cached block was not dead");
                rec.used.fetch_add(1, Ordering::Relaxed);
                rec.free.fetch_sub(1, Ordering::Relaxed);
                stat_inc!(cache_hits);
                return fresh;
            }
        }

        // Nothing cached: carve a class-sized block so it can come back to
        // this list when released.
        let desc = self.heap.allocate(size_class::class_size(cls))?;
        rec.used.fetch_add(1, Ordering::Relaxed);
        stat_inc!(cache_misses);
        Some(desc)
    }

    /// Drop one reference; the last reference retires the block into its
    /// class list (or back to the heap when the class has excess).
    pub fn release(&self, desc: Descriptor) -> bool {
        if desc.is_null() {
            return true;
        }
        if !self.heap.undup(desc) {
            return true; // still referenced elsewhere
        }

        let Some(cls) = size_class::class_of_block(self.heap.block_size(desc)) else {
            return self.heap.release(desc); // pass-through block
        };
        let rec = self.class(cls);

        // With more cached than in use, prefer giving the block back, but
        // only if the free list isn't contended right now.
        if rec.used.load(Ordering::Relaxed) < rec.free.load(Ordering::Relaxed)
            && self.heap.release_light(desc)
        {
            rec.used.fetch_sub(1, Ordering::Relaxed);
            return true;
        }

        loop {
            let mut head = Snapshot::<ListHead>::new(&rec.list_head);
            let h = head.value();
            self.link_at(desc).store(h.next, Ordering::Release);
            if head.cas(ListHead {
                version: h.version.wrapping_add(1),
                next: desc.raw(),
            }) {
                break;
            }
        }
        rec.used.fetch_sub(1, Ordering::Relaxed);
        rec.free.fetch_add(1, Ordering::Relaxed);
        stat_inc!(cache_returns);
        true
    }

    /// Add references to a live block; see [`ChunkHeap::dup`].
    #[inline]
    pub fn dup(&self, desc: Descriptor, delta: u32) -> bool {
        self.heap.dup(desc, delta)
    }

    /// Payload pointer for a descriptor.
    #[inline]
    pub fn ptr(&self, desc: Descriptor) -> *mut u8 {
        self.heap.ptr(desc)
    }

    /// Byte size of the block behind a descriptor.
    #[inline]
    pub fn block_size(&self, desc: Descriptor) -> u32 {
        self.heap.block_size(desc)
    }
}
