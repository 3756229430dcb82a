//! Operation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and
//! never used as synchronization. These live in process-local memory, not
//! in the shared region, so each attached process sees its own traffic.
//! (The one shared statistic, the overflow counter, lives in the region
//! header and is read through the queue API.)
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! each atomic but not globally consistent with one another.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Queue traffic ----
    /// Successful enqueues.
    pub enq_count: AtomicU64,
    /// Successful dequeues.
    pub deq_count: AtomicU64,
    /// Payload bytes accepted by successful enqueues.
    pub enq_bytes: AtomicU64,
    /// Enqueues rejected for want of memory.
    pub enq_overflows: AtomicU64,

    // ---- Block cache ----
    /// Allocations served from a class free list.
    pub cache_hits: AtomicU64,
    /// Allocations that fell through to the chunk heap.
    pub cache_misses: AtomicU64,
    /// Blocks retired into a class free list.
    pub cache_returns: AtomicU64,

    // ---- Chunk heap ----
    /// Blocks carved from the heap free list.
    pub heap_allocs: AtomicU64,
    /// Chunks handed out by the heap.
    pub heap_alloc_chunks: AtomicU64,
    /// Blocks spliced back into the heap free list.
    pub heap_releases: AtomicU64,
    /// Adjacent free ranges merged during traversal.
    pub joins: AtomicU64,
    /// Free-list traversals restarted on a stale snapshot.
    pub traversal_retries: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            enq_count: AtomicU64::new(0),
            deq_count: AtomicU64::new(0),
            enq_bytes: AtomicU64::new(0),
            enq_overflows: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_returns: AtomicU64::new(0),
            heap_allocs: AtomicU64::new(0),
            heap_alloc_chunks: AtomicU64::new(0),
            heap_releases: AtomicU64::new(0),
            joins: AtomicU64::new(0),
            traversal_retries: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of this process's operation counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Successful enqueues.
    pub enq_count: u64,
    /// Successful dequeues.
    pub deq_count: u64,
    /// Payload bytes accepted by successful enqueues.
    pub enq_bytes: u64,
    /// Enqueues rejected for want of memory.
    pub enq_overflows: u64,
    /// Allocations served from a class free list.
    pub cache_hits: u64,
    /// Allocations that fell through to the chunk heap.
    pub cache_misses: u64,
    /// Blocks retired into a class free list.
    pub cache_returns: u64,
    /// Blocks carved from the heap free list.
    pub heap_allocs: u64,
    /// Chunks handed out by the heap.
    pub heap_alloc_chunks: u64,
    /// Blocks spliced back into the heap free list.
    pub heap_releases: u64,
    /// Adjacent free ranges merged during traversal.
    pub joins: u64,
    /// Free-list traversals restarted on a stale snapshot.
    pub traversal_retries: u64,
}

/// Load all counters with `Relaxed` ordering.
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        enq_count: s.enq_count.load(Ordering::Relaxed),
        deq_count: s.deq_count.load(Ordering::Relaxed),
        enq_bytes: s.enq_bytes.load(Ordering::Relaxed),
        enq_overflows: s.enq_overflows.load(Ordering::Relaxed),
        cache_hits: s.cache_hits.load(Ordering::Relaxed),
        cache_misses: s.cache_misses.load(Ordering::Relaxed),
        cache_returns: s.cache_returns.load(Ordering::Relaxed),
        heap_allocs: s.heap_allocs.load(Ordering::Relaxed),
        heap_alloc_chunks: s.heap_alloc_chunks.load(Ordering::Relaxed),
        heap_releases: s.heap_releases.load(Ordering::Relaxed),
        joins: s.joins.load(Ordering::Relaxed),
        traversal_retries: s.traversal_retries.load(Ordering::Relaxed),
    }
}
