//! memque: a lock-free, multi-process, shared-memory FIFO message queue.
//!
//! Producers and consumers are arbitrary OS processes (or threads) that
//! map the same byte region and exchange variable-size messages with no
//! kernel-mediated synchronization on the hot path. The region is
//! self-describing: after one peer initializes it, any process that maps
//! it can enqueue and dequeue. Three tiers:
//! - Chunk heap (back-end): lock-free variable-size allocator with
//!   traversal-time coalescing
//! - Block cache (middle-end): per-size-class recycling lists
//! - Queue (front-end): Michael–Scott FIFO over reference-counted blocks
//!
//! # Usage
//!
//! ```no_run
//! use memque::{MsgQueue, SharedMemory};
//!
//! let shm = SharedMemory::open("/tmp/queue.shm", 1 << 20)?;
//! let que = MsgQueue::new(&shm)?;
//! que.init_once();
//!
//! que.enq(b"hello");
//! let mut buf = Vec::new();
//! while !que.deq(&mut buf) { /* poll */ }
//! # Ok::<(), memque::RegionError>(())
//! ```

pub mod block_cache;
pub mod chunk_heap;
pub mod config;
mod macros;
pub mod msgque;
pub mod node;
pub mod queue;
pub mod region;
pub mod size_class;
pub mod sync;

cfg_if::cfg_if! {
    if #[cfg(feature = "stats")] {
        pub mod stats;
    }
}

// Re-export the public surface at the crate root for convenience.
pub use msgque::MsgQueue;
pub use node::Descriptor;
pub use region::{RegionError, SharedMemory};
