//! Tessel Core
//!
//! Device-independent GPU memory management:
//! - Size-class segregated allocator for long-lived device buffers
//! - Lock-free per-frame staging ring
//! - Scene micro-patch batching (scattered writes resolved by one dispatch)
//! - Frame arena and memory configuration

pub mod config;
pub mod memory;
pub mod patch;
pub mod pool;
pub mod ring;

pub use config::{ConfigError, MemoryConfig};
pub use memory::FrameArena;
pub use patch::{apply_patches, PatchBatcher, PatchHeader, PatchUpload};
pub use pool::{
    BackingBuffer, HostBuffer, PersistentPool, PoolError, PoolLayout, PoolStats, PoolToken,
    SizeClassAllocator,
};
pub use ring::{FrameAllocation, FrameRingAllocator, RingError, RingToken};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Round `value` up to a multiple of `alignment` (any non-zero alignment).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    value.div_ceil(alignment) * alignment
}
