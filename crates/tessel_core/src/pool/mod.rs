//! Long-lived device memory pools
//!
//! A [`SizeClassAllocator`] hands out chunks of one growable backing buffer
//! from segregated free lists. [`PersistentPool`] wraps it for shared use
//! across threads.

mod backing;
mod persistent;
mod size_class;

pub use backing::{BackingBuffer, HostBuffer};
pub use persistent::PersistentPool;
pub use size_class::{PoolLayout, PoolStats, SizeClassAllocator};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{pool} pool out of memory: {requested} bytes requested, ceiling is {ceiling} bytes")]
    OutOfMemory {
        pool: &'static str,
        requested: u64,
        ceiling: u64,
    },
}

/// Identifies one chunk handed out by a pool.
///
/// Tokens are plain values. [`PoolToken::UNUSED`] marks "no data" so that
/// consumers can bind a dummy resource instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolToken {
    offset: u64,
    size: u64,
    chunk_size: u64,
    class: u32,
}

impl PoolToken {
    pub const UNUSED: Self = Self {
        offset: u64::MAX,
        size: 0,
        chunk_size: 0,
        class: u32::MAX,
    };

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.offset == u64::MAX
    }

    /// Byte offset of the chunk inside the pool's buffer.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes the caller asked for.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes actually reserved (the class size, or the aligned request for
    /// the final class).
    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    #[inline]
    pub fn class(&self) -> u32 {
        self.class
    }
}

impl Default for PoolToken {
    fn default() -> Self {
        Self::UNUSED
    }
}
