//! Frame-scoped CPU memory context
//!
//! The arena identifies the frame being recorded and tracks how many bytes
//! of CPU-side staging were produced for it. Per-frame containers key
//! their lifetime on [`FrameArena::frame_index`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-frame allocation tracker handed to producers by the frame orchestrator.
pub struct FrameArena {
    frame_index: u64,
    frame_allocations: AtomicU64,
}

impl FrameArena {
    pub fn new() -> Self {
        Self {
            frame_index: 0,
            frame_allocations: AtomicU64::new(0),
        }
    }

    /// Start a new frame. Anything keyed on the previous index is stale.
    pub fn begin_frame(&mut self) -> u64 {
        self.frame_index += 1;
        *self.frame_allocations.get_mut() = 0;
        self.frame_index
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn record_allocation(&self, bytes: u64) {
        self.frame_allocations.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn frame_allocations(&self) -> u64 {
        self.frame_allocations.load(Ordering::Relaxed)
    }
}

impl Default for FrameArena {
    fn default() -> Self {
        Self::new()
    }
}
