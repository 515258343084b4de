//! Per-frame staging ring
//!
//! One fixed block of host-visible memory shared by every producer of
//! short-lived GPU data (uniforms, cluster lists, patch streams). The only
//! point of contention is a single atomic cursor: callers `fetch_add` their
//! aligned size and take the result modulo the capacity. The cursor never
//! goes backwards, so ranges handed out within one frame never overlap.
//!
//! Requests that would straddle the physical end of the buffer are retried
//! instead of split. The straddle test compares the start offset (modulo
//! `capacity`) against the end offset modulo `capacity + 1`; the extra one
//! lets a range that ends exactly on the buffer end pass.

use crate::align_up;
use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use tessel_metrics::{Counter, RingBuffer};
use thiserror::Error;

const USAGE_HISTORY_FRAMES: usize = 120;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error(
        "staging ring out of space: {requested} bytes requested, {used} of {capacity} bytes used this frame"
    )]
    OutOfSpace {
        requested: u64,
        used: u64,
        capacity: u64,
    },
}

/// Byte range inside the staging ring. Valid only for the frame it was
/// produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingToken {
    pub offset: u64,
    pub range: u64,
}

impl RingToken {
    pub const UNUSED: Self = Self {
        offset: u64::MAX,
        range: u64::MAX,
    };

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.offset == u64::MAX && self.range == u64::MAX
    }
}

impl Default for RingToken {
    fn default() -> Self {
        Self::UNUSED
    }
}

/// Memory handed to one caller for the current frame.
pub struct FrameAllocation<'a> {
    pub token: RingToken,
    pub memory: &'a mut [u8],
}

impl FrameAllocation<'_> {
    /// Copy `bytes` to the start of the allocation.
    pub fn write(&mut self, bytes: &[u8]) {
        self.memory[..bytes.len()].copy_from_slice(bytes);
    }
}

pub struct FrameRingAllocator {
    storage: Box<[UnsafeCell<u8>]>,
    capacity: u64,
    alignment: u64,
    frames_in_flight: u32,
    cursor: AtomicU64,
    frame_start: u64,
    budget_warnings: u64,
    usage_history: RingBuffer<u64>,
    counters: Counter,
}

// SAFETY: `storage` is only written through ranges claimed from `cursor`.
// A claim is rejected once the bytes claimed since `frame_start` reach the
// capacity, so every range handed out between two `end_frame` calls maps to
// distinct bytes. `end_frame`, `read` and `dirty_ranges` take `&mut self`,
// which ends every outstanding `FrameAllocation` borrow first.
unsafe impl Sync for FrameRingAllocator {}

impl FrameRingAllocator {
    /// `alignment` is the largest bind offset alignment the device requires
    /// across uniform, storage and shader-binding-table bindings.
    pub fn new(capacity: u64, alignment: u64, frames_in_flight: u32) -> Self {
        assert!(capacity > 0, "staging ring capacity must be non-zero");
        assert!(alignment > 0, "staging ring alignment must be non-zero");
        assert!(
            capacity % alignment == 0,
            "staging ring capacity {capacity} is not a multiple of its alignment {alignment}"
        );
        assert!(frames_in_flight > 0, "frames in flight must be non-zero");

        let storage = std::iter::repeat_with(|| UnsafeCell::new(0u8))
            .take(capacity as usize)
            .collect();
        Self {
            storage,
            capacity,
            alignment,
            frames_in_flight,
            cursor: AtomicU64::new(0),
            frame_start: 0,
            budget_warnings: 0,
            usage_history: RingBuffer::new(USAGE_HISTORY_FRAMES),
            counters: Counter::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    #[inline]
    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    /// Allocate or abort. The ring is sized for the frames in flight; one
    /// frame exhausting it means the configuration is wrong.
    pub fn allocate_frame(&self, size: u64) -> FrameAllocation<'_> {
        match self.try_allocate_frame(size) {
            Ok(allocation) => allocation,
            Err(err) => {
                tracing::error!(%err, "out of staging ring memory");
                panic!("{err}");
            }
        }
    }

    pub fn try_allocate_frame(&self, size: u64) -> Result<FrameAllocation<'_>, RingError> {
        assert!(size > 0, "zero-sized staging allocation");
        let aligned = align_up(size, self.alignment);
        if aligned > self.capacity {
            return Err(self.out_of_space(size, self.cursor.load(Ordering::Relaxed)));
        }

        let offset = loop {
            let prev = self.cursor.fetch_add(aligned, Ordering::AcqRel);
            let claim_end = prev + aligned;
            if claim_end - self.frame_start >= self.capacity {
                return Err(self.out_of_space(size, claim_end));
            }

            let offset = prev % self.capacity;
            let end = (offset + size) % (self.capacity + 1);
            if offset < end {
                break offset;
            }

            // The claim straddles the end of the buffer. Extend it to cover
            // a full slot starting at the wrap point, unless another caller
            // already moved the cursor, in which case take a fresh claim.
            let boundary = prev + (self.capacity - offset);
            let extended_end = boundary + aligned;
            if self
                .cursor
                .compare_exchange(claim_end, extended_end, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                if extended_end - self.frame_start >= self.capacity {
                    return Err(self.out_of_space(size, extended_end));
                }
                break 0;
            }
        };

        // SAFETY: `offset..offset + size` lies inside the storage and belongs
        // to this claim alone (see the `Sync` impl).
        let memory = unsafe {
            let base = self.storage.as_ptr() as *mut u8;
            std::slice::from_raw_parts_mut(base.add(offset as usize), size as usize)
        };
        Ok(FrameAllocation {
            token: RingToken {
                offset,
                range: size,
            },
            memory,
        })
    }

    /// Close the frame. Returns the bytes claimed since the previous call.
    pub fn end_frame(&mut self) -> u64 {
        let current = *self.cursor.get_mut();
        let used = current - self.frame_start;
        self.frame_start = current;

        if self.exceeds_frame_budget(used) {
            self.budget_warnings += 1;
            tracing::warn!(
                used,
                safe_limit = self.capacity / self.frames_in_flight as u64,
                "frame used more than 80% of its safe share of the staging ring"
            );
        }

        self.usage_history.push(used);
        self.counters.add("ring.used_bytes", used);
        used
    }

    /// Usage strictly above 80% of `capacity / frames_in_flight`.
    pub fn exceeds_frame_budget(&self, used: u64) -> bool {
        let fair_share = self.capacity / self.frames_in_flight as u64;
        used as f64 > 0.8 * fair_share as f64
    }

    pub fn budget_warnings(&self) -> u64 {
        self.budget_warnings
    }

    /// Average and peak bytes per frame over the recent history.
    pub fn usage(&self) -> (u64, u64) {
        (self.usage_history.average(), self.usage_history.peak())
    }

    pub fn counters(&self) -> &Counter {
        &self.counters
    }

    /// Bytes claimed since the last `end_frame`, including wasted tails.
    pub fn frame_bytes_claimed(&self) -> u64 {
        self.cursor.load(Ordering::Acquire) - self.frame_start
    }

    /// Physical ranges touched since the last `end_frame`, split at the wrap
    /// point, paired with their contents.
    pub fn dirty_ranges(&mut self) -> Vec<(u64, &[u8])> {
        let current = *self.cursor.get_mut();
        let used = current - self.frame_start;
        let ranges: Vec<Range<u64>> = if used == 0 {
            Vec::new()
        } else if used >= self.capacity {
            vec![0..self.capacity]
        } else {
            let start = self.frame_start % self.capacity;
            let end = start + used;
            if end <= self.capacity {
                vec![start..end]
            } else {
                vec![start..self.capacity, 0..end - self.capacity]
            }
        };

        let bytes = self.bytes();
        ranges
            .into_iter()
            .map(|r| (r.start, &bytes[r.start as usize..r.end as usize]))
            .collect()
    }

    /// Contents of a token produced this frame.
    pub fn read(&mut self, token: RingToken) -> &[u8] {
        assert!(!token.is_unused(), "reading an unused staging token");
        let range = token.offset as usize..(token.offset + token.range) as usize;
        &self.bytes()[range]
    }

    fn bytes(&mut self) -> &[u8] {
        // SAFETY: `&mut self` guarantees no `FrameAllocation` is alive, and
        // `UnsafeCell<u8>` has the same layout as `u8`.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr() as *const u8, self.storage.len()) }
    }

    fn out_of_space(&self, requested: u64, claim_end: u64) -> RingError {
        RingError::OutOfSpace {
            requested,
            used: claim_end.saturating_sub(self.frame_start),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straddling_request_wraps_to_start() {
        let mut ring = FrameRingAllocator::new(1024, 16, 3);
        let mut offsets = Vec::new();
        for _ in 0..4 {
            let allocation = ring.allocate_frame(300);
            assert_eq!(allocation.token.range, 300);
            offsets.push(allocation.token.offset);
            ring.end_frame();
        }
        assert_eq!(offsets, vec![0, 304, 608, 0]);

        // Within a single frame the fourth request exhausts the ring
        let ring = FrameRingAllocator::new(1024, 16, 3);
        let same_frame: Vec<_> = (0..4)
            .map(|_| ring.try_allocate_frame(300).map(|a| a.token.offset))
            .collect();
        assert_eq!(same_frame[..3], [Ok(0), Ok(304), Ok(608)]);
        assert_eq!(
            same_frame[3],
            Err(RingError::OutOfSpace {
                requested: 300,
                used: 1216,
                capacity: 1024,
            })
        );
    }

    #[test]
    fn ranges_end_exactly_on_buffer_end() {
        let mut ring = FrameRingAllocator::new(1024, 256, 2);
        for expected in [0, 256, 512, 768] {
            assert_eq!(ring.allocate_frame(256).token.offset, expected);
            ring.end_frame();
        }
        // Wraps cleanly without a retry
        assert_eq!(ring.allocate_frame(256).token.offset, 0);
        assert_eq!(ring.end_frame(), 256);
    }

    #[test]
    fn offsets_are_aligned_and_never_cross_the_end() {
        let capacity = 4096;
        let mut ring = FrameRingAllocator::new(capacity, 64, 4);
        let sizes = [1u64, 63, 64, 65, 200, 333, 700, 1000, 17, 512];
        for frame in 0..500 {
            let mut frame_ranges = Vec::new();
            for i in 0..3 {
                let size = sizes[(frame * 3 + i) % sizes.len()];
                let allocation = ring.allocate_frame(size);
                let token = allocation.token;
                assert_eq!(token.offset % 64, 0);
                assert!(token.offset + token.range <= capacity, "{token:?} crosses the end");
                frame_ranges.push(token.offset..token.offset + token.range);
            }
            frame_ranges.sort_by_key(|r| r.start);
            for pair in frame_ranges.windows(2) {
                assert!(pair[0].end <= pair[1].start, "overlap in frame {frame}: {pair:?}");
            }
            ring.end_frame();
        }
    }

    #[test]
    fn concurrent_claims_do_not_overlap() {
        let mut ring = FrameRingAllocator::new(1 << 20, 256, 2);
        let mut tokens: Vec<RingToken> = std::thread::scope(|s| {
            let ring = &ring;
            let handles: Vec<_> = (0..8u64)
                .map(|t| {
                    s.spawn(move || {
                        (0..64u64)
                            .map(|i| {
                                let mut allocation = ring.allocate_frame(16 + (t * 64 + i) % 500);
                                let stamp = (t * 1000 + i) as u32;
                                allocation.write(&stamp.to_le_bytes());
                                allocation.token
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("producer thread panicked"))
                .collect()
        });

        assert_eq!(tokens.len(), 512);
        tokens.sort_by_key(|t| t.offset);
        for pair in tokens.windows(2) {
            assert!(pair[0].offset + pair[0].range <= pair[1].offset);
        }
        // Every caller's bytes survived the others
        let first = tokens[0];
        let stamp = u32::from_le_bytes(ring.read(first)[..4].try_into().expect("4 bytes"));
        assert!(stamp < 8000);
        assert!(ring.end_frame() >= tokens.iter().map(|t| t.range).sum::<u64>());
    }

    #[test]
    fn contended_claims_wrap_without_overlap() {
        let capacity = 4096;
        let mut ring = FrameRingAllocator::new(capacity, 16, 3);
        let mut wrapped = 0;
        for frame in 0..2000u64 {
            let mut claims: Vec<(RingToken, u8)> = std::thread::scope(|s| {
                let ring = &ring;
                let handles: Vec<_> = (0..4u64)
                    .map(|t| {
                        s.spawn(move || {
                            (0..3u64)
                                .map(|i| {
                                    let size = 48 + (frame * 11 + t * 37 + i * 53) % 200;
                                    let stamp = (t * 3 + i + 1) as u8;
                                    let mut allocation =
                                        ring.try_allocate_frame(size).expect("frame fits the ring");
                                    allocation.memory.fill(stamp);
                                    (allocation.token, stamp)
                                })
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| h.join().expect("producer thread panicked"))
                    .collect()
            });

            claims.sort_by_key(|(token, _)| token.offset);
            for (token, stamp) in &claims {
                assert_eq!(token.offset % 16, 0);
                assert!(token.offset + token.range <= capacity, "{token:?} crosses the end");
                assert!(ring.read(*token).iter().all(|b| b == stamp), "{token:?} was overwritten");
                if token.offset == 0 && frame > 0 {
                    wrapped += 1;
                }
            }
            for pair in claims.windows(2) {
                let (a, b) = (pair[0].0, pair[1].0);
                assert!(a.offset + a.range <= b.offset, "overlap in frame {frame}: {a:?} {b:?}");
            }
            ring.end_frame();
        }
        assert!(wrapped > 0);
    }

    #[test]
    fn exhaustion_within_one_frame() {
        let mut ring = FrameRingAllocator::new(1024, 256, 1);
        for _ in 0..3 {
            ring.allocate_frame(256);
        }
        assert!(matches!(
            ring.try_allocate_frame(256),
            Err(RingError::OutOfSpace { capacity: 1024, .. })
        ));
        assert!(ring.try_allocate_frame(2048).is_err());

        // A new frame starts from a clean budget
        ring.end_frame();
        assert!(ring.try_allocate_frame(256).is_ok());
    }

    #[test]
    #[should_panic(expected = "out of space")]
    fn fatal_variant_panics() {
        let ring = FrameRingAllocator::new(512, 256, 1);
        ring.allocate_frame(256);
        ring.allocate_frame(256);
    }

    #[test]
    fn budget_warning_threshold() {
        // Fair share 1000 bytes, warning above 800
        let mut ring = FrameRingAllocator::new(2000, 16, 2);
        assert!(!ring.exceeds_frame_budget(800));
        assert!(ring.exceeds_frame_budget(801));

        ring.allocate_frame(800);
        assert_eq!(ring.end_frame(), 800);
        assert_eq!(ring.budget_warnings(), 0);

        ring.allocate_frame(816);
        assert_eq!(ring.end_frame(), 816);
        assert_eq!(ring.budget_warnings(), 1);

        assert_eq!(ring.end_frame(), 0);
        assert_eq!(ring.budget_warnings(), 1);
    }

    #[test]
    fn dirty_ranges_split_at_wrap() {
        let mut ring = FrameRingAllocator::new(1024, 256, 2);
        ring.allocate_frame(256).write(&[1; 256]);
        ring.allocate_frame(256).write(&[2; 256]);
        ring.allocate_frame(256).write(&[3; 256]);
        ring.end_frame();

        ring.allocate_frame(256).write(&[4; 256]);
        ring.allocate_frame(256).write(&[5; 256]);
        let dirty = ring.dirty_ranges();
        assert_eq!(dirty.len(), 2);
        assert_eq!(dirty[0].0, 768);
        assert!(dirty[0].1.iter().all(|&b| b == 4));
        assert_eq!(dirty[1].0, 0);
        assert!(dirty[1].1.iter().all(|&b| b == 5));
    }

    #[test]
    fn unused_token_is_distinguishable() {
        assert!(RingToken::default().is_unused());
        assert!(!RingToken { offset: 0, range: 16 }.is_unused());
    }

    #[test]
    fn usage_history_tracks_frames() {
        let mut ring = FrameRingAllocator::new(4096, 256, 3);
        ring.allocate_frame(256);
        ring.end_frame();
        ring.allocate_frame(600);
        ring.end_frame();
        if cfg!(feature = "metrics") {
            assert_eq!(ring.usage(), ((256 + 768) / 2, 768));
            assert_eq!(ring.counters().get("ring.used_bytes"), 1024);
        }
    }
}
