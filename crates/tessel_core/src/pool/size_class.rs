use super::{BackingBuffer, PoolError, PoolToken};
use crate::align_up;
use std::collections::{HashSet, VecDeque};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Ascending class upper sizes. The last class is the pool ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLayout {
    classes: Vec<u64>,
}

impl PoolLayout {
    pub fn new(classes: Vec<u64>) -> Self {
        assert!(!classes.is_empty(), "pool layout needs at least one class");
        assert!(
            classes.windows(2).all(|w| w[0] < w[1]),
            "size classes must be strictly ascending: {classes:?}"
        );
        assert!(classes[0] > 0, "size classes must be non-zero");
        let ceiling = classes[classes.len() - 1];
        assert!(ceiling % 4 == 0, "pool ceiling {ceiling} is not dword aligned");
        Self { classes }
    }

    /// Vertex, index and indirect data: 1 KiB up to 16 MiB, then the ceiling.
    pub fn geometry(ceiling: u64) -> Self {
        Self::with_ceiling(
            &[
                KIB,
                8 * KIB,
                32 * KIB,
                128 * KIB,
                512 * KIB,
                4 * MIB,
                8 * MIB,
                16 * MIB,
            ],
            ceiling,
        )
    }

    /// Per-instance scene records: 32 B up to 256 B, then the ceiling.
    pub fn scene(ceiling: u64) -> Self {
        Self::with_ceiling(&[32, 64, 128, 256], ceiling)
    }

    fn with_ceiling(classes: &[u64], ceiling: u64) -> Self {
        let mut classes: Vec<u64> = classes.iter().copied().filter(|&c| c < ceiling).collect();
        classes.push(ceiling);
        Self::new(classes)
    }

    pub fn classes(&self) -> &[u64] {
        &self.classes
    }

    pub fn ceiling(&self) -> u64 {
        self.classes[self.classes.len() - 1]
    }

    /// Smallest class able to hold `size` bytes.
    fn class_for(&self, size: u64) -> Option<usize> {
        let idx = self.classes.partition_point(|&max| max < size);
        (idx < self.classes.len()).then_some(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    offset: u64,
    size: u64,
}

struct Retired {
    token: PoolToken,
    frame: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub live_allocations: usize,
    /// Bytes held by live chunks and chunks waiting for retirement
    pub in_use_bytes: u64,
    /// High-water mark of carved space
    pub carved_bytes: u64,
    pub buffer_size: u64,
    pub pending_frees: usize,
    pub grow_count: u64,
}

/// Segregated free-list allocator over one growable buffer.
///
/// Chunks of every class but the last are exactly the class size. The last
/// class spans everything up to the ceiling, so its chunks are cut to the
/// aligned request and reused first-fit.
pub struct SizeClassAllocator<B> {
    name: &'static str,
    layout: PoolLayout,
    free_lists: Vec<Vec<Chunk>>,
    backing: B,
    top: u64,
    frames_in_flight: u64,
    frame: u64,
    retired: VecDeque<Retired>,
    live: HashSet<u64>,
    in_use: u64,
    grow_count: u64,
}

impl<B: BackingBuffer> SizeClassAllocator<B> {
    pub fn new(name: &'static str, layout: PoolLayout, backing: B, frames_in_flight: u32) -> Self {
        assert!(
            backing.size() <= layout.ceiling(),
            "{name} pool: initial size {} above ceiling {}",
            backing.size(),
            layout.ceiling()
        );
        assert!(frames_in_flight > 0, "{name} pool: frames in flight must be non-zero");
        let free_lists = vec![Vec::new(); layout.classes().len()];
        Self {
            name,
            layout,
            free_lists,
            backing,
            top: 0,
            frames_in_flight: frames_in_flight as u64,
            frame: 0,
            retired: VecDeque::new(),
            live: HashSet::new(),
            in_use: 0,
            grow_count: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    #[inline]
    pub fn backing(&self) -> &B {
        &self.backing
    }

    #[inline]
    pub fn backing_mut(&mut self) -> &mut B {
        &mut self.backing
    }

    /// Allocate or abort. Device memory exhaustion cannot be serviced mid-frame.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> PoolToken {
        match self.try_allocate(size, alignment) {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(pool = self.name, %err, "GPU memory pool exhausted");
                panic!("{err}");
            }
        }
    }

    pub fn try_allocate(&mut self, size: u64, alignment: u64) -> Result<PoolToken, PoolError> {
        assert!(size > 0, "{} pool: zero-sized allocation", self.name);
        assert!(
            alignment.is_power_of_two(),
            "{} pool: alignment {alignment} is not a power of two",
            self.name
        );

        let needed = align_up(size, alignment);
        let class = self.layout.class_for(needed).ok_or(PoolError::OutOfMemory {
            pool: self.name,
            requested: size,
            ceiling: self.layout.ceiling(),
        })?;

        let free = &mut self.free_lists[class];
        let reusable = free
            .iter()
            .position(|c| c.size >= needed && c.offset % alignment == 0);
        let chunk = match reusable {
            Some(idx) => free.swap_remove(idx),
            None => {
                let is_last = class + 1 == self.layout.classes().len();
                let chunk_size = if is_last {
                    needed
                } else {
                    self.layout.classes()[class]
                };
                self.carve(chunk_size, alignment, size)?
            }
        };

        self.live.insert(chunk.offset);
        self.in_use += chunk.size;
        Ok(PoolToken {
            offset: chunk.offset,
            size,
            chunk_size: chunk.size,
            class: class as u32,
        })
    }

    /// Queue the chunk for reuse once the GPU can no longer be reading it.
    pub fn deferred_free(&mut self, token: PoolToken) {
        if token.is_unused() {
            return;
        }
        assert!(
            self.live.remove(&token.offset),
            "{} pool: freeing offset {} which is not allocated",
            self.name,
            token.offset
        );
        self.retired.push_back(Retired {
            token,
            frame: self.frame,
        });
    }

    /// Advance the frame counter and recycle chunks older than the in-flight depth.
    pub fn end_frame(&mut self) -> usize {
        self.frame += 1;
        let mut reclaimed = 0;
        while self
            .retired
            .front()
            .is_some_and(|r| self.frame - r.frame > self.frames_in_flight)
        {
            if let Some(Retired { token, .. }) = self.retired.pop_front() {
                self.free_lists[token.class as usize].push(Chunk {
                    offset: token.offset,
                    size: token.chunk_size,
                });
                self.in_use -= token.chunk_size;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            tracing::debug!(pool = self.name, reclaimed, "recycled retired chunks");
        }
        reclaimed
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_allocations: self.live.len(),
            in_use_bytes: self.in_use,
            carved_bytes: self.top,
            buffer_size: self.backing.size(),
            pending_frees: self.retired.len(),
            grow_count: self.grow_count,
        }
    }

    fn carve(&mut self, chunk_size: u64, alignment: u64, requested: u64) -> Result<Chunk, PoolError> {
        let offset = align_up(self.top, alignment);
        let end = offset + chunk_size;
        if end > self.layout.ceiling() {
            return Err(PoolError::OutOfMemory {
                pool: self.name,
                requested,
                ceiling: self.layout.ceiling(),
            });
        }
        if end > self.backing.size() {
            self.grow_to(end);
        }
        self.top = end;
        Ok(Chunk {
            offset,
            size: chunk_size,
        })
    }

    fn grow_to(&mut self, required: u64) {
        let current = self.backing.size();
        let new_size = align_up(current.saturating_mul(2).max(required), 4).min(self.layout.ceiling());
        tracing::info!(pool = self.name, from = current, to = new_size, "growing pool buffer");
        self.backing.grow(new_size);
        self.grow_count += 1;
    }
}
