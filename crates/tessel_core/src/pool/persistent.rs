use super::{BackingBuffer, PoolError, PoolLayout, PoolStats, PoolToken, SizeClassAllocator};
use parking_lot::Mutex;

/// Process-lifetime pool shared by every renderer and scene component.
///
/// Constructed once by the frame orchestrator and passed by reference to
/// dependents. All operations take `&self` and serialize on one lock held
/// only for the bookkeeping of a single call.
pub struct PersistentPool<B> {
    name: &'static str,
    allocator: Mutex<SizeClassAllocator<B>>,
}

impl<B: BackingBuffer> PersistentPool<B> {
    pub fn new(name: &'static str, layout: PoolLayout, backing: B, frames_in_flight: u32) -> Self {
        tracing::info!(
            pool = name,
            initial = backing.size(),
            ceiling = layout.ceiling(),
            classes = layout.classes().len(),
            "creating persistent pool"
        );
        Self {
            name,
            allocator: Mutex::new(SizeClassAllocator::new(
                name,
                layout,
                backing,
                frames_in_flight,
            )),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn allocate(&self, size: u64, alignment: u64) -> PoolToken {
        self.allocator.lock().allocate(size, alignment)
    }

    pub fn try_allocate(&self, size: u64, alignment: u64) -> Result<PoolToken, PoolError> {
        self.allocator.lock().try_allocate(size, alignment)
    }

    pub fn deferred_free(&self, token: PoolToken) {
        self.allocator.lock().deferred_free(token);
    }

    /// Called once per frame by the orchestrator after submission.
    pub fn end_frame(&self) -> usize {
        self.allocator.lock().end_frame()
    }

    pub fn stats(&self) -> PoolStats {
        self.allocator.lock().stats()
    }

    /// Run `f` against the backing buffer while holding the pool lock.
    pub fn with_backing<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(self.allocator.lock().backing())
    }

    pub fn with_backing_mut<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(self.allocator.lock().backing_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::HostBuffer;

    #[test]
    fn concurrent_allocations_are_disjoint() {
        let pool = PersistentPool::new(
            "ConcurrentScene",
            PoolLayout::scene(1 << 20),
            HostBuffer::with_size(4096),
            3,
        );

        let tokens: Vec<PoolToken> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let pool = &pool;
                    s.spawn(move || {
                        (0..200)
                            .map(|i| pool.allocate(16 + ((t + i) % 4) * 48, 16))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("producer thread panicked"))
                .collect()
        });

        assert_eq!(tokens.len(), 1600);
        assert_eq!(pool.stats().live_allocations, 1600);

        let mut sorted = tokens.clone();
        sorted.sort_by_key(|t| t.offset());
        for pair in sorted.windows(2) {
            assert!(pair[0].offset() + pair[0].chunk_size() <= pair[1].offset());
        }
        assert!(tokens.iter().all(|t| t.offset() % 16 == 0));
    }

    #[test]
    fn frees_recycle_through_end_frame() {
        let pool = PersistentPool::new(
            "RecycleScene",
            PoolLayout::scene(4096),
            HostBuffer::with_size(4096),
            1,
        );
        let token = pool.allocate(64, 4);
        pool.deferred_free(token);
        assert_eq!(pool.end_frame(), 0);
        assert_eq!(pool.end_frame(), 1);
        assert_eq!(pool.allocate(64, 4).offset(), token.offset());
        assert_eq!(pool.with_backing(|b| b.bytes().len()), 4096);
    }
}
