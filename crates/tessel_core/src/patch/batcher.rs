use super::header::{PatchHeader, DWORDS_PER_PATCH};
use super::resolve::resolve_overlaps;
use crate::memory::FrameArena;
use crate::ring::{FrameRingAllocator, RingToken};
use bytemuck::Pod;
use parking_lot::Mutex;
use tessel_metrics::Counter;

/// Ring ranges holding one frame's patch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchUpload {
    pub headers: RingToken,
    pub payload: RingToken,
    pub header_count: u32,
    pub payload_dwords: u32,
}

#[derive(Default)]
struct Batch {
    /// Arena frame the pending patches belong to; `None` once drained
    frame: Option<u64>,
    headers: Vec<PatchHeader>,
    payload: Vec<u32>,
    counters: Counter,
}

/// Accumulates scattered scene writes for one frame.
///
/// `new_copy` may be called from any number of producer threads; each
/// call holds the lock only while appending. `upload` is called once per
/// frame by the orchestrator after producers have joined.
#[derive(Default)]
pub struct PatchBatcher {
    batch: Mutex<Batch>,
}

impl PatchBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write of `data` at byte `dst_offset` of the scene buffer.
    ///
    /// `data` must be a non-empty multiple of 4 bytes and `dst_offset` a
    /// dword-aligned offset addressable with 32 bits of dwords.
    pub fn new_copy(&self, arena: &FrameArena, dst_offset: u64, data: &[u8]) {
        assert!(
            !data.is_empty() && data.len() % 4 == 0,
            "patch size {} is not a positive multiple of 4",
            data.len()
        );
        assert!(dst_offset % 4 == 0, "patch destination {dst_offset} is not dword aligned");
        assert!(
            dst_offset / 4 < u32::MAX as u64,
            "patch destination {dst_offset} is beyond 32-bit dword addressing"
        );

        let mut dst_dword = dst_offset / 4;
        let mut runs = 0u64;

        let mut guard = self.batch.lock();
        let batch = &mut *guard;
        if batch.frame != Some(arena.frame_index()) {
            if !batch.headers.is_empty() {
                tracing::warn!(
                    stale_frame = ?batch.frame,
                    patches = batch.headers.len(),
                    "discarding scene patches that were never uploaded"
                );
                batch.headers.clear();
                batch.payload.clear();
            }
            batch.frame = Some(arena.frame_index());
        }

        for run in data.chunks(DWORDS_PER_PATCH as usize * 4) {
            let dwords = (run.len() / 4) as u32;
            assert!(
                dst_dword + dwords as u64 <= u32::MAX as u64 + 1,
                "patch runs past the end of 32-bit dword addressing"
            );
            let src_dword = batch.payload.len() as u32;
            batch
                .headers
                .push(PatchHeader::new(dwords, src_dword, dst_dword as u32));
            batch
                .payload
                .extend(run.chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>));
            dst_dword += dwords as u64;
            runs += 1;
        }

        arena.record_allocation(data.len() as u64 + runs * std::mem::size_of::<PatchHeader>() as u64);
    }

    /// Stage a write of one plain-old-data record.
    pub fn new_copy_pod<T: Pod>(&self, arena: &FrameArena, dst_offset: u64, value: &T) {
        self.new_copy(arena, dst_offset, bytemuck::bytes_of(value));
    }

    /// Headers and payload dwords waiting for upload.
    pub fn pending(&self) -> (usize, usize) {
        let batch = self.batch.lock();
        (batch.headers.len(), batch.payload.len())
    }

    pub fn is_empty(&self) -> bool {
        self.batch.lock().headers.is_empty()
    }

    /// Copy the frame's patch stream into the staging ring and reset.
    ///
    /// Returns `None` without touching the ring when nothing was recorded.
    /// Headers and payload get separate ranges so each binds with its own
    /// element layout.
    pub fn upload(&self, ring: &FrameRingAllocator) -> Option<PatchUpload> {
        let mut guard = self.batch.lock();
        let batch = &mut *guard;
        if batch.headers.is_empty() {
            batch.frame = None;
            return None;
        }
        debug_assert!(!batch.payload.is_empty());

        let resolved = resolve_overlaps(&batch.headers);
        let headers = resolved.as_deref().unwrap_or(batch.headers.as_slice());

        let header_bytes: &[u8] = bytemuck::cast_slice(headers);
        let mut header_alloc = ring.allocate_frame(header_bytes.len() as u64);
        header_alloc.write(header_bytes);

        let payload_bytes: &[u8] = bytemuck::cast_slice(&batch.payload);
        let mut payload_alloc = ring.allocate_frame(payload_bytes.len() as u64);
        payload_alloc.write(payload_bytes);

        let upload = PatchUpload {
            headers: header_alloc.token,
            payload: payload_alloc.token,
            header_count: headers.len() as u32,
            payload_dwords: batch.payload.len() as u32,
        };

        batch
            .counters
            .add("scene_patch.headers", upload.header_count as u64);
        batch.counters.add(
            "scene_patch.upload_bytes",
            upload.headers.range + upload.payload.range,
        );

        // Keep the capacity for the next frame
        batch.headers.clear();
        batch.payload.clear();
        batch.frame = None;
        Some(upload)
    }

    /// Total headers and bytes uploaded so far (zero without `metrics`).
    pub fn totals(&self) -> (u64, u64) {
        let batch = self.batch.lock();
        (
            batch.counters.get("scene_patch.headers"),
            batch.counters.get("scene_patch.upload_bytes"),
        )
    }
}
