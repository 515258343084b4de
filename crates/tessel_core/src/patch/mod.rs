//! Scene micro-patching
//!
//! Producers record small scattered writes into the scene buffer during a
//! frame. At frame end the batch is uploaded through the staging ring as a
//! header stream plus a flat dword payload, and one compute dispatch (one
//! workgroup per header) performs every write on the device.

mod batcher;
mod header;
mod resolve;

pub use batcher::{PatchBatcher, PatchUpload};
pub use header::{PatchHeader, DWORDS_PER_PATCH};

/// Apply a header stream to `dst` on the CPU, in header order.
///
/// Mirrors the device program; used to validate streams and to patch
/// host-side mirrors of the scene buffer.
pub fn apply_patches(headers: &[PatchHeader], payload: &[u32], dst: &mut [u32]) {
    for header in headers {
        let count = header.dword_count() as usize;
        let src = header.src_dword_offset() as usize;
        let dst_start = header.dst_dword_offset() as usize;
        dst[dst_start..dst_start + count].copy_from_slice(&payload[src..src + count]);
    }
}
