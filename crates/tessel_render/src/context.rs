//! Process-wide GPU memory context
//!
//! Owns the geometry pool, scene pool, staging ring and scene patcher,
//! created in that order at startup and torn down in reverse. The frame
//! loop records through the shared accessors and closes each frame with
//! [`GpuMemory::finish_frame`].

use crate::{GeometryPool, GpuContext, RenderError, ScenePatcher, ScenePool, StagingRing};
use std::sync::Arc;
use tessel_core::{FrameArena, MemoryConfig, PoolStats};

/// What one frame did to GPU memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    /// Patch headers dispatched into the scene buffer
    pub patch_headers: u32,
    /// Bytes queued for upload from the staging ring
    pub staging_uploaded: u64,
    /// Bytes claimed from the staging ring, including skipped tails
    pub staging_claimed: u64,
    /// CPU-side bytes producers staged through the frame arena
    pub arena_bytes: u64,
    pub geometry_reclaimed: usize,
    pub scene_reclaimed: usize,
}

pub struct GpuMemory {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    geometry: GeometryPool,
    scene: ScenePool,
    staging: StagingRing,
    patcher: ScenePatcher,
    arena: FrameArena,
}

impl GpuMemory {
    pub fn init(gpu: &GpuContext, config: &MemoryConfig) -> Result<Self, RenderError> {
        config.validate()?;

        let geometry = GeometryPool::new(gpu, config)?;
        let scene = ScenePool::new(gpu, config)?;
        let staging = StagingRing::new(gpu, config.staging_ring_size, config.frames_in_flight);
        let patcher = ScenePatcher::new(gpu);

        let mut arena = FrameArena::new();
        arena.begin_frame();

        tracing::info!(
            geometry = config.geometry_initial_size,
            scene = config.scene_initial_size,
            staging = staging.allocator().capacity(),
            frames_in_flight = config.frames_in_flight,
            "GPU memory initialized"
        );

        Ok(Self {
            device: gpu.device().clone(),
            queue: gpu.queue().clone(),
            geometry,
            scene,
            staging,
            patcher,
            arena,
        })
    }

    #[inline]
    pub fn geometry(&self) -> &GeometryPool {
        &self.geometry
    }

    #[inline]
    pub fn scene(&self) -> &ScenePool {
        &self.scene
    }

    #[inline]
    pub fn staging(&self) -> &StagingRing {
        &self.staging
    }

    #[inline]
    pub fn patcher(&self) -> &ScenePatcher {
        &self.patcher
    }

    /// Frame context to pass to producers of per-frame data.
    #[inline]
    pub fn arena(&self) -> &FrameArena {
        &self.arena
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.arena.frame_index()
    }

    /// Record a scattered write of `bytes` at `dst_offset` of the scene
    /// buffer for this frame.
    pub fn new_scene_copy(&self, dst_offset: u64, bytes: &[u8]) {
        self.patcher.batcher().new_copy(&self.arena, dst_offset, bytes);
    }

    pub fn new_scene_copy_pod<T: bytemuck::Pod>(&self, dst_offset: u64, value: &T) {
        self.patcher
            .batcher()
            .new_copy_pod(&self.arena, dst_offset, value);
    }

    /// Close the frame: dispatch scene patches into `encoder`, queue the
    /// staging upload, close the ring and retire pool frees.
    ///
    /// Submit `encoder` afterwards; the uploads are ordered before it.
    pub fn finish_frame(&mut self, encoder: &mut wgpu::CommandEncoder) -> FrameReport {
        let patch_headers = self
            .patcher
            .patch_gpu_scene(encoder, &self.staging, &self.scene);
        let staging_uploaded = self.staging.flush(&self.queue);
        let staging_claimed = self.staging.end_frame();
        let geometry_reclaimed = self.geometry.end_frame();
        let scene_reclaimed = self.scene.end_frame();

        let report = FrameReport {
            frame: self.arena.frame_index(),
            patch_headers,
            staging_uploaded,
            staging_claimed,
            arena_bytes: self.arena.frame_allocations(),
            geometry_reclaimed,
            scene_reclaimed,
        };
        tracing::debug!(?report, "frame finished");

        self.arena.begin_frame();
        report
    }

    pub fn stats(&self) -> (PoolStats, PoolStats) {
        (self.geometry.stats(), self.scene.stats())
    }

    /// Wait for the device to go idle, then release everything.
    pub fn shutdown(self) {
        self.device.poll(wgpu::Maintain::Wait);

        let Self {
            device: _device,
            queue: _queue,
            geometry,
            scene,
            staging,
            patcher,
            arena,
        } = self;

        let (geometry_stats, scene_stats) = (geometry.stats(), scene.stats());
        tracing::info!(
            frames = arena.frame_index(),
            geometry_live = geometry_stats.live_allocations,
            geometry_size = geometry_stats.buffer_size,
            scene_live = scene_stats.live_allocations,
            scene_size = scene_stats.buffer_size,
            staging_budget_warnings = staging.allocator().budget_warnings(),
            "GPU memory shutting down"
        );

        drop(patcher);
        drop(staging);
        drop(scene);
        drop(geometry);
    }
}
