//! Geometry and scene pools over device buffers

use crate::{DeviceBuffer, GpuContext, RenderError};
use std::ops::Deref;
use tessel_core::{MemoryConfig, PersistentPool, PoolLayout, PoolToken};

pub type DevicePool = PersistentPool<DeviceBuffer>;

/// Unified vertex, index and indirect-argument storage.
pub struct GeometryPool(DevicePool);

/// Per-instance scene records read by shaders and written by the patcher.
pub struct ScenePool(DevicePool);

impl GeometryPool {
    pub const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::VERTEX
        .union(wgpu::BufferUsages::INDEX)
        .union(wgpu::BufferUsages::INDIRECT)
        .union(wgpu::BufferUsages::STORAGE)
        .union(wgpu::BufferUsages::COPY_SRC)
        .union(wgpu::BufferUsages::COPY_DST);

    pub fn new(gpu: &GpuContext, config: &MemoryConfig) -> Result<Self, RenderError> {
        create_pool(
            gpu,
            "Geometry",
            PoolLayout::geometry(config.geometry_max_size),
            config.geometry_initial_size,
            Self::USAGE,
            config.frames_in_flight,
        )
        .map(Self)
    }
}

impl ScenePool {
    pub const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
        .union(wgpu::BufferUsages::COPY_SRC)
        .union(wgpu::BufferUsages::COPY_DST);

    pub fn new(gpu: &GpuContext, config: &MemoryConfig) -> Result<Self, RenderError> {
        create_pool(
            gpu,
            "Scene",
            PoolLayout::scene(config.scene_max_size),
            config.scene_initial_size,
            Self::USAGE,
            config.frames_in_flight,
        )
        .map(Self)
    }
}

impl Deref for GeometryPool {
    type Target = DevicePool;

    fn deref(&self) -> &DevicePool {
        &self.0
    }
}

impl Deref for ScenePool {
    type Target = DevicePool;

    fn deref(&self) -> &DevicePool {
        &self.0
    }
}

/// Upload helpers shared by both pools.
pub trait DevicePoolExt {
    /// Queue a write of `bytes` into the chunk behind `token`.
    fn write(&self, token: PoolToken, bytes: &[u8]);

    /// Current buffer generation; changes when the pool grew.
    fn generation(&self) -> u64;
}

impl DevicePoolExt for DevicePool {
    fn write(&self, token: PoolToken, bytes: &[u8]) {
        assert!(!token.is_unused(), "writing through an unused pool token");
        check_write(token.offset(), token.size(), bytes.len() as u64);
        self.with_backing(|buffer| buffer.write(token.offset(), bytes));
    }

    fn generation(&self) -> u64 {
        self.with_backing(|buffer| buffer.generation())
    }
}

/// Queue writes must cover whole dwords at dword offsets.
fn check_write(offset: u64, allocation_size: u64, len: u64) {
    assert!(
        len <= allocation_size,
        "write of {len} bytes exceeds allocation of {allocation_size}"
    );
    assert!(
        len % wgpu::COPY_BUFFER_ALIGNMENT == 0 && offset % wgpu::COPY_BUFFER_ALIGNMENT == 0,
        "pool write of {len} bytes at offset {offset} is not dword aligned"
    );
}

fn create_pool(
    gpu: &GpuContext,
    name: &'static str,
    layout: PoolLayout,
    initial_size: u64,
    usage: wgpu::BufferUsages,
    frames_in_flight: u32,
) -> Result<DevicePool, RenderError> {
    let caps = gpu.capabilities();
    let mut limit = caps.max_buffer_size;
    if usage.contains(wgpu::BufferUsages::STORAGE) {
        limit = limit.min(caps.max_storage_binding_size);
    }
    if layout.ceiling() > limit {
        return Err(RenderError::PoolTooLarge {
            pool: name,
            requested: layout.ceiling(),
            limit,
        });
    }

    let buffer = DeviceBuffer::new(
        gpu.device().clone(),
        gpu.queue().clone(),
        name,
        initial_size,
        usage,
    );
    Ok(PersistentPool::new(name, layout, buffer, frames_in_flight))
}
