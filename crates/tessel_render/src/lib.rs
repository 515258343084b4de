//! Tessel Render
//!
//! wgpu bindings for the GPU memory core: device probe, growable device
//! buffers, the geometry and scene pools, the staging ring upload path and
//! the scene micro-patch compute program.

pub mod buffer;
pub mod context;
pub mod device;
pub mod patcher;
pub mod pools;
pub mod staging;

pub use buffer::DeviceBuffer;
pub use context::{FrameReport, GpuMemory};
pub use device::GpuContext;
pub use patcher::ScenePatcher;
pub use pools::{GeometryPool, ScenePool};
pub use staging::StagingRing;

pub use wgpu;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no compatible graphics adapter found")]
    NoAdapter,

    #[error("adapter {0} does not support compute shaders")]
    ComputeUnsupported(String),

    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("invalid memory configuration: {0}")]
    Config(#[from] tessel_core::ConfigError),

    #[error("{pool} pool ceiling {requested} exceeds the device buffer limit {limit}")]
    PoolTooLarge {
        pool: &'static str,
        requested: u64,
        limit: u64,
    },
}

/// Rendering backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Metal (macOS, iOS)
    Metal,
    /// DirectX 12 (Windows)
    DirectX12,
    /// Vulkan (cross-platform)
    Vulkan,
    /// OpenGL / GLES
    OpenGL,
    /// WebGPU in a browser
    WebGpu,
    /// No real device
    Empty,
}

impl From<wgpu::Backend> for BackendType {
    fn from(backend: wgpu::Backend) -> Self {
        match backend {
            wgpu::Backend::Metal => Self::Metal,
            wgpu::Backend::Dx12 => Self::DirectX12,
            wgpu::Backend::Vulkan => Self::Vulkan,
            wgpu::Backend::Gl => Self::OpenGL,
            wgpu::Backend::BrowserWebGpu => Self::WebGpu,
            _ => Self::Empty,
        }
    }
}

/// Capability probe result
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub backend: BackendType,
    pub adapter_name: String,
    pub uniform_offset_alignment: u64,
    pub storage_offset_alignment: u64,
    /// wgpu has no shader binding tables; any offset is valid
    pub sbt_record_alignment: u64,
    pub max_dispatch_per_dimension: u32,
    pub max_buffer_size: u64,
    pub max_storage_binding_size: u64,
    pub supports_compute: bool,
}

impl DeviceCapabilities {
    /// Alignment every staging ring allocation is rounded to, so a token
    /// can be bound as any buffer kind.
    pub fn ring_alignment(&self) -> u64 {
        self.uniform_offset_alignment
            .max(self.storage_offset_alignment)
            .max(self.sbt_record_alignment)
    }
}
