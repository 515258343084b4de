//! Device creation and capability probe
//!
//! The memory subsystem never presents, so the device is requested without
//! a surface.

use crate::{BackendType, DeviceCapabilities, RenderError};
use std::sync::Arc;

/// Adapter, device and queue shared by every GPU memory component.
pub struct GpuContext {
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    capabilities: DeviceCapabilities,
}

impl GpuContext {
    /// Request a device on the default adapter, blocking until ready.
    pub fn headless() -> Result<Self, RenderError> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let capabilities = probe_capabilities(&adapter);
        if !capabilities.supports_compute {
            return Err(RenderError::ComputeUnsupported(capabilities.adapter_name));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Tessel Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        tracing::info!(
            adapter = %capabilities.adapter_name,
            backend = ?capabilities.backend,
            ring_alignment = capabilities.ring_alignment(),
            "GPU device ready"
        );

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            capabilities,
        })
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }
}

/// Probe available capabilities
pub fn probe_capabilities(adapter: &wgpu::Adapter) -> DeviceCapabilities {
    let info = adapter.get_info();
    let limits = adapter.limits();
    let downlevel = adapter.get_downlevel_capabilities();

    DeviceCapabilities {
        backend: BackendType::from(info.backend),
        adapter_name: info.name,
        uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment as u64,
        storage_offset_alignment: limits.min_storage_buffer_offset_alignment as u64,
        sbt_record_alignment: 1,
        max_dispatch_per_dimension: limits.max_compute_workgroups_per_dimension,
        max_buffer_size: limits.max_buffer_size,
        max_storage_binding_size: limits.max_storage_buffer_binding_size as u64,
        supports_compute: downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
    }
}
