//! Staging ring on the device
//!
//! wgpu exposes no persistently mapped memory, so the ring lives in host
//! memory and the ranges claimed during a frame are copied into a device
//! buffer of the same size with `Queue::write_buffer` at frame end. Tokens
//! address both copies identically.

use crate::GpuContext;
use tessel_core::{align_up, FrameAllocation, FrameRingAllocator, RingError, RingToken};

/// Bytes of the zero-filled buffer bound in place of unused tokens.
const DUMMY_BUFFER_SIZE: u64 = 256;

pub struct StagingRing {
    ring: FrameRingAllocator,
    buffer: wgpu::Buffer,
    dummy: wgpu::Buffer,
}

impl StagingRing {
    pub const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::UNIFORM
        .union(wgpu::BufferUsages::STORAGE)
        .union(wgpu::BufferUsages::VERTEX)
        .union(wgpu::BufferUsages::INDEX)
        .union(wgpu::BufferUsages::COPY_DST);

    /// `capacity` is rounded up to the device's ring alignment.
    pub fn new(gpu: &GpuContext, capacity: u64, frames_in_flight: u32) -> Self {
        let alignment = gpu.capabilities().ring_alignment();
        let capacity = align_up(capacity, alignment);
        let device = gpu.device();

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Ring"),
            size: capacity,
            usage: Self::USAGE,
            mapped_at_creation: false,
        });
        let dummy = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Ring Dummy"),
            size: DUMMY_BUFFER_SIZE.max(alignment),
            usage: Self::USAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        tracing::info!(capacity, alignment, frames_in_flight, "staging ring created");
        Self {
            ring: FrameRingAllocator::new(capacity, alignment, frames_in_flight),
            buffer,
            dummy,
        }
    }

    #[inline]
    pub fn allocator(&self) -> &FrameRingAllocator {
        &self.ring
    }

    #[inline]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn allocate_frame(&self, size: u64) -> FrameAllocation<'_> {
        self.ring.allocate_frame(size)
    }

    pub fn try_allocate_frame(&self, size: u64) -> Result<FrameAllocation<'_>, RingError> {
        self.ring.try_allocate_frame(size)
    }

    /// Allocate and fill with one plain-old-data value.
    pub fn push_pod<T: bytemuck::Pod>(&self, value: &T) -> RingToken {
        let bytes = bytemuck::bytes_of(value);
        let mut allocation = self.ring.allocate_frame(bytes.len() as u64);
        allocation.write(bytes);
        allocation.token
    }

    /// Queue this frame's dirty ranges for upload. Returns bytes queued.
    pub fn flush(&mut self, queue: &wgpu::Queue) -> u64 {
        let mut uploaded = 0;
        for (offset, bytes) in self.ring.dirty_ranges() {
            queue.write_buffer(&self.buffer, offset, bytes);
            uploaded += bytes.len() as u64;
        }
        uploaded
    }

    /// Close the frame on the host ring. Call after [`StagingRing::flush`].
    pub fn end_frame(&mut self) -> u64 {
        self.ring.end_frame()
    }

    /// Binding over `token`'s range, or over the dummy buffer when unused.
    pub fn binding(&self, token: RingToken) -> wgpu::BufferBinding<'_> {
        if token.is_unused() {
            return wgpu::BufferBinding {
                buffer: &self.dummy,
                offset: 0,
                size: None,
            };
        }
        wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: token.offset,
            size: wgpu::BufferSize::new(token.range),
        }
    }

    pub fn binding_resource(&self, token: RingToken) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(self.binding(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_token_binds_zeroed_dummy() {
        let gpu = match GpuContext::headless() {
            Ok(gpu) => gpu,
            Err(err) => {
                eprintln!("skipping, no usable device: {err}");
                return;
            }
        };
        let mut staging = StagingRing::new(&gpu, 1 << 12, 2);
        let used = staging.push_pod(&[7u32; 4]);

        let binding = staging.binding(RingToken::UNUSED);
        assert!(std::ptr::eq(binding.buffer, &staging.dummy));
        assert_eq!(binding.offset, 0);
        assert!(binding.size.is_none());
        let binding = staging.binding(used);
        assert!(std::ptr::eq(binding.buffer, &staging.buffer));
        assert_eq!(binding.size.map(|s| s.get()), Some(16));

        let device = gpu.device();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Staging Test Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let _bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Staging Test Bind Group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: staging.binding_resource(RingToken::UNUSED),
            }],
        });
        let error = pollster::block_on(device.pop_error_scope());
        assert!(error.is_none(), "dummy binding rejected: {error:?}");

        staging.flush(gpu.queue());
        staging.end_frame();

        let size = staging.dummy.size();
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Test Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Staging Test Encoder"),
        });
        encoder.copy_buffer_to_buffer(&staging.dummy, 0, &readback, 0, size);
        gpu.queue().submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        device.poll(wgpu::Maintain::Wait);
        let mapped = slice.get_mapped_range();
        assert_eq!(mapped.len() as u64, size);
        assert!(mapped.iter().all(|&b| b == 0));
        drop(mapped);
        readback.unmap();
    }
}
