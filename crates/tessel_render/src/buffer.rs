//! Growable device buffer backing a persistent pool

use std::sync::Arc;
use tessel_core::BackingBuffer;

/// A wgpu buffer that can be replaced by a larger one with the same
/// contents.
///
/// Growing creates a new `wgpu::Buffer`, so bind groups built over the old
/// one go stale. Dependents compare [`DeviceBuffer::generation`] against
/// the value they built with and rebuild when it changed.
pub struct DeviceBuffer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffer: wgpu::Buffer,
    label: &'static str,
    usage: wgpu::BufferUsages,
    generation: u64,
}

impl DeviceBuffer {
    /// `usage` always gains `COPY_SRC | COPY_DST`; growth and uploads need them.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        label: &'static str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let buffer = create(&device, label, size, usage);
        Self {
            device,
            queue,
            buffer,
            label,
            usage,
            generation: 0,
        }
    }

    #[inline]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[inline]
    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    /// Bumped every time the underlying buffer is replaced.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a write of `bytes` at `offset`. Lands before the next submit.
    pub fn write(&self, offset: u64, bytes: &[u8]) {
        assert!(
            offset + bytes.len() as u64 <= self.buffer.size(),
            "write of {} bytes at {offset} overruns {} ({} bytes)",
            bytes.len(),
            self.label,
            self.buffer.size()
        );
        self.queue.write_buffer(&self.buffer, offset, bytes);
    }
}

impl BackingBuffer for DeviceBuffer {
    fn size(&self) -> u64 {
        self.buffer.size()
    }

    fn grow(&mut self, new_size: u64) {
        let old_size = self.buffer.size();
        debug_assert!(new_size > old_size);

        let grown = create(&self.device, self.label, new_size, self.usage);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pool Grow Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &grown, 0, old_size);
        // Submitting also flushes writes queued against the old buffer.
        self.queue.submit(std::iter::once(encoder.finish()));

        self.buffer = grown;
        self.generation += 1;
        tracing::info!(
            buffer = self.label,
            old_size,
            new_size,
            generation = self.generation,
            "device buffer reallocated"
        );
    }
}

fn create(device: &wgpu::Device, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}
