//! Scene micro-patch dispatch
//!
//! Turns the frame's [`PatchBatcher`] contents into one compute dispatch
//! that scatters every recorded write into the scene buffer.

use crate::{GpuContext, ScenePool, StagingRing};
use std::sync::Arc;
use tessel_core::PatchBatcher;

const WORKGROUP_SIZE: u32 = 64;
const _: () = assert!(WORKGROUP_SIZE == tessel_core::patch::DWORDS_PER_PATCH);

pub struct ScenePatcher {
    device: Arc<wgpu::Device>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    batcher: PatchBatcher,
    max_groups_per_dimension: u32,
}

impl ScenePatcher {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = gpu.device();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scene Micro Patch Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/scene_micro_patch.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Patch Bind Group Layout"),
            entries: &[
                // Headers
                storage_entry(0, true),
                // Payload
                storage_entry(1, true),
                // Scene buffer
                storage_entry(2, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Patch Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Scene Patch Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            device: device.clone(),
            pipeline,
            bind_group_layout,
            batcher: PatchBatcher::new(),
            max_groups_per_dimension: gpu.capabilities().max_dispatch_per_dimension,
        }
    }

    /// Collects writes during the frame; see [`PatchBatcher::new_copy`].
    #[inline]
    pub fn batcher(&self) -> &PatchBatcher {
        &self.batcher
    }

    /// Upload the frame's patches through `staging` and record the dispatch
    /// into `encoder`. Returns the number of headers dispatched; zero means
    /// nothing was recorded.
    ///
    /// The scene pool must not grow between this call and the submit of
    /// `encoder`; the bind group references the current scene buffer.
    pub fn patch_gpu_scene(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        staging: &StagingRing,
        scene: &ScenePool,
    ) -> u32 {
        let Some(upload) = self.batcher.upload(staging.allocator()) else {
            return 0;
        };

        let bind_group = scene.with_backing(|buffer| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Scene Patch Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: staging.binding_resource(upload.headers),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: staging.binding_resource(upload.payload),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: buffer.buffer().as_entire_binding(),
                    },
                ],
            })
        });

        let (x, y) = dispatch_size(upload.header_count, self.max_groups_per_dimension);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Scene Patch Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }

        tracing::debug!(
            headers = upload.header_count,
            payload_dwords = upload.payload_dwords,
            groups_x = x,
            groups_y = y,
            "scene patch dispatched"
        );
        upload.header_count
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Workgroup grid covering `groups` workgroups with at most
/// `max_per_dimension` along each axis.
pub(crate) fn dispatch_size(groups: u32, max_per_dimension: u32) -> (u32, u32) {
    assert!(groups > 0 && max_per_dimension > 0);
    let x = groups.min(max_per_dimension);
    let y = groups.div_ceil(x);
    assert!(
        y <= max_per_dimension,
        "{groups} patch headers exceed the dispatch grid"
    );
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{FrameArena, MemoryConfig};

    #[test]
    fn dispatch_fits_one_row_when_possible() {
        assert_eq!(dispatch_size(1, 65535), (1, 1));
        assert_eq!(dispatch_size(65535, 65535), (65535, 1));
    }

    #[test]
    fn dispatch_folds_into_y() {
        assert_eq!(dispatch_size(65536, 65535), (65535, 2));
        assert_eq!(dispatch_size(10, 4), (4, 3));
    }

    #[test]
    fn patches_land_in_scene_buffer() {
        let gpu = match GpuContext::headless() {
            Ok(gpu) => gpu,
            Err(err) => {
                eprintln!("skipping, no usable device: {err}");
                return;
            }
        };
        let config = MemoryConfig {
            scene_initial_size: 4096,
            scene_max_size: 4096,
            ..MemoryConfig::default()
        };
        let scene = ScenePool::new(&gpu, &config).expect("scene pool");
        let mut staging = StagingRing::new(&gpu, 1 << 16, config.frames_in_flight);
        let patcher = ScenePatcher::new(&gpu);

        let mut arena = FrameArena::new();
        arena.begin_frame();
        let run: Vec<u32> = (0..100).collect();
        patcher
            .batcher()
            .new_copy(&arena, 256, bytemuck::cast_slice(&run));
        patcher.batcher().new_copy_pod(&arena, 260, &0xDEAD_BEEFu32);

        let device = gpu.device();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Patch Test Encoder"),
        });
        // The overwrite splits the first 64-dword run in two
        assert_eq!(patcher.patch_gpu_scene(&mut encoder, &staging, &scene), 4);
        staging.flush(gpu.queue());
        staging.end_frame();

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Patch Test Readback"),
            size: 4096,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        scene.with_backing(|buffer| {
            encoder.copy_buffer_to_buffer(buffer.buffer(), 0, &readback, 0, 4096);
        });
        gpu.queue().submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        device.poll(wgpu::Maintain::Wait);
        let mapped = slice.get_mapped_range();
        let scene_words: Vec<u32> = bytemuck::cast_slice(&mapped[..]).to_vec();
        drop(mapped);
        readback.unmap();

        let mut expected = vec![0u32; 1024];
        expected[64..164].copy_from_slice(&run);
        expected[65] = 0xDEAD_BEEF;
        assert_eq!(scene_words, expected);
    }
}
