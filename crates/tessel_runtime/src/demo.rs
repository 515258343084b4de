//! Headless frame loop driving the GPU memory subsystem
//!
//! Uploads a set of procedural meshes into the geometry pool, gives every
//! object a record in the scene pool and rewrites those records each frame
//! from a rayon worker pool through the micro-patcher.

use crate::settings::DemoSettings;
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};
use rayon::prelude::*;
use tessel_core::PoolToken;
use tessel_metrics::RingBuffer;
use tessel_render::pools::DevicePoolExt;
use tessel_render::{wgpu, GpuContext, GpuMemory};

const SCENE_RECORD_ALIGNMENT: u64 = 16;
const GEOMETRY_ALIGNMENT: u64 = 4;

/// Per-object record in the scene buffer
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ObjectRecord {
    world: Mat4,
    tint: Vec4,
}

/// Per-frame constants staged through the ring
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct FrameUniforms {
    view_proj: Mat4,
    time: f32,
    frame: u32,
    object_count: u32,
    _padding: u32,
}

struct Mesh {
    vertices: PoolToken,
    indices: PoolToken,
}

struct Object {
    record: PoolToken,
    mesh: usize,
    phase: f32,
}

impl Object {
    fn record_at(&self, time: f32) -> ObjectRecord {
        let angle = time + self.phase;
        let position = Vec3::new(angle.cos() * 10.0, (self.phase * 3.0).sin(), angle.sin() * 10.0);
        ObjectRecord {
            world: Mat4::from_rotation_translation(Quat::from_rotation_y(angle), position),
            tint: Vec4::new(self.phase.fract(), (self.mesh % 4) as f32 / 3.0, 1.0, 1.0),
        }
    }
}

pub fn run(gpu: &GpuContext, memory: &mut GpuMemory, settings: &DemoSettings) -> Result<()> {
    let meshes = upload_meshes(memory, settings.meshes.max(1));

    let record_size = std::mem::size_of::<ObjectRecord>() as u64;
    let mut objects: Vec<Object> = (0..settings.objects)
        .map(|i| Object {
            record: memory.scene().allocate(record_size, SCENE_RECORD_ALIGNMENT),
            mesh: i as usize % meshes.len(),
            phase: i as f32 * 0.618,
        })
        .collect();
    tracing::info!(
        objects = objects.len(),
        meshes = meshes.len(),
        "scene populated"
    );

    let mut patch_history = RingBuffer::new(60);
    let mut staged_history = RingBuffer::new(60);
    let view_proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0)
        * Mat4::look_at_rh(Vec3::new(0.0, 8.0, 20.0), Vec3::ZERO, Vec3::Y);

    for frame in 0..settings.frames {
        let time = frame as f32 / 60.0;

        // Recycle a slice of objects; the old records stay reserved until
        // the GPU is done with them.
        let churn = settings.churn_per_frame as usize;
        if churn > 0 && !objects.is_empty() {
            let start = (frame as usize * churn) % objects.len();
            for object in objects.iter_mut().skip(start).take(churn) {
                memory.scene().deferred_free(object.record);
                object.record = memory.scene().allocate(record_size, SCENE_RECORD_ALIGNMENT);
            }
        }

        let shared: &GpuMemory = memory;
        objects.par_iter().for_each(|object| {
            shared.new_scene_copy_pod(object.record.offset(), &object.record_at(time));
        });

        let uniforms = FrameUniforms {
            view_proj,
            time,
            frame,
            object_count: objects.len() as u32,
            _padding: 0,
        };
        let uniform_token = shared.staging().push_pod(&uniforms);
        tracing::trace!(offset = uniform_token.offset, "frame uniforms staged");

        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let report = memory.finish_frame(&mut encoder);
        gpu.queue().submit(std::iter::once(encoder.finish()));
        gpu.device().poll(wgpu::Maintain::Poll);

        patch_history.push(report.patch_headers as u64);
        staged_history.push(report.staging_claimed);
    }

    let (geometry, scene) = memory.stats();
    let (ring_avg, ring_peak) = memory.staging().allocator().usage();
    tracing::info!(
        frames = settings.frames,
        avg_patch_headers = patch_history.average(),
        avg_staged_bytes = staged_history.average(),
        ring_avg,
        ring_peak,
        geometry_in_use = geometry.in_use_bytes,
        scene_live = scene.live_allocations,
        scene_grow_count = scene.grow_count,
        "demo finished"
    );
    for (name, total) in memory.staging().allocator().counters().iter() {
        tracing::debug!(counter = name, total, "staging ring counter");
    }

    for object in objects {
        memory.scene().deferred_free(object.record);
    }
    for mesh in meshes {
        memory.geometry().deferred_free(mesh.vertices);
        memory.geometry().deferred_free(mesh.indices);
    }
    Ok(())
}

fn upload_meshes(memory: &GpuMemory, count: u32) -> Vec<Mesh> {
    (0..count)
        .map(|i| {
            // Ring of `segments` quads around the Y axis
            let segments = 8 * (i + 1);
            let vertices: Vec<Vec3> = (0..segments)
                .flat_map(|s| {
                    let angle = s as f32 / segments as f32 * std::f32::consts::TAU;
                    let (sin, cos) = angle.sin_cos();
                    [Vec3::new(cos, -0.5, sin), Vec3::new(cos, 0.5, sin)]
                })
                .collect();
            let indices: Vec<u32> = (0..segments)
                .flat_map(|s| {
                    let a = s * 2;
                    let b = ((s + 1) % segments) * 2;
                    [a, b, a + 1, a + 1, b, b + 1]
                })
                .collect();

            let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
            let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
            let geometry = memory.geometry();
            let mesh = Mesh {
                vertices: geometry.allocate(vertex_bytes.len() as u64, GEOMETRY_ALIGNMENT),
                indices: geometry.allocate(index_bytes.len() as u64, GEOMETRY_ALIGNMENT),
            };
            geometry.write(mesh.vertices, vertex_bytes);
            geometry.write(mesh.indices, index_bytes);
            mesh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_records_have_no_padding() {
        assert_eq!(std::mem::size_of::<ObjectRecord>(), 80);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 80);
    }

    #[test]
    fn records_move_over_time() {
        let object = Object {
            record: PoolToken::UNUSED,
            mesh: 0,
            phase: 1.0,
        };
        let a = object.record_at(0.0);
        let b = object.record_at(0.5);
        assert_ne!(a.world, b.world);
        assert_eq!(a.tint, b.tint);
    }
}
