// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::context::DeviceContext;
use crate::error::EngineResult;
use crate::memory::{upload_via_staging, GpuBuffer};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

const fn v(pos: [f32; 3], color: [f32; 3]) -> Vertex {
    Vertex { pos, color }
}

pub const CUBE_VERTICES: [Vertex; 8] = [
    v([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0]),
    v([0.5, -0.5, -0.5], [0.0, 1.0, 0.0]),
    v([0.5, 0.5, -0.5], [0.0, 0.0, 1.0]),
    v([-0.5, 0.5, -0.5], [1.0, 1.0, 0.0]),
    v([-0.5, -0.5, 0.5], [1.0, 0.0, 1.0]),
    v([0.5, -0.5, 0.5], [0.0, 1.0, 1.0]),
    v([0.5, 0.5, 0.5], [1.0, 1.0, 1.0]),
    v([-0.5, 0.5, 0.5], [0.5, 0.5, 0.5]),
];

#[rustfmt::skip]
pub const CUBE_INDICES: [u16; 36] = [
    0, 1, 2, 2, 3, 0, // back
    1, 5, 6, 6, 2, 1, // right
    5, 4, 7, 7, 6, 5, // front
    4, 0, 3, 3, 7, 4, // left
    3, 2, 6, 6, 7, 3, // top
    4, 5, 1, 1, 0, 4, // bottom
];

/// Device-local vertex and index buffers, written once at construction.
pub struct Mesh {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    index_count: u32,
}

impl Mesh {
    pub fn upload(ctx: &DeviceContext, vertices: &[Vertex], indices: &[u16]) -> EngineResult<Self> {
        let vertices = upload_via_staging(
            ctx,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buf = upload_via_staging(
            ctx,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        Ok(Self {
            vertices,
            indices: index_buf,
            index_count: indices.len() as u32,
        })
    }

    pub fn cube(ctx: &DeviceContext) -> EngineResult<Self> {
        Self::upload(ctx, &CUBE_VERTICES, &CUBE_INDICES)
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.indices.handle(), 0, vk::IndexType::UINT16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_six_tightly_packed_floats() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
    }

    #[test]
    fn cube_indices_cover_twelve_triangles_over_eight_corners() {
        assert_eq!(CUBE_INDICES.len() / 3, 12);
        assert!(CUBE_INDICES.iter().all(|&i| (i as usize) < CUBE_VERTICES.len()));
        for corner in 0..8u16 {
            assert!(CUBE_INDICES.contains(&corner), "corner {corner} unused");
        }
    }

    #[test]
    fn cube_is_centered_unit() {
        let (min, max) = CUBE_VERTICES.iter().fold(
            ([f32::MAX; 3], [f32::MIN; 3]),
            |(mut lo, mut hi), vx| {
                for k in 0..3 {
                    lo[k] = lo[k].min(vx.pos[k]);
                    hi[k] = hi[k].max(vx.pos[k]);
                }
                (lo, hi)
            },
        );
        assert_eq!(min, [-0.5; 3]);
        assert_eq!(max, [0.5; 3]);
    }
}
