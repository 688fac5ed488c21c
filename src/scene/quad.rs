// Plain quad scene
//
// One screen-filling quad, vertex and index buffer packed into a single
// host-visible allocation. No descriptors, no texture.

use super::{pipeline, ContentProvider, SceneContext};
use crate::backend::{buffer, memory, shader};
use crate::util::round_to_next_multiple;
use anyhow::{Context, Result};
use ash::vk;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

const VERTICES: [Vertex; 4] = [
    // Upper left
    Vertex { position: [-1.0, 1.0, 0.0], uv: [0.0, 0.0] },
    // Upper right
    Vertex { position: [1.0, 1.0, 0.0], uv: [1.0, 0.0] },
    // Bottom right
    Vertex { position: [1.0, -1.0, 0.0], uv: [1.0, 1.0] },
    // Bottom left
    Vertex { position: [-1.0, -1.0, 0.0], uv: [0.0, 1.0] },
];

const INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

#[derive(Default)]
pub struct QuadScene {
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    vertex_buffer: vk::Buffer,
    index_buffer: vk::Buffer,
    mesh_memory: vk::DeviceMemory,
}

impl QuadScene {
    fn create_pipeline(&mut self, gpu: &SceneContext) -> Result<()> {
        self.vertex_shader = shader::load_shader_module(gpu.device, "shaders/quad.vert.spv")?;
        self.fragment_shader = shader::load_shader_module(gpu.device, "shaders/quad.frag.spv")?;

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        self.pipeline_layout = unsafe { gpu.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        self.pipeline = pipeline::create_quad_pipeline(
            gpu.device,
            gpu.render_pass,
            self.pipeline_layout,
            self.vertex_shader,
            self.fragment_shader,
            gpu.extent,
            false,
        )?;

        Ok(())
    }

    fn create_mesh_buffers(&mut self, gpu: &SceneContext) -> Result<()> {
        let device = gpu.device;
        let types = memory::enumerate_memory_types(gpu.instance, gpu.physical_device);

        self.vertex_buffer = buffer::create_buffer(
            device,
            std::mem::size_of_val(&VERTICES) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        self.index_buffer = buffer::create_buffer(
            device,
            std::mem::size_of_val(&INDICES) as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let vertex_req = unsafe { device.get_buffer_memory_requirements(self.vertex_buffer) };
        let index_req = unsafe { device.get_buffer_memory_requirements(self.index_buffer) };

        // The index buffer sits behind the vertex buffer in one allocation;
        // its alignment decides the next suitable offset.
        let index_offset = round_to_next_multiple(vertex_req.size, index_req.alignment);
        let total_size = index_offset + index_req.size;

        let allocation = memory::allocate(
            device,
            &types,
            total_size,
            vertex_req.memory_type_bits & index_req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?
        .context("No host-visible memory type for the quad mesh")?;
        self.mesh_memory = allocation.memory;

        unsafe {
            device
                .bind_buffer_memory(self.vertex_buffer, self.mesh_memory, 0)
                .context("Failed to bind vertex buffer memory")?;
            device
                .bind_buffer_memory(self.index_buffer, self.mesh_memory, index_offset)
                .context("Failed to bind index buffer memory")?;
        }

        buffer::write_mapped(
            device,
            self.mesh_memory,
            allocation.host_coherent,
            &[
                (0, bytemuck::cast_slice(&VERTICES)),
                (index_offset, bytemuck::cast_slice(&INDICES)),
            ],
        )
    }
}

impl ContentProvider for QuadScene {
    fn initialize(&mut self, gpu: &SceneContext, _upload: vk::CommandBuffer) -> Result<()> {
        self.create_pipeline(gpu)?;
        self.create_mesh_buffers(gpu)
    }

    fn render(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_draw_indexed(cmd, INDICES.len() as u32, 1, 0, 0, 0);
        }
    }

    fn shutdown(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);

            device.destroy_buffer(self.vertex_buffer, None);
            device.destroy_buffer(self.index_buffer, None);
            device.free_memory(self.mesh_memory, None);

            device.destroy_shader_module(self.vertex_shader, None);
            device.destroy_shader_module(self.fragment_shader, None);
        }
    }
}
