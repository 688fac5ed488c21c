// Textured quad scene
//
// The same quad, sampled from a texture. Vertex/index data and the texture
// both go to device-local memory through host-visible staging buffers, with
// the copies recorded into the one-shot upload command buffer. Uses dynamic
// viewport/scissor and a descriptor set with an immutable sampler.

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
    Vertex { position: [-1.0, 1.0, 0.0], uv: [0.0, 1.0] },
    // Upper right
    Vertex { position: [1.0, 1.0, 0.0], uv: [1.0, 1.0] },
    // Bottom right
    Vertex { position: [1.0, -1.0, 0.0], uv: [1.0, 0.0] },
    // Bottom left
    Vertex { position: [-1.0, -1.0, 0.0], uv: [0.0, 0.0] },
];

const INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

const TEXTURE_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

#[derive(Default)]
pub struct TexturedQuadScene {
    extent: vk::Extent2D,
    sampler: vk::Sampler,
    texture_image: vk::Image,
    texture_view: vk::ImageView,
    texture_memory: vk::DeviceMemory,
    image_staging_buffer: vk::Buffer,
    image_staging_memory: vk::DeviceMemory,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    vertex_buffer: vk::Buffer,
    index_buffer: vk::Buffer,
    mesh_memory: vk::DeviceMemory,
    mesh_staging_buffer: vk::Buffer,
    mesh_staging_memory: vk::DeviceMemory,
}

/// RGBA checkerboard. Image decoding is an external concern; the texture
/// content only has to be recognizable on screen.
fn checker_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let light = ((x / CHECKER_CELL) + (y / CHECKER_CELL)) % 2 == 0;
            let value = if light { 0xe0 } else { 0x30 };
            pixels.extend_from_slice(&[value, value, value, 0xff]);
        }
    }
    pixels
}

impl TexturedQuadScene {
    fn create_sampler(&mut self, gpu: &SceneContext) -> Result<()> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR);

        self.sampler = unsafe { gpu.device.create_sampler(&sampler_info, None) }
            .context("Failed to create sampler")?;
        Ok(())
    }

    fn create_texture(&mut self, gpu: &SceneContext, upload: vk::CommandBuffer) -> Result<()> {
        let device = gpu.device;
        let pixels = checker_pixels(TEXTURE_SIZE, TEXTURE_SIZE);

        let queue_families = [gpu.queue_family_index];
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width: TEXTURE_SIZE,
                height: TEXTURE_SIZE,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.texture_image = unsafe { device.create_image(&image_info, None) }
            .context("Failed to create texture image")?;

        let types = memory::enumerate_memory_types(gpu.instance, gpu.physical_device);

        let image_req = unsafe { device.get_image_memory_requirements(self.texture_image) };
        let image_alloc = memory::allocate(
            device,
            &types,
            image_req.size,
            image_req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?
        .context("No device-local memory type for the texture")?;
        self.texture_memory = image_alloc.memory;

        unsafe {
            device
                .bind_image_memory(self.texture_image, self.texture_memory, 0)
                .context("Failed to bind texture memory")?;
        }

        // Staging buffer holding the pixels until the copy below executes.
        self.image_staging_buffer =
            buffer::create_buffer(device, image_req.size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let staging_req =
            unsafe { device.get_buffer_memory_requirements(self.image_staging_buffer) };
        let staging_alloc = memory::allocate(
            device,
            &types,
            staging_req.size,
            staging_req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?
        .context("No host-visible memory type for the texture upload")?;
        self.image_staging_memory = staging_alloc.memory;

        unsafe {
            device
                .bind_buffer_memory(self.image_staging_buffer, self.image_staging_memory, 0)
                .context("Failed to bind staging buffer memory")?;
        }

        buffer::write_mapped(
            device,
            self.image_staging_memory,
            staging_alloc.host_coherent,
            &[(0, &pixels)],
        )?;

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.texture_image)
            .subresource_range(subresource_range)
            .build();

        let copy = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: TEXTURE_SIZE,
                height: TEXTURE_SIZE,
                depth: 1,
            })
            .build();

        let to_sampled = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.texture_image)
            .subresource_range(subresource_range)
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                upload,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            device.cmd_copy_buffer_to_image(
                upload,
                self.image_staging_buffer,
                self.texture_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
            device.cmd_pipeline_barrier(
                upload,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_sampled],
            );
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.texture_image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .subresource_range(subresource_range);

        self.texture_view = unsafe { device.create_image_view(&view_info, None) }
            .context("Failed to create texture view")?;

        Ok(())
    }

    fn create_descriptors(&mut self, gpu: &SceneContext) -> Result<()> {
        let device = gpu.device;

        let immutable_samplers = [self.sampler];
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .immutable_samplers(&immutable_samplers)
                .build(),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        self.descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&layout_info, None) }
                .context("Failed to create descriptor set layout")?;

        let set_layouts = [self.descriptor_set_layout];
        let pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        self.pipeline_layout =
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }
                .context("Failed to create pipeline layout")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?;
        self.descriptor_set = sets[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: self.texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info)
            .build()];

        unsafe { device.update_descriptor_sets(&writes, &[]) };

        Ok(())
    }

    fn create_pipeline(&mut self, gpu: &SceneContext) -> Result<()> {
        self.vertex_shader = shader::load_shader_module(gpu.device, "shaders/quad.vert.spv")?;
        self.fragment_shader =
            shader::load_shader_module(gpu.device, "shaders/quad_textured.frag.spv")?;

        self.pipeline = pipeline::create_quad_pipeline(
            gpu.device,
            gpu.render_pass,
            self.pipeline_layout,
            self.vertex_shader,
            self.fragment_shader,
            gpu.extent,
            true,
        )?;

        Ok(())
    }

    fn create_mesh_buffers(&mut self, gpu: &SceneContext, upload: vk::CommandBuffer) -> Result<()> {
        let device = gpu.device;
        let types = memory::enumerate_memory_types(gpu.instance, gpu.physical_device);

        self.vertex_buffer = buffer::create_buffer(
            device,
            std::mem::size_of_val(&VERTICES) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        self.index_buffer = buffer::create_buffer(
            device,
            std::mem::size_of_val(&INDICES) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let vertex_req = unsafe { device.get_buffer_memory_requirements(self.vertex_buffer) };
        let index_req = unsafe { device.get_buffer_memory_requirements(self.index_buffer) };

        let index_offset = round_to_next_multiple(vertex_req.size, index_req.alignment);
        let total_size = index_offset + index_req.size;
        let shared_type_bits = vertex_req.memory_type_bits & index_req.memory_type_bits;

        let mesh_alloc = memory::allocate(
            device,
            &types,
            total_size,
            shared_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?
        .context("No device-local memory type for the quad mesh")?;
        self.mesh_memory = mesh_alloc.memory;

        unsafe {
            device
                .bind_buffer_memory(self.vertex_buffer, self.mesh_memory, 0)
                .context("Failed to bind vertex buffer memory")?;
            device
                .bind_buffer_memory(self.index_buffer, self.mesh_memory, index_offset)
                .context("Failed to bind index buffer memory")?;
        }

        // Staging copy of both buffers at the same offsets.
        self.mesh_staging_buffer =
            buffer::create_buffer(device, total_size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let staging_req =
            unsafe { device.get_buffer_memory_requirements(self.mesh_staging_buffer) };
        let staging_alloc = memory::allocate(
            device,
            &types,
            staging_req.size,
            staging_req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?
        .context("No host-visible memory type for the mesh upload")?;
        self.mesh_staging_memory = staging_alloc.memory;

        unsafe {
            device
                .bind_buffer_memory(self.mesh_staging_buffer, self.mesh_staging_memory, 0)
                .context("Failed to bind mesh staging memory")?;
        }

        buffer::write_mapped(
            device,
            self.mesh_staging_memory,
            staging_alloc.host_coherent,
            &[
                (0, bytemuck::cast_slice(&VERTICES)),
                (index_offset, bytemuck::cast_slice(&INDICES)),
            ],
        )?;

        let vertex_copy = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: std::mem::size_of_val(&VERTICES) as vk::DeviceSize,
        };
        let index_copy = vk::BufferCopy {
            src_offset: index_offset,
            dst_offset: 0,
            size: std::mem::size_of_val(&INDICES) as vk::DeviceSize,
        };

        let upload_barriers = [
            vk::BufferMemoryBarrier::builder()
                .buffer(self.vertex_buffer)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ)
                .size(vk::WHOLE_SIZE)
                .build(),
            vk::BufferMemoryBarrier::builder()
                .buffer(self.index_buffer)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::INDEX_READ)
                .size(vk::WHOLE_SIZE)
                .build(),
        ];

        unsafe {
            device.cmd_copy_buffer(
                upload,
                self.mesh_staging_buffer,
                self.vertex_buffer,
                &[vertex_copy],
            );
            device.cmd_copy_buffer(
                upload,
                self.mesh_staging_buffer,
                self.index_buffer,
                &[index_copy],
            );
            device.cmd_pipeline_barrier(
                upload,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[],
                &upload_barriers,
                &[],
            );
        }

        Ok(())
    }
}

impl ContentProvider for TexturedQuadScene {
    fn initialize(&mut self, gpu: &SceneContext, upload: vk::CommandBuffer) -> Result<()> {
        self.extent = gpu.extent;

        self.create_sampler(gpu)?;
        self.create_texture(gpu, upload)?;
        self.create_descriptors(gpu)?;
        self.create_pipeline(gpu)?;
        self.create_mesh_buffers(gpu, upload)
    }

    fn render(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }];

        unsafe {
            device.cmd_set_viewport(cmd, 0, &viewports);
            device.cmd_set_scissor(cmd, 0, &scissors);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
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

            device.destroy_image_view(self.texture_view, None);
            device.destroy_image(self.texture_image, None);
            device.free_memory(self.texture_memory, None);

            device.destroy_buffer(self.image_staging_buffer, None);
            device.free_memory(self.image_staging_memory, None);

            device.destroy_buffer(self.mesh_staging_buffer, None);
            device.free_memory(self.mesh_staging_memory, None);

            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);

            device.destroy_sampler(self.sampler, None);

            device.destroy_shader_module(self.vertex_shader, None);
            device.destroy_shader_module(self.fragment_shader, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checker_covers_every_pixel() {
        let pixels = checker_pixels(64, 64);
        assert_eq!(pixels.len(), 64 * 64 * 4);
        // Fully opaque.
        assert!(pixels.chunks_exact(4).all(|px| px[3] == 0xff));
    }

    #[test]
    fn checker_alternates_across_cells() {
        let pixels = checker_pixels(64, 64);
        let texel = |x: usize, y: usize| pixels[(y * 64 + x) * 4];
        assert_eq!(texel(0, 0), texel(CHECKER_CELL as usize * 2, 0));
        assert_ne!(texel(0, 0), texel(CHECKER_CELL as usize, 0));
        assert_ne!(texel(0, 0), texel(0, CHECKER_CELL as usize));
    }
}
