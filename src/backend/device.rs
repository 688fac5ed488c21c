// Logical device, graphics queue, and command buffers
//
// One queue from the selected graphics family, one command pool, and the
// fixed set of command buffers: one per swapchain slot plus a one-shot setup
// buffer for scene uploads.

use super::instance::PhysicalDeviceInfo;
use anyhow::{Context, Result};
use ash::vk;

pub struct DeviceContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub command_pool: vk::CommandPool,
    /// One command buffer per swapchain slot, re-recorded every frame.
    pub frame_command_buffers: Vec<vk::CommandBuffer>,
    /// Recorded and submitted exactly once, before the frame loop starts.
    pub setup_command_buffer: vk::CommandBuffer,
}

impl DeviceContext {
    pub fn new(
        instance: &ash::Instance,
        selected: &PhysicalDeviceInfo,
        slot_count: usize,
    ) -> Result<Self> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(selected.graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe {
            instance.create_device(selected.physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let queue = unsafe { device.get_device_queue(selected.graphics_queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(selected.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(slot_count as u32 + 1);

        let mut command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let setup_command_buffer = command_buffers
            .pop()
            .context("Command buffer allocation returned too few buffers")?;

        log::info!(
            "Created logical device: queue family {}, {} frame command buffers",
            selected.graphics_queue_family,
            command_buffers.len()
        );

        Ok(Self {
            device,
            physical_device: selected.physical_device,
            queue,
            queue_family_index: selected.graphics_queue_family,
            command_pool,
            frame_command_buffers: command_buffers,
            setup_command_buffer,
        })
    }

    pub fn destroy(&self) {
        unsafe {
            // The pool frees its command buffers with it.
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}
