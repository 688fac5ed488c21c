// Buffer utilities for the scenes
//
// Buffer creation is split from memory binding because meshes pack several
// buffers into one allocation at aligned offsets.

use anyhow::{Context, Result};
use ash::vk;

/// Create a buffer with no memory bound yet.
pub fn create_buffer(
    device: &ash::Device,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> Result<vk::Buffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    unsafe {
        device
            .create_buffer(&buffer_info, None)
            .context("Failed to create buffer")
    }
}

/// Map `memory`, copy each `(offset, bytes)` range into it, and unmap.
///
/// Non-host-coherent memory gets an explicit flush before the unmap so the
/// GPU sees the writes.
pub fn write_mapped(
    device: &ash::Device,
    memory: vk::DeviceMemory,
    host_coherent: bool,
    writes: &[(vk::DeviceSize, &[u8])],
) -> Result<()> {
    unsafe {
        let mapping = device
            .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            .context("Failed to map memory")? as *mut u8;

        for (offset, bytes) in writes {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapping.add(*offset as usize), bytes.len());
        }

        if !host_coherent {
            let range = vk::MappedMemoryRange::builder()
                .memory(memory)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build();
            device
                .flush_mapped_memory_ranges(&[range])
                .context("Failed to flush mapped memory")?;
        }

        device.unmap_memory(memory);
    }

    Ok(())
}
