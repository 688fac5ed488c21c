// Device memory enumeration and first-fit allocation
//
// Scenes allocate raw device memory by scanning the memory type table for the
// first type that satisfies both the resource's requirement bits and the
// requested property flags. First fit by policy, ascending index order.

use anyhow::{Context, Result};
use ash::vk;

/// The heap a memory type draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapInfo {
    pub size: u64,
    pub device_local: bool,
}

/// One entry of the physical device's memory type table.
#[derive(Debug, Clone, Copy)]
pub struct MemoryTypeInfo {
    pub index: u32,
    pub flags: vk::MemoryPropertyFlags,
    pub heap: MemoryHeapInfo,
}

impl MemoryTypeInfo {
    /// Host-coherent memory does not need an explicit flush after a host
    /// write before the GPU reads it.
    pub fn is_host_coherent(&self) -> bool {
        self.flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }
}

/// Snapshot the memory type table with per-type flags and owning-heap info.
///
/// Recomputed per call; nothing caches this.
pub fn enumerate_memory_types(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Vec<MemoryTypeInfo> {
    let properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

    let heaps: Vec<MemoryHeapInfo> = properties.memory_heaps
        [..properties.memory_heap_count as usize]
        .iter()
        .map(|heap| MemoryHeapInfo {
            size: heap.size,
            device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
        })
        .collect();

    properties.memory_types[..properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .map(|(index, memory_type)| MemoryTypeInfo {
            index: index as u32,
            flags: memory_type.property_flags,
            heap: heaps[memory_type.heap_index as usize],
        })
        .collect()
}

/// Find the first memory type whose bit is set in `type_bits` and whose
/// flags are a superset of `required`.
pub fn find_memory_type<'a>(
    types: &'a [MemoryTypeInfo],
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<&'a MemoryTypeInfo> {
    types
        .iter()
        .find(|info| (type_bits & (1 << info.index)) != 0 && info.flags.contains(required))
}

/// A raw device memory allocation.
pub struct DeviceAllocation {
    pub memory: vk::DeviceMemory,
    /// Callers flush mapped writes when this is false.
    pub host_coherent: bool,
}

/// Allocate `size` bytes from the first matching memory type.
///
/// Returns `Ok(None)` when no type qualifies; the Vulkan allocation itself
/// failing is fatal.
pub fn allocate(
    device: &ash::Device,
    types: &[MemoryTypeInfo],
    size: vk::DeviceSize,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<Option<DeviceAllocation>> {
    let Some(memory_type) = find_memory_type(types, type_bits, required) else {
        return Ok(None);
    };

    log::trace!(
        "Allocating {} bytes from memory type {} (heap: {} MiB, device-local: {})",
        size,
        memory_type.index,
        memory_type.heap.size >> 20,
        memory_type.heap.device_local
    );

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(size)
        .memory_type_index(memory_type.index);

    let memory = unsafe { device.allocate_memory(&alloc_info, None) }
        .context("Failed to allocate device memory")?;

    Ok(Some(DeviceAllocation {
        memory,
        host_coherent: memory_type.is_host_coherent(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAP: MemoryHeapInfo = MemoryHeapInfo {
        size: 4 << 30,
        device_local: true,
    };

    fn memory_type(index: u32, flags: vk::MemoryPropertyFlags) -> MemoryTypeInfo {
        MemoryTypeInfo { index, flags, heap: HEAP }
    }

    fn synthetic_table() -> Vec<MemoryTypeInfo> {
        vec![
            memory_type(0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            memory_type(
                1,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
            memory_type(
                2,
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::HOST_CACHED,
            ),
        ]
    }

    #[test]
    fn finds_device_local_only() {
        let table = synthetic_table();
        let found =
            find_memory_type(&table, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(found.index, 0);
    }

    #[test]
    fn finds_first_host_visible() {
        let table = synthetic_table();
        let found =
            find_memory_type(&table, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        // Ascending index order: type 2 also matches but 1 comes first.
        assert_eq!(found.index, 1);
        assert!(found.is_host_coherent());
    }

    #[test]
    fn respects_requirement_bits() {
        let table = synthetic_table();
        // Type 1 is masked out, so the host-cached type wins.
        let found =
            find_memory_type(&table, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(found.index, 2);
    }

    #[test]
    fn required_flags_are_a_superset_test() {
        let table = synthetic_table();
        let required =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED;
        let found = find_memory_type(&table, 0b111, required).unwrap();
        assert_eq!(found.index, 2);
        assert!(found.flags.contains(required));
    }

    #[test]
    fn no_match_yields_none() {
        let table = synthetic_table();
        assert!(find_memory_type(
            &table,
            0b111,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE
        )
        .is_none());
        // All types masked out.
        assert!(find_memory_type(&table, 0, vk::MemoryPropertyFlags::empty()).is_none());
    }
}
