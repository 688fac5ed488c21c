// Vulkan instance and physical device selection
//
// Responsibilities:
// - Instance creation with the surface extensions the display requires
// - Optional validation layer + debug messenger (runtime flag)
// - Physical device selection

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// The physical device the instance settled on, plus the queue family that
/// all graphics work goes through. Immutable once selected.
pub struct PhysicalDeviceInfo {
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue_family: u32,
}

/// Vulkan entry point and instance, with the debug messenger when enabled.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceContext {
    /// Create the Vulkan instance.
    ///
    /// Returns `Ok(None)` when the machine has no usable Vulkan driver: that
    /// is a supported configuration, not an error, and the caller reports
    /// "not initialized" and exits. Every failure after this gate is fatal.
    pub fn new(display_handle: RawDisplayHandle, enable_debug: bool) -> Result<Option<Self>> {
        let entry = match unsafe { Entry::load() } {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Vulkan loader unavailable: {}", e);
                return Ok(None);
            }
        };

        let app_name = CString::new("frameloop")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();
        if enable_debug {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layers = if enable_debug {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = match unsafe { entry.create_instance(&create_info, None) } {
            Ok(instance) => instance,
            Err(vk::Result::ERROR_INCOMPATIBLE_DRIVER) => {
                log::warn!("No compatible Vulkan driver found");
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to create Vulkan instance"),
        };

        let debug_utils = if enable_debug {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        Ok(Some(Self {
            entry,
            instance,
            debug_utils,
        }))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// Select the first physical device exposing a graphics-capable queue
    /// family, in enumeration order.
    ///
    /// First fit by policy: no scoring, no preference among eligible devices.
    pub fn select_physical_device(&self) -> Result<PhysicalDeviceInfo> {
        let devices = unsafe { self.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        for physical_device in devices {
            let families = unsafe {
                self.instance
                    .get_physical_device_queue_family_properties(physical_device)
            };

            if let Some(graphics_queue_family) = find_graphics_family(&families) {
                let properties = unsafe {
                    self.instance.get_physical_device_properties(physical_device)
                };
                log::info!(
                    "Selected GPU: {} (queue family {})",
                    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
                    graphics_queue_family
                );

                return Ok(PhysicalDeviceInfo {
                    physical_device,
                    graphics_queue_family,
                });
            }
        }

        anyhow::bail!("No physical device with a graphics-capable queue family")
    }

    pub fn destroy(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn find_graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(index, _)| index as u32)
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(queue_flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn picks_first_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(find_graphics_family(&families), Some(1));
    }

    #[test]
    fn no_graphics_family_means_none() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(find_graphics_family(&families), None);
    }
}
