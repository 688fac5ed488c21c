// Swapchain - the fixed ring of presentable images
//
// Creates the swapchain with exactly the configured slot count, the
// single-subpass render pass, and one image view + framebuffer per image.
// No resize support: the surface extent must match the requested size, and
// any later drift is fatal.

use super::device::DeviceContext;
use anyhow::{ensure, Context, Result};
use ash::vk;

pub struct SwapchainContext {
    pub loader: ash::extensions::khr::Swapchain,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl SwapchainContext {
    pub fn new(
        instance: &ash::Instance,
        device_ctx: &DeviceContext,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        slot_count: usize,
    ) -> Result<Self> {
        let device = &device_ctx.device;
        let physical_device = device_ctx.physical_device;

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .context("Failed to query surface present modes")?;

        // The window reported this size when it was created; the surface must
        // still agree. Drift between the two is not a resize event.
        ensure!(
            capabilities.current_extent.width == width
                && capabilities.current_extent.height == height,
            "Surface extent {}x{} does not match the requested {}x{}",
            capabilities.current_extent.width,
            capabilities.current_extent.height,
            width,
            height
        );
        let extent = capabilities.current_extent;

        ensure!(
            slot_count_supported(
                slot_count as u32,
                capabilities.min_image_count,
                capabilities.max_image_count
            ),
            "Slot count {} outside the supported image count range [{}, {}]",
            slot_count,
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        let pre_transform =
            choose_pre_transform(capabilities.supported_transforms, capabilities.current_transform);
        let present_mode = choose_present_mode(&present_modes);

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .context("Failed to query surface formats")?;
        let surface_format =
            choose_surface_format(&formats).context("Surface reports no formats")?;

        log::info!(
            "Creating swapchain: {}x{}, {} slots, {:?}, {:?}",
            extent.width,
            extent.height,
            slot_count,
            surface_format.format,
            present_mode
        );

        let loader = ash::extensions::khr::Swapchain::new(instance, device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(slot_count as u32)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        // The slot ring (command buffers, fences, framebuffers) is sized to
        // slot_count; a driver handing back more images would break it.
        ensure!(
            images.len() == slot_count,
            "Driver returned {} swapchain images, expected exactly {}",
            images.len(),
            slot_count
        );

        let render_pass = create_render_pass(device, surface_format.format)?;

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .create_image_view(&create_info, None)
                        .context("Failed to create image view")
                }
            })
            .collect();
        let image_views = image_views?;

        let framebuffers: Result<Vec<_>> = image_views
            .iter()
            .map(|&view| {
                let attachments = [view];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                unsafe {
                    device
                        .create_framebuffer(&framebuffer_info, None)
                        .context("Failed to create framebuffer")
                }
            })
            .collect();

        Ok(Self {
            loader,
            swapchain,
            images,
            image_views,
            framebuffers: framebuffers?,
            render_pass,
            format: surface_format.format,
            extent,
        })
    }

    /// Acquire the next presentable slot, signaling `semaphore` when the
    /// image is ready. Blocks with unbounded timeout. The returned index is
    /// driver-chosen and not guaranteed sequential.
    pub fn acquire_next_slot(&self, semaphore: vk::Semaphore) -> Result<usize> {
        let (index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
        .context("Failed to acquire swapchain image")?;

        if suboptimal {
            log::warn!("Swapchain is suboptimal for the surface");
        }

        Ok(index as usize)
    }

    /// Queue a present of `slot`, waiting on `wait_semaphore`.
    pub fn present(
        &self,
        queue: vk::Queue,
        slot: usize,
        wait_semaphore: vk::Semaphore,
    ) -> Result<()> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [slot as u32];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.loader.queue_present(queue, &present_info) }
            .context("Failed to present swapchain image")?;

        if suboptimal {
            log::warn!("Swapchain is suboptimal for the surface");
        }

        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            device.destroy_render_pass(self.render_pass, None);
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Single subpass, one color attachment: clear on load, keep on store,
/// presentable when the pass ends.
fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_refs = [vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build()];

    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build()];

    let attachments = [attachment];
    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses);

    unsafe {
        device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}

/// `max_image_count == 0` means the surface puts no upper bound on images.
fn slot_count_supported(count: u32, min_image_count: u32, max_image_count: u32) -> bool {
    count >= min_image_count && (max_image_count == 0 || count <= max_image_count)
}

/// Take the surface's reported format; a lone "undefined" entry means the
/// surface has no preference and we substitute an 8-bit RGBA default.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let first = formats.first()?;
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        Some(vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: first.color_space,
        })
    } else {
        Some(*first)
    }
}

fn choose_pre_transform(
    supported: vk::SurfaceTransformFlagsKHR,
    current: vk::SurfaceTransformFlagsKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if supported.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        current
    }
}

/// FIFO: vsync'd, non-tearing, and the only mode every driver must support.
fn choose_present_mode(_available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_count_bounds() {
        assert!(slot_count_supported(3, 2, 8));
        assert!(slot_count_supported(2, 2, 8));
        assert!(slot_count_supported(8, 2, 8));
        assert!(!slot_count_supported(1, 2, 8));
        assert!(!slot_count_supported(9, 2, 8));
    }

    #[test]
    fn zero_max_image_count_is_unlimited() {
        assert!(slot_count_supported(64, 2, 0));
        assert!(!slot_count_supported(1, 2, 0));
    }

    #[test]
    fn undefined_format_gets_rgba_default() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn reported_format_is_kept() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn no_formats_is_none() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn identity_transform_preferred() {
        let supported =
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            choose_pre_transform(supported, vk::SurfaceTransformFlagsKHR::ROTATE_90),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );
    }

    #[test]
    fn current_transform_when_identity_unsupported() {
        assert_eq!(
            choose_pre_transform(
                vk::SurfaceTransformFlagsKHR::ROTATE_90,
                vk::SurfaceTransformFlagsKHR::ROTATE_90
            ),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );
    }

    #[test]
    fn present_mode_is_always_fifo() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }
}
