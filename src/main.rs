// frameloop - a fixed-frame-count Vulkan frame-lifecycle driver
//
// Bring-up happens once, in dependency order:
//   instance -> physical device -> surface -> device -> swapchain -> sync
// then the frame loop runs to the configured frame count and everything is
// destroyed in strict reverse order. Only the slot cursor and the fences
// mutate in between.
//
// A machine without a usable Vulkan driver is a supported configuration:
// the process reports "not initialized" and exits with status 1, no crash.
// Every inconsistency after that gate is fatal.

mod backend;
mod config;
mod frame_loop;
mod scene;
mod util;

use anyhow::{Context, Result};
use backend::{DeviceContext, FrameSync, InstanceContext, SwapchainContext};
use config::Config;
use frame_loop::FrameLoop;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use scene::SceneContext;
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowAttributes};

fn main() -> Result<()> {
    let config = Config::load();
    init_logging(&config);

    log::info!(
        "Starting frameloop: {}x{}, {} slots, {} frames, scene '{}'",
        config.window.width,
        config.window.height,
        config.graphics.slot_count,
        config.graphics.frame_count,
        config.scene.provider
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.outcome {
        Outcome::Completed | Outcome::Pending => Ok(()),
        Outcome::NotInitialized => {
            log::error!("Vulkan is not initialized: no compatible driver found");
            std::process::exit(1);
        }
        Outcome::Failed(e) => Err(e),
    }
}

fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log::LevelFilter::Info);

    if config.debug.log_to_file {
        match std::fs::File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", config.debug.log_file, e);
            }
        }
    }

    builder.init();
}

enum Outcome {
    Pending,
    Completed,
    NotInitialized,
    Failed(anyhow::Error),
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    outcome: Outcome,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            outcome: Outcome::Pending,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Resizing is unsupported; the swapchain asserts that the surface
        // extent still matches this size.
        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.outcome = Outcome::Failed(e.into());
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());

        self.outcome = match run_frames(&self.config, &window) {
            Ok(true) => Outcome::Completed,
            Ok(false) => Outcome::NotInitialized,
            Err(e) => Outcome::Failed(e),
        };

        event_loop.exit();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        if let WindowEvent::CloseRequested = event {
            event_loop.exit();
        }
    }
}

/// Bring up Vulkan, run the frame loop, tear everything down.
///
/// Returns `Ok(false)` when no compatible driver exists (the soft-failure
/// path); everything else that can go wrong is an error.
fn run_frames(config: &Config, window: &Window) -> Result<bool> {
    let display_handle = window.raw_display_handle();
    let window_handle = window.raw_window_handle();

    let mut instance_ctx =
        match InstanceContext::new(display_handle, config.debug.validation_layers)? {
            Some(ctx) => ctx,
            None => return Ok(false),
        };

    let selected = instance_ctx.select_physical_device()?;

    let surface_loader =
        ash::extensions::khr::Surface::new(&instance_ctx.entry, &instance_ctx.instance);
    let surface = unsafe {
        ash_window::create_surface(
            &instance_ctx.entry,
            &instance_ctx.instance,
            display_handle,
            window_handle,
            None,
        )
    }
    .context("Failed to create window surface")?;

    let present_supported = unsafe {
        surface_loader.get_physical_device_surface_support(
            selected.physical_device,
            selected.graphics_queue_family,
            surface,
        )
    }
    .context("Failed to query surface present support")?;
    anyhow::ensure!(
        present_supported,
        "Selected queue family cannot present to the window surface"
    );

    let device_ctx = DeviceContext::new(
        &instance_ctx.instance,
        &selected,
        config.graphics.slot_count,
    )?;

    let size = window.inner_size();
    let swapchain_ctx = SwapchainContext::new(
        &instance_ctx.instance,
        &device_ctx,
        &surface_loader,
        surface,
        size.width,
        size.height,
        config.graphics.slot_count,
    )?;

    log::info!(
        "Swapchain ready: {:?}, {} images",
        swapchain_ctx.format,
        swapchain_ctx.images.len()
    );

    let mut sync = FrameSync::new(&device_ctx.device, config.graphics.slot_count)?;

    let mut provider = scene::create_provider(config.scene_kind());
    let gpu = SceneContext {
        instance: &instance_ctx.instance,
        physical_device: selected.physical_device,
        device: &device_ctx.device,
        queue_family_index: device_ctx.queue_family_index,
        render_pass: swapchain_ctx.render_pass,
        extent: swapchain_ctx.extent,
    };

    let mut frame_loop = FrameLoop::new(
        &device_ctx,
        &swapchain_ctx,
        &mut sync,
        config.graphics.clear_color,
    );
    frame_loop.run(config.graphics.frame_count, &gpu, provider.as_mut())?;

    // Strict reverse order of creation. The loop has already drained every
    // slot fence, so nothing here is still referenced by the GPU.
    sync.destroy(&device_ctx.device);
    swapchain_ctx.destroy(&device_ctx.device);
    device_ctx.destroy();
    unsafe { surface_loader.destroy_surface(surface, None) };
    instance_ctx.destroy();

    log::info!("Done");
    Ok(true)
}
