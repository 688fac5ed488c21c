// Scenes - pluggable content providers
//
// A scene supplies the actual draw commands for each frame. The frame loop
// consumes exactly one provider through this trait and never owns its GPU
// resources: `initialize` runs once inside the fenced upload command buffer
// before the loop, `render` once per frame inside an already-open render
// pass, `shutdown` once after the final fence drain.

pub mod pipeline;
pub mod quad;
pub mod textured_quad;

pub use quad::QuadScene;
pub use textured_quad::TexturedQuadScene;

use anyhow::Result;
use ash::vk;

/// Handles a scene needs from the core, passed by reference.
pub struct SceneContext<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: &'a ash::Device,
    pub queue_family_index: u32,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

pub trait ContentProvider {
    /// Create GPU resources. Transfer commands recorded into `upload` are
    /// submitted and waited on synchronously before the first frame.
    fn initialize(&mut self, gpu: &SceneContext, upload: vk::CommandBuffer) -> Result<()>;

    /// Emit draw commands into the open render pass.
    fn render(&mut self, device: &ash::Device, cmd: vk::CommandBuffer);

    /// Release GPU resources, in reverse acquisition order. Runs after every
    /// frame fence has been drained.
    fn shutdown(&mut self, device: &ash::Device);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneKind {
    Quad,
    TexturedQuad,
}

pub fn create_provider(kind: SceneKind) -> Box<dyn ContentProvider> {
    match kind {
        SceneKind::Quad => Box::new(QuadScene::default()),
        SceneKind::TexturedQuad => Box::new(TexturedQuadScene::default()),
    }
}
