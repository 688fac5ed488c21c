// Backend module - the Vulkan layer
//
// Thin wrappers around ash: explicit context structs passed by reference,
// no ambient handle state.

pub mod buffer;
pub mod device;
pub mod instance;
pub mod memory;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::DeviceContext;
pub use instance::InstanceContext;
pub use swapchain::SwapchainContext;
pub use sync::FrameSync;
