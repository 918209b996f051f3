// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. Each type owns its handles and releases
// them in Drop; an Arc<VulkanDevice> keeps the device alive until the last
// of them is gone.

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod render_target;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
