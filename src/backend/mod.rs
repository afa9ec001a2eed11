// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Resources are created through VulkanDevice (see factory.rs) and release
// themselves on drop.

pub mod buffer;
pub mod context;
pub mod device;
pub mod factory;
pub mod image;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod types;

pub use buffer::Buffer;
pub use context::ImmediateContext;
pub use device::VulkanDevice;
pub use image::ImageView;
pub use pipeline::{Pipeline, PipelineDesc};
pub use render_pass::RenderPass;
pub use sampler::Sampler;
pub use surface::{PresentationSurface, SurfaceDesc};
pub use swapchain::SwapChain;
