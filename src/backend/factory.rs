// Resource factory - every GPU object the demo uses is created here
//
// Each resource keeps an Arc of the device, so the device outlives
// everything created through it.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::buffer::Buffer;
use super::context::ImmediateContext;
use super::image::{Image, ImageView};
use super::pipeline::{Pipeline, PipelineDesc};
use super::render_pass::RenderPass;
use super::sampler::Sampler;
use super::shader::ShaderModule;
use super::surface::{PresentationSurface, SurfaceDesc};
use super::swapchain::{SwapChain, SwapchainImages};
use super::types::{BufferUsage, Format, ImageUsage, ImageViewDesc, SamplerDesc};
use super::VulkanDevice;
use crate::assets::SpirvBinary;

impl VulkanDevice {
    pub fn create_shader_module(
        self: &Arc<Self>,
        spirv: &SpirvBinary,
        stage: vk::ShaderStageFlags,
    ) -> Result<ShaderModule> {
        ShaderModule::new(self, spirv, stage)
    }

    pub fn create_pipeline(self: &Arc<Self>, desc: &PipelineDesc) -> Result<Pipeline> {
        Pipeline::new(self, desc)
    }

    pub fn create_buffer(
        self: &Arc<Self>,
        name: &str,
        size: vk::DeviceSize,
        usage: BufferUsage,
        initial: Option<&[u8]>,
    ) -> Result<Buffer> {
        Buffer::new(self, name, size, usage, initial)
    }

    pub fn create_image_2d(
        self: &Arc<Self>,
        name: &str,
        format: Format,
        usage: ImageUsage,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<Arc<Image>> {
        Image::new_2d(self, name, format, usage, width, height, pixels)
    }

    pub fn create_image_view(&self, desc: ImageViewDesc, image: &Arc<Image>) -> Result<ImageView> {
        ImageView::new(image.clone(), desc)
    }

    pub fn create_sampler(self: &Arc<Self>, desc: SamplerDesc) -> Result<Sampler> {
        Sampler::new(self, desc)
    }

    pub fn create_surface(self: &Arc<Self>, desc: &SurfaceDesc) -> Result<PresentationSurface> {
        PresentationSurface::new(self.clone(), desc)
    }

    pub fn create_swap_chain(
        self: &Arc<Self>,
        surface: Arc<PresentationSurface>,
        width: u32,
        height: u32,
        format: Format,
        present_mode: vk::PresentModeKHR,
    ) -> Result<SwapChain> {
        SwapChain::new(self.clone(), surface, width, height, format, present_mode)
    }

    /// Screen pass over the swapchain's current images
    pub fn create_render_pass(
        self: &Arc<Self>,
        targets: &Arc<SwapchainImages>,
        depth_format: Format,
    ) -> Result<RenderPass> {
        RenderPass::new(self, targets, depth_format)
    }

    pub fn create_immediate_context(
        self: &Arc<Self>,
        frames_in_flight: usize,
    ) -> Result<ImmediateContext> {
        ImmediateContext::new(self, frames_in_flight)
    }
}
