// Render pass for the swapchain
//
// One subpass drawing into the acquired swapchain image plus a transient
// depth/stencil image. The pass owns its depth image and framebuffers and
// holds the swapchain images it was built against; it is dropped and
// rebuilt whenever the swapchain is.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::image::{Image, ImageView};
use super::swapchain::SwapchainImages;
use super::types::{Format, ImageUsage, ImageViewDesc, LoadOp, StoreOp};
use super::VulkanDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load: LoadOp,
    pub store: StoreOp,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color: AttachmentDesc,
    pub depth: AttachmentDesc,
    pub extent: vk::Extent2D,
    pub layers: u32,
}

impl RenderPassDesc {
    /// Clear both attachments, keep colour, discard depth
    pub fn screen(color_format: Format, depth_format: Format, extent: vk::Extent2D) -> Self {
        Self {
            color: AttachmentDesc {
                format: color_format,
                load: LoadOp::Clear,
                store: StoreOp::Store,
                extent,
            },
            depth: AttachmentDesc {
                format: depth_format,
                load: LoadOp::Clear,
                store: StoreOp::DontCare,
                extent,
            },
            extent,
            layers: 1,
        }
    }
}

pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    depth: ImageView,
    desc: RenderPassDesc,
    targets: Arc<SwapchainImages>,
    device: Arc<VulkanDevice>,
}

impl RenderPass {
    pub fn new(
        device: &Arc<VulkanDevice>,
        targets: &Arc<SwapchainImages>,
        depth_format: Format,
    ) -> Result<Self> {
        let extent = targets.extent;
        let desc = RenderPassDesc::screen(targets.format, depth_format, extent);

        log::debug!(
            "Creating render pass {}x{} ({:?} + {:?})",
            extent.width,
            extent.height,
            desc.color.format,
            desc.depth.format
        );

        let depth_image = Image::new_2d(
            device,
            "depth",
            depth_format,
            ImageUsage::DepthStencil,
            extent.width,
            extent.height,
            None,
        )?;
        let depth = ImageView::new(depth_image, ImageViewDesc::view_2d(depth_format))?;

        let render_pass = create_render_pass(device, &desc)?;

        let framebuffers: Result<Vec<_>> = targets
            .views
            .iter()
            .map(|&image_view| {
                let attachments = [image_view, depth.view];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(desc.layers);

                unsafe {
                    device
                        .device
                        .create_framebuffer(&framebuffer_info, None)
                        .context("Failed to create framebuffer")
                }
            })
            .collect();

        let framebuffers = match framebuffers {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        Ok(Self {
            render_pass,
            framebuffers,
            depth,
            desc,
            targets: targets.clone(),
            device: device.clone(),
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn depth_extent(&self) -> vk::Extent2D {
        self.depth.image().extent
    }

    /// Swapchain generation this pass was built against
    pub fn generation(&self) -> u64 {
        self.targets.generation
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn create_render_pass(device: &VulkanDevice, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(desc.color.format.to_vk())
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(desc.color.load.to_vk())
        .store_op(desc.color.store.to_vk())
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    // Depth attachment, stencil follows depth when the format has one
    let (stencil_load, stencil_store) = if desc.depth.format.has_stencil() {
        (desc.depth.load.to_vk(), desc.depth.store.to_vk())
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(desc.depth.format.to_vk())
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(desc.depth.load.to_vk())
        .store_op(desc.depth.store.to_vk())
        .stencil_load_op(stencil_load)
        .stencil_store_op(stencil_store)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe {
        device
            .device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::swapchain::choose_extent;

    #[test]
    fn every_attachment_follows_the_window_extent() {
        for (width, height) in [(640, 480), (1024, 768), (1, 1), (3840, 2160), (333, 999)] {
            let extent = vk::Extent2D { width, height };
            let desc =
                RenderPassDesc::screen(Format::R8G8B8A8Unorm, Format::D24UnormS8Uint, extent);

            assert_eq!(desc.extent, extent);
            assert_eq!(desc.color.extent, extent);
            assert_eq!(desc.depth.extent, extent);
            assert_eq!(desc.layers, 1);
        }
    }

    #[test]
    fn resized_window_reaches_both_attachments() {
        // A surface that lets the application pick the extent
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let previous = vk::Extent2D {
            width: 640,
            height: 480,
        };

        let extent = choose_extent((1024, 768), &caps, previous);
        let desc = RenderPassDesc::screen(Format::R8G8B8A8Unorm, Format::D24UnormS8Uint, extent);

        let expected = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(desc.extent, expected);
        assert_eq!(desc.color.extent, expected);
        assert_eq!(desc.depth.extent, expected);
        assert_ne!(desc.depth.extent, previous);
    }

    #[test]
    fn colour_is_kept_and_depth_discarded() {
        let desc = RenderPassDesc::screen(
            Format::R8G8B8A8Unorm,
            Format::D24UnormS8Uint,
            vk::Extent2D {
                width: 8,
                height: 8,
            },
        );
        assert_eq!((desc.color.load, desc.color.store), (LoadOp::Clear, StoreOp::Store));
        assert_eq!((desc.depth.load, desc.depth.store), (LoadOp::Clear, StoreOp::DontCare));
        assert!(desc.depth.format.is_depth());
    }
}
