// 2D images and their views
//
// Sampled images are uploaded once through a staging buffer and left in
// SHADER_READ_ONLY_OPTIMAL. Depth images are transitioned by the render pass.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::Buffer;
use super::types::{Format, ImageUsage, ImageViewDesc, ImageViewType, SubresourceRange};
use super::VulkanDevice;

pub struct Image {
    pub image: vk::Image,
    pub format: Format,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Image {
    pub fn new_2d(
        device: &Arc<VulkanDevice>,
        name: &str,
        format: Format,
        usage: ImageUsage,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<Arc<Self>> {
        if let Some(pixels) = pixels {
            let expected = width as usize * height as usize * format.texel_size();
            if pixels.len() != expected {
                anyhow::bail!(
                    "{}: {} bytes of pixel data for a {}x{} {:?} image (expected {})",
                    name,
                    pixels.len(),
                    width,
                    height,
                    format,
                    expected
                );
            }
        }

        let extent = vk::Extent2D { width, height };
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format.to_vk())
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage.to_vk())
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image {}", name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = match device.allocate(name, requirements, MemoryLocation::GpuOnly, false)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .context("Failed to bind image memory")?;

        let image = Self {
            image,
            format,
            extent,
            allocation: Some(allocation),
            device: device.clone(),
        };

        if let Some(pixels) = pixels {
            image.upload(pixels, name)?;
        }

        log::debug!("Created {:?} image {} ({}x{}, {:?})", usage, name, width, height, format);
        Ok(Arc::new(image))
    }

    /// Copy `pixels` into mip 0 and leave the image ready for sampling
    fn upload(&self, pixels: &[u8], name: &str) -> Result<()> {
        let staging = Buffer::staging(&self.device, name, pixels)?;
        let range = SubresourceRange::default().to_vk(self.format.aspect_mask());

        let to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .build();

        let to_shader = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build();

        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.format.aspect_mask(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .build();

        self.device.submit_once(|dev, cmd| unsafe {
            dev.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            dev.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            dev.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// A view keeps its image alive
pub struct ImageView {
    pub view: vk::ImageView,
    image: Arc<Image>,
}

impl ImageView {
    pub fn new(image: Arc<Image>, desc: ImageViewDesc) -> Result<Self> {
        let view_type = match desc.view_type {
            ImageViewType::View2D => vk::ImageViewType::TYPE_2D,
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image.image)
            .view_type(view_type)
            .format(desc.format.to_vk())
            .subresource_range(desc.range.to_vk(desc.format.aspect_mask()));

        let view = unsafe { image.device.device.create_image_view(&view_info, None) }
            .context("Failed to create image view")?;

        Ok(Self { view, image })
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.image.device.device.destroy_image_view(self.view, None);
        }
    }
}
