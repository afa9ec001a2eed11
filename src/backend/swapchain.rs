// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Acquire and present never fail on a stale chain; they flip the state to
// NeedsRebuild and the frame loop calls resize().

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::surface::PresentationSurface;
use super::types::Format;
use super::VulkanDevice;
use crate::error::DemoError;

/// Pass as width or height to resize() to take the surface's current extent
pub const USE_CURRENT_EXTENT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapChainState {
    Ready,
    NeedsRebuild,
}

/// Images and views of one swap chain generation.
///
/// Render passes hold an Arc of this; resize() refuses to run while any
/// such reference is alive.
pub struct SwapchainImages {
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: Format,
    pub extent: vk::Extent2D,
    pub generation: u64,
    device: Arc<VulkanDevice>,
}

impl SwapchainImages {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl Drop for SwapchainImages {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.device.destroy_image_view(view, None);
            }
        }
    }
}

pub struct SwapChain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::extensions::khr::Swapchain,
    images: Arc<SwapchainImages>,
    state: SwapChainState,
    current_image: u32,
    preferred_format: Format,
    present_mode: vk::PresentModeKHR,
    surface: Arc<PresentationSurface>,
    device: Arc<VulkanDevice>,
}

impl SwapChain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Arc<PresentationSurface>,
        width: u32,
        height: u32,
        preferred_format: Format,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let mut chain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Arc::new(SwapchainImages {
                images: Vec::new(),
                views: Vec::new(),
                format: preferred_format,
                extent: vk::Extent2D { width: 0, height: 0 },
                generation: 0,
                device: device.clone(),
            }),
            state: SwapChainState::NeedsRebuild,
            current_image: 0,
            preferred_format,
            present_mode,
            surface,
            device,
        };
        chain.build(width, height)?;
        Ok(chain)
    }

    /// (Re)create the chain, retiring the previous one
    fn build(&mut self, width: u32, height: u32) -> Result<bool> {
        let caps = self.surface.capabilities()?;
        let extent = choose_extent((width, height), &caps, self.images.extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has zero extent, postponing swapchain build");
            return Ok(false);
        }

        let formats = self.surface.formats()?;
        let surface_format = choose_surface_format(&formats, self.preferred_format)
            .context("No suitable surface format")?;
        let format = Format::from_vk(surface_format.format)
            .context("Surface format has no RHI equivalent")?;

        let present_mode = choose_present_mode(&self.surface.present_modes()?, self.present_mode);
        log::debug!("Present mode: {:?}, format: {:?}", present_mode, format);

        // One more than the minimum so acquire rarely blocks
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }?;

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    self.device
                        .device
                        .create_image_view(&create_info, None)
                        .context("Failed to create image view")
                }
            })
            .collect();

        let generation = self.images.generation + 1;
        // Old views go before the old chain they point into
        self.images = Arc::new(SwapchainImages {
            images,
            views: image_views?,
            format,
            extent,
            generation,
            device: self.device.clone(),
        });
        self.swapchain = swapchain;

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }

        log::info!(
            "Swapchain generation {}: {} images at {}x{}",
            generation,
            self.images.len(),
            extent.width,
            extent.height
        );

        self.state = SwapChainState::Ready;
        self.current_image = 0;
        Ok(true)
    }

    /// Acquire the next image, signalling `signal` when it is ready.
    /// Returns false when the chain is stale and must be rebuilt first.
    pub fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<bool> {
        if self.state == SwapChainState::NeedsRebuild {
            return Ok(false);
        }

        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                self.current_image = index;
                // The semaphore is signalled either way, so use this image
                // and rebuild after presenting it
                if suboptimal {
                    self.state = SwapChainState::NeedsRebuild;
                }
                Ok(true)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SwapChainState::NeedsRebuild;
                Ok(false)
            }
            Err(e) => Err(DemoError::from_queue_result(e).context("Failed to acquire image")),
        }
    }

    /// Rebuild at `width` x `height`, or at the surface's current extent
    /// when either is USE_CURRENT_EXTENT. Every render pass built on the
    /// previous images must have been dropped.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        let holders = Arc::strong_count(&self.images) - 1;
        if holders > 0 {
            anyhow::bail!(
                "Swapchain images are still referenced by {} render pass(es)",
                holders
            );
        }

        self.device.wait_idle()?;
        self.build(width, height)
    }

    /// Present the most recently acquired image
    pub fn present(&mut self, queue: vk::Queue, wait_semaphores: &[vk::Semaphore]) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [self.current_image];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SwapChainState::NeedsRebuild;
                Ok(())
            }
            Err(e) => Err(DemoError::from_queue_result(e).context("Failed to present")),
        }
    }

    /// Window changed size; the next acquire reports a stale chain
    pub fn mark_stale(&mut self) {
        self.state = SwapChainState::NeedsRebuild;
    }

    pub fn images(&self) -> &Arc<SwapchainImages> {
        &self.images
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.images.extent
    }

    pub fn format(&self) -> Format {
        self.images.format
    }

    pub fn current_image_index(&self) -> u32 {
        self.current_image
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        // Views first, then the chain that owns the images
        self.images = Arc::new(SwapchainImages {
            images: Vec::new(),
            views: Vec::new(),
            format: self.preferred_format,
            extent: vk::Extent2D { width: 0, height: 0 },
            generation: 0,
            device: self.device.clone(),
        });
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Extent for a new chain. Fixed-size surfaces dictate it; otherwise the
/// request (or the previous extent for USE_CURRENT_EXTENT) is clamped.
pub fn choose_extent(
    requested: (u32, u32),
    caps: &vk::SurfaceCapabilitiesKHR,
    previous: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let (width, height) = match requested {
        (USE_CURRENT_EXTENT, _) | (_, USE_CURRENT_EXTENT) => (previous.width, previous.height),
        other => other,
    };

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Preferred format, then the other 8-bit UNORM layout, then whatever is first
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: Format,
) -> Option<vk::SurfaceFormatKHR> {
    let find = |format: Format| {
        available
            .iter()
            .find(|f| f.format == format.to_vk())
            .copied()
    };

    // Drivers reporting a single UNDEFINED entry accept anything
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: preferred.to_vk(),
                color_space: only.color_space,
            });
        }
    }

    find(preferred)
        .or_else(|| find(Format::R8G8B8A8Unorm))
        .or_else(|| find(Format::B8G8R8A8Unorm))
        .or_else(|| {
            available
                .iter()
                .find(|f| Format::from_vk(f.format).is_some())
                .copied()
        })
}

/// FIFO is always supported
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    requested: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&requested) {
        requested
    } else {
        vk::PresentModeKHR::FIFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let extent = choose_extent((1024, 768), &caps((800, 600)), vk::Extent2D::default());
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn requested_extent_is_clamped() {
        let extent = choose_extent(
            (9000, 768),
            &caps((u32::MAX, u32::MAX)),
            vk::Extent2D::default(),
        );
        assert_eq!((extent.width, extent.height), (4096, 768));
    }

    #[test]
    fn sentinel_keeps_previous_extent_on_free_surfaces() {
        let previous = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(
            (USE_CURRENT_EXTENT, USE_CURRENT_EXTENT),
            &caps((u32::MAX, u32::MAX)),
            previous,
        );
        assert_eq!(extent, previous);

        let extent = choose_extent(
            (USE_CURRENT_EXTENT, USE_CURRENT_EXTENT),
            &caps((1024, 768)),
            previous,
        );
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn rgba_unorm_is_preferred() {
        let available = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];
        let chosen = choose_surface_format(&available, Format::R8G8B8A8Unorm).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn bgra_is_the_fallback() {
        let available = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen = choose_surface_format(&available, Format::R8G8B8A8Unorm).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);

        assert!(choose_surface_format(
            &[surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)],
            Format::R8G8B8A8Unorm
        )
        .is_none());
    }

    #[test]
    fn undefined_format_accepts_preferred() {
        let chosen = choose_surface_format(
            &[surface_format(vk::Format::UNDEFINED)],
            Format::R8G8B8A8Unorm,
        )
        .unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn unavailable_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }
}
