// Sampler - filtering and addressing state, independent of any image

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::types::SamplerDesc;
use super::VulkanDevice;

pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Sampler {
    /// Anisotropy and mip-mapping are off; the demo's texture has one level
    pub fn new(device: &Arc<VulkanDevice>, desc: SamplerDesc) -> Result<Self> {
        let address_mode = desc.address_mode.to_vk();
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter.to_vk())
            .min_filter(desc.min_filter.to_vk())
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(false)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.device.create_sampler(&create_info, None) }
            .context("Failed to create sampler")?;

        Ok(Self {
            sampler,
            device: device.clone(),
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}
