// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. The words come from a
// SpirvBinary, which has already checked alignment and the magic number.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::assets::SpirvBinary;

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    byte_len: usize,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn new(
        device: &Arc<VulkanDevice>,
        spirv: &SpirvBinary,
        stage: vk::ShaderStageFlags,
    ) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(spirv.words());

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .with_context(|| format!("Failed to create shader module from {:?}", spirv.path()))?;

        log::debug!("Shader module {:?}: {} bytes", spirv.path(), spirv.byte_len());

        Ok(Self {
            module,
            stage,
            byte_len: spirv.byte_len(),
            device: device.clone(),
        })
    }

    /// Size of the SPIR-V this module was built from
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
