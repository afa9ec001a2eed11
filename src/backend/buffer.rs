// Buffers for vertex, index and uniform data
//
// Memory comes from gpu-allocator. Constant buffers live in host-visible,
// coherent memory and stay mapped for their whole life; vertex and index
// buffers are device-local and filled once through a staging copy.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::types::BufferUsage;
use super::VulkanDevice;

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    /// Create a buffer of `size` bytes, optionally filled with `initial`
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: BufferUsage,
        initial: Option<&[u8]>,
    ) -> Result<Self> {
        if let Some(data) = initial {
            if data.len() as vk::DeviceSize > size {
                anyhow::bail!(
                    "Initial data for {} is {} bytes, buffer holds {}",
                    name,
                    data.len(),
                    size
                );
            }
        }

        let mut buffer = if usage.is_host_visible() {
            Self::raw(device, name, size, usage.to_vk(), MemoryLocation::CpuToGpu)?
        } else {
            Self::raw(
                device,
                name,
                size,
                usage.to_vk() | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
            )?
        };

        match initial {
            Some(data) if usage.is_host_visible() => buffer.write(0, data)?,
            Some(data) => {
                let staging = Self::staging(device, name, data)?;
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: data.len() as vk::DeviceSize,
                };
                device.submit_once(|dev, cmd| unsafe {
                    dev.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
                })?;
            }
            None => {}
        }

        log::debug!("Created {:?} buffer {} ({} bytes)", usage, name, size);
        Ok(buffer)
    }

    /// Host-visible transfer source holding `data`
    pub fn staging(device: &Arc<VulkanDevice>, name: &str, data: &[u8]) -> Result<Self> {
        let mut staging = Self::raw(
            device,
            &format!("{} (staging)", name),
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(0, data)?;
        Ok(staging)
    }

    fn raw(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .context("Failed to bind buffer memory")?;

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        })
    }

    /// Borrow `len` bytes at `offset` of the persistent mapping. The region
    /// is unmapped again when the borrow ends; coherent memory needs no
    /// flush before the next submit.
    pub fn map(&mut self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<&mut [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.size)
            .with_context(|| {
                format!("Mapping {}..+{} exceeds buffer of {} bytes", offset, len, self.size)
            })?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host visible")?;

        Ok(&mut mapped[offset as usize..end as usize])
    }

    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        self.map(offset, data.len() as vk::DeviceSize)?
            .copy_from_slice(data);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}
