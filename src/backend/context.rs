// Immediate command context
//
// Records one frame at a time into the command buffer of the current
// frame slot. Resource bindings are collected in a BindingTable and turned
// into descriptor sets at draw time; the table is cleared at the start of
// every frame so nothing carries over.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::buffer::Buffer;
use super::image::ImageView;
use super::pipeline::Pipeline;
use super::render_pass::RenderPass;
use super::sampler::Sampler;
use super::sync::FrameSync;
use super::types::{ClearValue, DescriptorBindingDesc, DescriptorKind};
use super::VulkanDevice;
use crate::error::DemoError;

/// Descriptor sets each frame slot can hand out before its pool resets
const SETS_PER_FRAME: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Sampler(vk::Sampler),
    ImageView(vk::ImageView),
}

impl BoundResource {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            BoundResource::Buffer { .. } => DescriptorKind::ConstantBuffer,
            BoundResource::Sampler(_) => DescriptorKind::Sampler,
            BoundResource::ImageView(_) => DescriptorKind::SampledImage,
        }
    }
}

/// Resources bound since the start of the frame, keyed by
/// (set, binding, array index)
#[derive(Default)]
pub struct BindingTable {
    entries: BTreeMap<(u32, u32, u32), BoundResource>,
    dirty: bool,
}

impl BindingTable {
    pub fn bind(&mut self, set: u32, binding: u32, array_index: u32, resource: BoundResource) {
        self.entries.insert((set, binding, array_index), resource);
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Match every slot of the pipeline's layout with a bound resource.
    /// Slots left unbound, bound with the wrong kind, or bindings the
    /// layout does not declare are errors.
    pub fn resolve(
        &self,
        layout: &[Vec<DescriptorBindingDesc>],
    ) -> Result<Vec<Vec<(DescriptorBindingDesc, BoundResource)>>> {
        for &(set, binding, array_index) in self.entries.keys() {
            let declared = layout
                .get(set as usize)
                .is_some_and(|bindings| bindings.iter().any(|b| b.binding == binding));
            if !declared || array_index != 0 {
                anyhow::bail!(
                    "Resource bound at set {} binding {}[{}] is not declared by the pipeline",
                    set,
                    binding,
                    array_index
                );
            }
        }

        layout
            .iter()
            .map(|bindings| {
                bindings
                    .iter()
                    .map(|desc| {
                        let resource = self
                            .entries
                            .get(&(desc.set, desc.binding, 0))
                            .copied()
                            .with_context(|| {
                                format!(
                                    "Nothing bound at set {} binding {} ({:?})",
                                    desc.set, desc.binding, desc.kind
                                )
                            })?;
                        if resource.kind() != desc.kind {
                            anyhow::bail!(
                                "Set {} binding {} expects {:?}, got {:?}",
                                desc.set,
                                desc.binding,
                                desc.kind,
                                resource.kind()
                            );
                        }
                        Ok((*desc, resource))
                    })
                    .collect()
            })
            .collect()
    }
}

struct FrameSlot {
    command_buffer: vk::CommandBuffer,
    sync: FrameSync,
    descriptor_pool: vk::DescriptorPool,
}

/// Layout of the most recently bound pipeline
struct BoundLayout {
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    sets: Vec<Vec<DescriptorBindingDesc>>,
}

pub struct ImmediateContext {
    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    current: usize,
    recording: bool,
    in_render_pass: bool,
    bound: Option<BoundLayout>,
    bindings: BindingTable,
    device: Arc<VulkanDevice>,
}

impl ImmediateContext {
    pub fn new(device: &Arc<VulkanDevice>, frames_in_flight: usize) -> Result<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        log::info!("Creating immediate context with {} frames in flight", frames_in_flight);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let mut context = Self {
            command_pool,
            slots: Vec::with_capacity(frames_in_flight),
            current: 0,
            recording: false,
            in_render_pass: false,
            bound: None,
            bindings: BindingTable::default(),
            device: device.clone(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: SETS_PER_FRAME,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: SETS_PER_FRAME,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: SETS_PER_FRAME,
            },
        ];

        // Pushed one by one so Drop cleans up whatever was created
        for command_buffer in command_buffers {
            let descriptor_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(SETS_PER_FRAME)
                .pool_sizes(&pool_sizes);
            let descriptor_pool =
                unsafe { device.device.create_descriptor_pool(&descriptor_info, None) }
                    .context("Failed to create descriptor pool")?;
            let sync = match FrameSync::new(device) {
                Ok(sync) => sync,
                Err(e) => {
                    unsafe { device.device.destroy_descriptor_pool(descriptor_pool, None) };
                    return Err(e);
                }
            };
            context.slots.push(FrameSlot {
                command_buffer,
                sync,
                descriptor_pool,
            });
        }

        Ok(context)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the frame slot being recorded
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Wait until the current slot's previous submission retired and return
    /// the semaphore the swapchain should signal on acquire
    pub fn wait_for_frame_slot(&self) -> Result<vk::Semaphore> {
        let slot = &self.slots[self.current];
        slot.sync.wait(&self.device.device)?;
        Ok(slot.sync.image_available)
    }

    /// Start recording a frame into the current slot
    pub fn begin_frame(&mut self) -> Result<()> {
        if self.recording {
            anyhow::bail!("begin_frame called while a frame is being recorded");
        }
        let slot = &self.slots[self.current];

        unsafe {
            self.device.device.reset_descriptor_pool(
                slot.descriptor_pool,
                vk::DescriptorPoolResetFlags::empty(),
            )?;
            self.device.device.reset_command_buffer(
                slot.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .device
                .begin_command_buffer(slot.command_buffer, &begin_info)?;
        }

        self.bound = None;
        self.bindings.clear();
        self.recording = true;
        Ok(())
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.slots[self.current].command_buffer
    }

    pub fn begin_render_pass(
        &mut self,
        pass: &RenderPass,
        image_index: u32,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        if !self.recording || self.in_render_pass {
            anyhow::bail!("begin_render_pass needs an open frame and no open pass");
        }

        let extent = pass.extent();
        let clears: Vec<vk::ClearValue> = clear_values.iter().map(|c| c.to_vk()).collect();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.render_pass)
            .framebuffer(pass.framebuffer(image_index)?)
            .render_area(render_area)
            .clear_values(&clears);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let cmd = self.command_buffer();
        unsafe {
            self.device
                .device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            self.device.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }

        self.in_render_pass = true;
        Ok(())
    }

    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        unsafe {
            self.device.device.cmd_bind_pipeline(
                self.command_buffer(),
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );
        }
        self.bound = Some(BoundLayout {
            layout: pipeline.layout,
            set_layouts: pipeline.set_layouts().to_vec(),
            sets: pipeline.sets().to_vec(),
        });
        // New layout, descriptor sets must be rebuilt
        self.bindings.dirty = true;
    }

    /// Bind `range` bytes of `buffer` starting at `offset`
    pub fn bind_buffer(
        &mut self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        set: u32,
        binding: u32,
        array_index: u32,
    ) -> Result<()> {
        if offset.checked_add(range).map_or(true, |end| end > buffer.size) {
            anyhow::bail!(
                "Binding {}..+{} of a {} byte buffer",
                offset,
                range,
                buffer.size
            );
        }
        self.bindings.bind(
            set,
            binding,
            array_index,
            BoundResource::Buffer {
                buffer: buffer.buffer,
                offset,
                range,
            },
        );
        Ok(())
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Buffer, binding: u32, offset: vk::DeviceSize) {
        unsafe {
            self.device.device.cmd_bind_vertex_buffers(
                self.command_buffer(),
                binding,
                &[buffer.buffer],
                &[offset],
            );
        }
    }

    pub fn bind_sampler(&mut self, sampler: &Sampler, set: u32, binding: u32, array_index: u32) {
        self.bindings
            .bind(set, binding, array_index, BoundResource::Sampler(sampler.sampler));
    }

    pub fn bind_image_view(&mut self, view: &ImageView, set: u32, binding: u32, array_index: u32) {
        self.bindings
            .bind(set, binding, array_index, BoundResource::ImageView(view.view));
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.in_render_pass {
            anyhow::bail!("draw outside of a render pass");
        }
        if self.bindings.is_dirty() {
            self.write_descriptor_sets()?;
        }
        unsafe {
            self.device.device.cmd_draw(
                self.command_buffer(),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    fn write_descriptor_sets(&mut self) -> Result<()> {
        let bound = self.bound.as_ref().context("draw without a bound pipeline")?;
        let resolved = self.bindings.resolve(&bound.sets)?;

        if bound.set_layouts.is_empty() {
            self.bindings.mark_clean();
            return Ok(());
        }

        let slot = &self.slots[self.current];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(slot.descriptor_pool)
            .set_layouts(&bound.set_layouts);
        let sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Out of descriptor sets for this frame")?;

        // Infos first so the writes can point into stable storage
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for (_, resource) in resolved.iter().flatten() {
            match *resource {
                BoundResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                }),
                BoundResource::Sampler(sampler) => image_infos.push(vk::DescriptorImageInfo {
                    sampler,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }),
                BoundResource::ImageView(image_view) => image_infos.push(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }),
            }
        }

        let mut writes = Vec::new();
        let (mut next_buffer, mut next_image) = (0, 0);
        for (set_index, bindings) in resolved.iter().enumerate() {
            for (desc, resource) in bindings {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(sets[set_index])
                    .dst_binding(desc.binding)
                    .dst_array_element(0)
                    .descriptor_type(desc.kind.to_vk());
                let write = match resource {
                    BoundResource::Buffer { .. } => {
                        next_buffer += 1;
                        write.buffer_info(std::slice::from_ref(&buffer_infos[next_buffer - 1]))
                    }
                    BoundResource::Sampler(_) | BoundResource::ImageView(_) => {
                        next_image += 1;
                        write.image_info(std::slice::from_ref(&image_infos[next_image - 1]))
                    }
                };
                writes.push(write.build());
            }
        }

        unsafe {
            self.device.device.update_descriptor_sets(&writes, &[]);
            self.device.device.cmd_bind_descriptor_sets(
                slot.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                bound.layout,
                0,
                &sets,
                &[],
            );
        }

        self.bindings.mark_clean();
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        if !self.in_render_pass {
            anyhow::bail!("end_render_pass without a matching begin");
        }
        unsafe { self.device.device.cmd_end_render_pass(self.command_buffer()) };
        self.in_render_pass = false;
        Ok(())
    }

    /// Submit the recorded frame. It waits for the acquired image and
    /// signals the returned semaphore, which present should wait on.
    pub fn submit_frame(&mut self) -> Result<vk::Semaphore> {
        let sync = &self.slots[self.current].sync;
        let (image_available, render_finished) = (sync.image_available, sync.render_finished);
        self.submit(&[image_available], &[render_finished])?;
        Ok(render_finished)
    }

    fn submit(&mut self, wait: &[vk::Semaphore], signal: &[vk::Semaphore]) -> Result<()> {
        if !self.recording {
            anyhow::bail!("submit without a recorded frame");
        }
        if self.in_render_pass {
            self.end_render_pass()?;
        }

        let slot = &self.slots[self.current];
        let command_buffers = [slot.command_buffer];
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait.len()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signal);

        unsafe {
            self.device.device.end_command_buffer(slot.command_buffer)?;
            self.device.device.reset_fences(&[slot.sync.in_flight_fence])?;
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    slot.sync.in_flight_fence,
                )
                .map_err(DemoError::from_queue_result)?;
        }

        self.recording = false;
        self.current = (self.current + 1) % self.slots.len();
        Ok(())
    }

    /// Throw away the current slot's frame after an image was acquired for
    /// it. Any partial recording is reset, and an empty batch waits on the
    /// acquire semaphore and re-signals the slot's fence, so the slot can be
    /// used again.
    pub fn abort_frame(&mut self) -> Result<()> {
        let slot = &self.slots[self.current];
        let (command_buffer, image_available, fence) = (
            slot.command_buffer,
            slot.sync.image_available,
            slot.sync.in_flight_fence,
        );

        if self.recording {
            unsafe {
                self.device
                    .device
                    .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            }
        }
        self.recording = false;
        self.in_render_pass = false;
        self.bound = None;
        self.bindings.clear();

        let wait = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages);
        unsafe {
            self.device.device.reset_fences(&[fence])?;
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info.build()], fence)
                .map_err(DemoError::from_queue_result)?;
        }

        log::debug!("Frame slot {} aborted", self.current);
        self.current = (self.current + 1) % self.slots.len();
        Ok(())
    }

    /// Submit whatever is recorded and, when `wait`, block until the GPU
    /// is idle
    pub fn flush(&mut self, wait: bool) -> Result<()> {
        if self.recording {
            self.submit(&[], &[])?;
        }
        if wait {
            self.device.wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for ImmediateContext {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            for slot in &self.slots {
                slot.sync.destroy(&self.device.device);
                self.device
                    .device
                    .destroy_descriptor_pool(slot.descriptor_pool, None);
            }
            // Frees the command buffers too
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn demo_layout() -> Vec<Vec<DescriptorBindingDesc>> {
        let desc = |set, binding, kind| DescriptorBindingDesc {
            set,
            binding,
            kind,
            stages: vk::ShaderStageFlags::ALL_GRAPHICS,
        };
        vec![
            vec![desc(0, 0, DescriptorKind::ConstantBuffer)],
            vec![
                desc(1, 0, DescriptorKind::Sampler),
                desc(1, 1, DescriptorKind::SampledImage),
            ],
        ]
    }

    fn uniform() -> BoundResource {
        BoundResource::Buffer {
            buffer: vk::Buffer::from_raw(1),
            offset: 256,
            range: 144,
        }
    }

    fn bind_demo(table: &mut BindingTable) {
        table.bind(0, 0, 0, uniform());
        table.bind(1, 0, 0, BoundResource::Sampler(vk::Sampler::from_raw(2)));
        table.bind(1, 1, 0, BoundResource::ImageView(vk::ImageView::from_raw(3)));
    }

    #[test]
    fn full_demo_bindings_resolve_in_layout_order() {
        let mut table = BindingTable::default();
        bind_demo(&mut table);

        let resolved = table.resolve(&demo_layout()).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0][0].1, uniform());
        assert_eq!(resolved[1][0].1.kind(), DescriptorKind::Sampler);
        assert_eq!(resolved[1][1].1.kind(), DescriptorKind::SampledImage);
    }

    #[test]
    fn missing_binding_is_reported() {
        let mut table = BindingTable::default();
        table.bind(0, 0, 0, uniform());
        table.bind(1, 0, 0, BoundResource::Sampler(vk::Sampler::from_raw(2)));

        let err = table.resolve(&demo_layout()).unwrap_err();
        assert!(err.to_string().contains("set 1 binding 1"));
    }

    #[test]
    fn wrong_kind_is_reported() {
        let mut table = BindingTable::default();
        bind_demo(&mut table);
        table.bind(1, 0, 0, BoundResource::ImageView(vk::ImageView::from_raw(4)));

        assert!(table.resolve(&demo_layout()).is_err());
    }

    #[test]
    fn undeclared_binding_is_reported() {
        let mut table = BindingTable::default();
        bind_demo(&mut table);
        table.bind(2, 0, 0, uniform());
        assert!(table.resolve(&demo_layout()).is_err());

        let mut table = BindingTable::default();
        bind_demo(&mut table);
        table.bind(0, 0, 1, uniform());
        assert!(table.resolve(&demo_layout()).is_err());
    }

    #[test]
    fn clearing_forgets_previous_frame() {
        let mut table = BindingTable::default();
        bind_demo(&mut table);
        table.mark_clean();
        assert!(!table.is_dirty());

        table.clear();
        assert!(table.entries.is_empty());
        assert!(table.is_dirty());
        assert!(table.resolve(&demo_layout()).is_err());
    }

    #[test]
    fn rebinding_replaces_the_slot() {
        let mut table = BindingTable::default();
        bind_demo(&mut table);
        let moved = BoundResource::Buffer {
            buffer: vk::Buffer::from_raw(1),
            offset: 512,
            range: 144,
        };
        table.bind(0, 0, 0, moved);

        assert_eq!(table.entries.len(), 3);
        assert_eq!(table.resolve(&demo_layout()).unwrap()[0][0].1, moved);
    }
}
