// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Viewport and scissor are dynamic, so one pipeline serves every swapchain
// size as long as the render pass stays compatible (same formats).

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::render_pass::RenderPass;
use super::shader::ShaderModule;
use super::types::{
    BlendDesc, DepthStencilDesc, DescriptorBindingDesc, RasterizerDesc, VertexInputAttributeDesc,
    VertexInputBindingDesc,
};
use super::VulkanDevice;

pub struct PipelineDesc<'a> {
    pub vertex_shader: &'a ShaderModule,
    pub fragment_shader: &'a ShaderModule,
    pub rasterizer: RasterizerDesc,
    pub depth_stencil: DepthStencilDesc,
    pub blend: BlendDesc,
    pub attributes: Vec<VertexInputAttributeDesc>,
    pub bindings: Vec<VertexInputBindingDesc>,
    pub descriptors: Vec<DescriptorBindingDesc>,
    pub render_pass: &'a RenderPass,
}

pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    sets: Vec<Vec<DescriptorBindingDesc>>,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(device: &Arc<VulkanDevice>, desc: &PipelineDesc) -> Result<Self> {
        let sets = group_bindings_by_set(&desc.descriptors)?;

        // Descriptor set layouts, one per set index
        let mut set_layouts = Vec::with_capacity(sets.len());
        for bindings in &sets {
            let vk_bindings: Vec<_> = bindings
                .iter()
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(b.binding)
                        .descriptor_type(b.kind.to_vk())
                        .descriptor_count(1)
                        .stage_flags(b.stages)
                        .build()
                })
                .collect();
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
            match unsafe { device.device.create_descriptor_set_layout(&layout_info, None) } {
                Ok(layout) => set_layouts.push(layout),
                Err(e) => {
                    destroy_set_layouts(device, &set_layouts);
                    return Err(e).context("Failed to create descriptor set layout");
                }
            }
        }

        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = match unsafe { device.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                destroy_set_layouts(device, &set_layouts);
                return Err(e).context("Failed to create pipeline layout");
            }
        };

        let pipeline = match create_graphics_pipeline(device, desc, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                destroy_set_layouts(device, &set_layouts);
                return Err(e);
            }
        };

        log::info!(
            "Created graphics pipeline ({} descriptor sets, {} vertex attributes)",
            sets.len(),
            desc.attributes.len()
        );

        Ok(Self {
            pipeline,
            layout,
            set_layouts,
            sets,
            device: device.clone(),
        })
    }

    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }

    /// Bindings of each descriptor set, indexed by set number
    pub fn sets(&self) -> &[Vec<DescriptorBindingDesc>] {
        &self.sets
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
        destroy_set_layouts(&self.device, &self.set_layouts);
    }
}

fn destroy_set_layouts(device: &VulkanDevice, layouts: &[vk::DescriptorSetLayout]) {
    for &layout in layouts {
        unsafe { device.device.destroy_descriptor_set_layout(layout, None) };
    }
}

/// Bucket descriptor bindings by set. Sets without bindings in between get
/// an empty list so indices line up with set numbers.
pub fn group_bindings_by_set(
    descriptors: &[DescriptorBindingDesc],
) -> Result<Vec<Vec<DescriptorBindingDesc>>> {
    let set_count = descriptors.iter().map(|d| d.set + 1).max().unwrap_or(0);
    let mut sets: Vec<Vec<DescriptorBindingDesc>> = vec![Vec::new(); set_count as usize];

    for desc in descriptors {
        let set = &mut sets[desc.set as usize];
        if set.iter().any(|b| b.binding == desc.binding) {
            anyhow::bail!("Duplicate descriptor binding: set {} binding {}", desc.set, desc.binding);
        }
        set.push(*desc);
    }

    for set in &mut sets {
        set.sort_by_key(|b| b.binding);
    }
    Ok(sets)
}

fn create_graphics_pipeline(
    device: &VulkanDevice,
    desc: &PipelineDesc,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(desc.vertex_shader.stage)
        .module(desc.vertex_shader.module)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(desc.fragment_shader.stage)
        .module(desc.fragment_shader.module)
        .name(entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Vertex input
    let bindings: Vec<_> = desc
        .bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::builder()
                .binding(b.binding)
                .stride(b.stride)
                .input_rate(if b.per_instance {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                })
                .build()
        })
        .collect();
    let attributes: Vec<_> = desc
        .attributes
        .iter()
        .map(|a| {
            vk::VertexInputAttributeDescription::builder()
                .binding(a.binding)
                .location(a.location)
                .format(a.format.to_vk())
                .offset(a.offset)
                .build()
        })
        .collect();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.rasterizer.cull_mode.to_vk())
        .front_face(if desc.rasterizer.front_face_ccw {
            vk::FrontFace::COUNTER_CLOCKWISE
        } else {
            vk::FrontFace::CLOCKWISE
        })
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_stencil.depth_test)
        .depth_write_enable(desc.depth_stencil.depth_write)
        .depth_compare_op(desc.depth_stencil.compare_op)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(desc.blend.enable)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(desc.render_pass.render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .context("Failed to create graphics pipeline")?
    };

    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::DescriptorKind;

    fn binding(set: u32, binding: u32, kind: DescriptorKind) -> DescriptorBindingDesc {
        DescriptorBindingDesc {
            set,
            binding,
            kind,
            stages: vk::ShaderStageFlags::ALL_GRAPHICS,
        }
    }

    #[test]
    fn demo_layout_has_two_sets() {
        let sets = group_bindings_by_set(&[
            binding(1, 1, DescriptorKind::SampledImage),
            binding(0, 0, DescriptorKind::ConstantBuffer),
            binding(1, 0, DescriptorKind::Sampler),
        ])
        .unwrap();

        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].len(), 1);
        assert_eq!(sets[0][0].kind, DescriptorKind::ConstantBuffer);
        assert_eq!(
            sets[1].iter().map(|b| b.binding).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(sets[1][0].kind, DescriptorKind::Sampler);
    }

    #[test]
    fn gaps_become_empty_sets() {
        let sets = group_bindings_by_set(&[binding(2, 0, DescriptorKind::Sampler)]).unwrap();
        assert_eq!(sets.len(), 3);
        assert!(sets[0].is_empty() && sets[1].is_empty());
    }

    #[test]
    fn duplicate_slots_are_rejected() {
        let result = group_bindings_by_set(&[
            binding(0, 0, DescriptorKind::ConstantBuffer),
            binding(0, 0, DescriptorKind::Sampler),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn no_bindings_no_sets() {
        assert!(group_bindings_by_set(&[]).unwrap().is_empty());
    }
}
