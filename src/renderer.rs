// =============================================================================
// RENDERER - GPU side of the demo
// =============================================================================
//
// Owns the swapchain, the render pass built on it, the demo's resources and
// the immediate context, and implements the frame steps:
//
//   acquire ─┬─> (stale) drop pass ─> resize swapchain ─> rebuild pass
//            └─> copy uniform ─> record pass ─> submit ─> present
//
// A failed rebuild or record abandons the frame and leaves the chain
// marked stale, so the next frame rebuilds.
//
// Field order matters for Drop: everything that holds swapchain views or
// records into the context goes before the swapchain and surface.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::{Window, WindowId};

use crate::assets::DemoAssets;
use crate::backend::types::{
    BlendDesc, BufferUsage, ClearValue, CullMode, DepthStencilDesc, DescriptorBindingDesc,
    DescriptorKind, Format, ImageUsage, ImageViewDesc, RasterizerDesc, SamplerDesc,
    VertexInputAttributeDesc, VertexInputBindingDesc,
};
use crate::backend::{
    Buffer, ImageView, ImmediateContext, Pipeline, PipelineDesc, PresentationSurface, RenderPass,
    Sampler, SurfaceDesc, SwapChain, VulkanDevice,
};
use crate::config::Config;
use crate::error::DemoError;
use crate::frame::{FrameTarget, UniformRing};
use crate::gui::GuiLayer;
use crate::logic::SharedUniform;
use crate::scene::{ShaderUniform, Vertex, TRIANGLE};

pub struct Renderer {
    gui: Option<GuiLayer>,
    context: ImmediateContext,
    pipeline: Pipeline,
    texture_view: ImageView,
    sampler: Sampler,
    vertex_buffer: Buffer,
    uniform_buffer: Buffer,
    render_pass: Option<RenderPass>,
    swap_chain: SwapChain,
    surface: Arc<PresentationSurface>,

    ring: UniformRing,
    uniform: Arc<SharedUniform>,
    clear_color: [f32; 4],
    depth_format: Format,
    render_finished: Option<vk::Semaphore>,
    minimized: bool,

    window: Arc<Window>,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Swapchain, render pass, GUI, pipeline, resources, context: in that order
    pub fn new(
        device: Arc<VulkanDevice>,
        window: Arc<Window>,
        config: &Config,
        assets: &DemoAssets,
        uniform: Arc<SharedUniform>,
    ) -> Result<Self> {
        let frames_in_flight = config.graphics.max_frames_in_flight;

        // ─────────────────────────────────────────────────────────────────────
        // Surface + swapchain
        // ─────────────────────────────────────────────────────────────────────
        let surface_desc = SurfaceDesc::from_raw(
            window
                .display_handle()
                .context("Window has no display handle")?
                .as_raw(),
            window
                .window_handle()
                .context("Window has no native handle")?
                .as_raw(),
        )?;
        let surface = Arc::new(device.create_surface(&surface_desc)?);

        let size = window.inner_size();
        let swap_chain = device.create_swap_chain(
            surface.clone(),
            size.width,
            size.height,
            Format::R8G8B8A8Unorm,
            config.get_present_mode(),
        )?;
        log::info!(
            "Swapchain: {} images, {:?}",
            swap_chain.image_count(),
            swap_chain.format()
        );

        // ─────────────────────────────────────────────────────────────────────
        // Render pass + GUI backend
        // ─────────────────────────────────────────────────────────────────────
        let depth_format = device.pick_depth_format(Format::D24UnormS8Uint)?;
        let render_pass = device.create_render_pass(swap_chain.images(), depth_format)?;

        let gui = GuiLayer::new(&device, &window, render_pass.render_pass, frames_in_flight)?;

        // ─────────────────────────────────────────────────────────────────────
        // Pipeline
        // ─────────────────────────────────────────────────────────────────────
        let vertex_shader =
            device.create_shader_module(&assets.vertex_shader, vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader =
            device.create_shader_module(&assets.fragment_shader, vk::ShaderStageFlags::FRAGMENT)?;
        log::info!(
            "Shaders: {} bytes vertex, {} bytes fragment SPIR-V",
            vertex_shader.byte_len(),
            fragment_shader.byte_len()
        );

        let pipeline = device.create_pipeline(&PipelineDesc {
            vertex_shader: &vertex_shader,
            fragment_shader: &fragment_shader,
            rasterizer: RasterizerDesc {
                cull_mode: CullMode::None,
                ..RasterizerDesc::default()
            },
            depth_stencil: DepthStencilDesc::default(),
            blend: BlendDesc::default(),
            attributes: vertex_attributes(),
            bindings: vec![VertexInputBindingDesc {
                binding: 0,
                stride: std::mem::size_of::<Vertex>() as u32,
                per_instance: false,
            }],
            descriptors: descriptor_layout(),
            render_pass: &render_pass,
        })?;

        // ─────────────────────────────────────────────────────────────────────
        // Uniform ring, vertex buffer, texture
        // ─────────────────────────────────────────────────────────────────────
        let ring = UniformRing::new(
            std::mem::size_of::<ShaderUniform>() as u64,
            device.min_uniform_alignment(),
            frames_in_flight.max(1),
        );
        let mut uniform_buffer =
            device.create_buffer("uniforms", ring.size(), BufferUsage::ConstantBuffer, None)?;
        let initial = uniform.snapshot();
        for slot in 0..ring.slots() {
            uniform_buffer.write(ring.offset(slot), bytemuck::bytes_of(&initial))?;
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let vertex_buffer = device.create_buffer(
            "triangle",
            vertex_bytes.len() as vk::DeviceSize,
            BufferUsage::VertexBuffer,
            Some(vertex_bytes),
        )?;

        let texture = &assets.texture;
        let texture_image = device.create_image_2d(
            "checker",
            Format::R8G8B8A8Unorm,
            ImageUsage::Sampled,
            texture.width,
            texture.height,
            Some(&texture.pixels),
        )?;
        let texture_view =
            device.create_image_view(ImageViewDesc::view_2d(Format::R8G8B8A8Unorm), &texture_image)?;
        let sampler = device.create_sampler(SamplerDesc::default())?;

        let context = device.create_immediate_context(frames_in_flight)?;

        log::info!("Renderer ready, {} frames in flight", context.frames_in_flight());

        Ok(Self {
            gui: Some(gui),
            context,
            pipeline,
            texture_view,
            sampler,
            vertex_buffer,
            uniform_buffer,
            render_pass: Some(render_pass),
            swap_chain,
            surface,
            ring,
            uniform,
            clear_color: config.graphics.clear_color,
            depth_format,
            render_finished: None,
            minimized: size.width == 0 || size.height == 0,
            window,
            device,
        })
    }

    /// Forward a window event to the GUI
    pub fn handle_window_event(&mut self, window_id: WindowId, event: &WindowEvent) {
        if let Some(gui) = self.gui.as_mut() {
            gui.handle_event(&self.window, window_id, event);
        }
    }

    pub fn gui_wants_keyboard(&self) -> bool {
        self.gui.as_ref().is_some_and(|gui| gui.wants_keyboard())
    }

    pub fn on_resized(&mut self, size: PhysicalSize<u32>) {
        log::debug!("Window resized to {}x{}", size.width, size.height);
        self.minimized = size.width == 0 || size.height == 0;
        if !self.minimized {
            self.swap_chain.mark_stale();
        }
    }

    /// Submit anything recorded and, when `wait`, block until the GPU is idle
    pub fn flush(&mut self, wait: bool) -> Result<()> {
        if let Some(gui) = self.gui.as_mut() {
            gui.discard_frame();
        }
        self.context.flush(wait)
    }

    /// Destroy the GUI backend ahead of everything else
    pub fn teardown_gui(&mut self) {
        if self.gui.take().is_some() {
            log::info!("GUI layer destroyed");
        }
    }
}

impl FrameTarget for Renderer {
    fn is_minimized(&self) -> bool {
        self.minimized
    }

    fn acquire(&mut self) -> Result<bool> {
        let image_available = self.context.wait_for_frame_slot()?;
        self.swap_chain.acquire_next_image(image_available)
    }

    fn rebuild(&mut self) -> Result<()> {
        let size = self.window.inner_size();

        // The pass holds views of the old images
        self.render_pass = None;
        if !self.swap_chain.resize(size.width, size.height)? {
            return Ok(());
        }

        let render_pass = self
            .device
            .create_render_pass(self.swap_chain.images(), self.depth_format)?;
        let extent = self.swap_chain.extent();
        if (extent.width, extent.height) != (size.width, size.height) {
            log::warn!(
                "Surface dictated {}x{}, window is {}x{}",
                extent.width,
                extent.height,
                size.width,
                size.height
            );
        }
        if let Some(gui) = self.gui.as_mut() {
            gui.set_render_pass(render_pass.render_pass)?;
        }
        let depth = render_pass.depth_extent();
        log::debug!(
            "Render pass rebuilt for {:?} swapchain generation {}: {}x{} (depth {}x{})",
            self.surface.kind(),
            render_pass.generation(),
            extent.width,
            extent.height,
            depth.width,
            depth.height
        );
        self.render_pass = Some(render_pass);
        Ok(())
    }

    fn record(&mut self) -> Result<()> {
        // A failed rebuild leaves no pass; abandoning the frame marks the
        // chain stale so the next frame rebuilds again
        let pass = self.render_pass.as_ref().ok_or(DemoError::SwapChainStale)?;

        // Latest record from the logic thread into this slot's region; the
        // slot's previous frame has retired, so the GPU is not reading it
        let offset = self.ring.offset(self.context.current_slot());
        let snapshot = self.uniform.snapshot();
        self.uniform_buffer
            .write(offset, bytemuck::bytes_of(&snapshot))?;
        if let Some(gui) = self.gui.as_mut() {
            gui.begin_frame(&self.window)?;
        }

        let ctx = &mut self.context;

        ctx.begin_frame()?;
        ctx.begin_render_pass(
            pass,
            self.swap_chain.current_image_index(),
            &[
                ClearValue::Color(self.clear_color),
                ClearValue::depth_stencil(1.0, 0),
            ],
        )?;
        ctx.bind_pipeline(&self.pipeline);
        ctx.bind_buffer(&self.uniform_buffer, offset, self.ring.record_size(), 0, 0, 0)?;
        ctx.bind_vertex_buffer(&self.vertex_buffer, 0, 0);
        ctx.bind_sampler(&self.sampler, 1, 0, 0);
        ctx.bind_image_view(&self.texture_view, 1, 1, 0);
        ctx.draw(3, 1, 0, 0)?;

        if let Some(gui) = self.gui.as_mut() {
            gui.draw(ctx.command_buffer())?;
        }

        ctx.end_render_pass()?;
        self.render_finished = Some(ctx.submit_frame()?);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        let render_finished = self
            .render_finished
            .take()
            .context("present without a submitted frame")?;
        self.swap_chain
            .present(self.device.graphics_queue, &[render_finished])
    }

    fn abandon(&mut self, image_acquired: bool) -> Result<()> {
        // The image cannot be presented without a finished frame; rebuilding
        // retires the chain and releases it
        self.swap_chain.mark_stale();
        self.render_finished = None;
        if let Some(gui) = self.gui.as_mut() {
            gui.discard_frame();
        }
        if image_acquired {
            self.context.abort_frame()?;
        }
        Ok(())
    }
}

/// Position and colour, both three floats, interleaved in binding 0
fn vertex_attributes() -> Vec<VertexInputAttributeDesc> {
    vec![
        VertexInputAttributeDesc {
            location: 0,
            format: Format::R32G32B32Sfloat,
            offset: std::mem::offset_of!(Vertex, pos) as u32,
            binding: 0,
        },
        VertexInputAttributeDesc {
            location: 1,
            format: Format::R32G32B32Sfloat,
            offset: std::mem::offset_of!(Vertex, color) as u32,
            binding: 0,
        },
    ]
}

/// Set 0: uniforms. Set 1: sampler and texture.
fn descriptor_layout() -> Vec<DescriptorBindingDesc> {
    vec![
        DescriptorBindingDesc {
            set: 0,
            binding: 0,
            kind: DescriptorKind::ConstantBuffer,
            stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        },
        DescriptorBindingDesc {
            set: 1,
            binding: 0,
            kind: DescriptorKind::Sampler,
            stages: vk::ShaderStageFlags::FRAGMENT,
        },
        DescriptorBindingDesc {
            set: 1,
            binding: 1,
            kind: DescriptorKind::SampledImage,
            stages: vk::ShaderStageFlags::FRAGMENT,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::pipeline::group_bindings_by_set;

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let attributes = vertex_attributes();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert!(attributes.iter().all(|a| a.binding == 0));
        assert!(attributes
            .iter()
            .all(|a| a.format.texel_size() == std::mem::size_of::<[f32; 3]>()));
    }

    #[test]
    fn descriptor_layout_matches_shaders() {
        let sets = group_bindings_by_set(&descriptor_layout()).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0][0].kind, DescriptorKind::ConstantBuffer);
        assert_eq!(sets[1][0].kind, DescriptorKind::Sampler);
        assert_eq!(sets[1][1].kind, DescriptorKind::SampledImage);
    }
}
