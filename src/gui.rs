// GUI overlay - imgui context, winit platform glue and the Vulkan backend
//
// Frame protocol: begin_frame() builds the widgets, draw() renders them into
// the open render pass. A frame begun but never drawn is closed by the next
// begin_frame().

use anyhow::{Context, Result};
use ash::vk;
use imgui::{ConfigFlags, FontConfig, FontSource};
use imgui_rs_vulkan_renderer::{Options, Renderer as VulkanGuiRenderer};
use imgui_winit_support::{HiDpiMode, WinitPlatform};
use std::time::Instant;
use winit::event::{Event, WindowEvent};
use winit::window::{Window, WindowId};

use crate::backend::VulkanDevice;

pub struct GuiLayer {
    backend: VulkanGuiRenderer,
    platform: WinitPlatform,
    context: imgui::Context,
    frame_open: bool,
    show_demo: bool,
    last_frame: Instant,
}

impl GuiLayer {
    pub fn new(
        device: &VulkanDevice,
        window: &Window,
        render_pass: vk::RenderPass,
        frames_in_flight: usize,
    ) -> Result<Self> {
        log::info!("Creating GUI layer");

        let mut context = imgui::Context::create();
        // No imgui.ini next to the executable
        context.set_ini_filename(None);
        context.io_mut().config_flags |= ConfigFlags::NAV_ENABLE_KEYBOARD;

        let mut platform = WinitPlatform::new(&mut context);
        platform.attach_window(context.io_mut(), window, HiDpiMode::Rounded);

        let hidpi_factor = platform.hidpi_factor();
        let font_size = (13.0 * hidpi_factor) as f32;
        context.fonts().add_font(&[FontSource::DefaultFontData {
            config: Some(FontConfig {
                size_pixels: font_size,
                ..FontConfig::default()
            }),
        }]);
        context.io_mut().font_global_scale = (1.0 / hidpi_factor) as f32;

        // Uploads the font atlas through the device's one-off pool
        let backend = VulkanGuiRenderer::with_default_allocator(
            &device.instance,
            device.physical_device,
            device.device.clone(),
            device.graphics_queue,
            device.upload_pool(),
            render_pass,
            &mut context,
            Some(Options {
                in_flight_frames: frames_in_flight,
                ..Default::default()
            }),
        )
        .context("Failed to create GUI renderer")?;

        Ok(Self {
            backend,
            platform,
            context,
            frame_open: false,
            show_demo: true,
            last_frame: Instant::now(),
        })
    }

    pub fn handle_event(&mut self, window: &Window, window_id: WindowId, event: &WindowEvent) {
        let event: Event<()> = Event::WindowEvent {
            window_id,
            event: event.clone(),
        };
        self.platform
            .handle_event(self.context.io_mut(), window, &event);
    }

    /// True when imgui wants the keyboard (a text field has focus)
    pub fn wants_keyboard(&self) -> bool {
        self.context.io().want_capture_keyboard
    }

    /// Platform first, then the imgui frame and its widgets
    pub fn begin_frame(&mut self, window: &Window) -> Result<()> {
        if self.frame_open {
            self.discard_frame();
        }

        let now = Instant::now();
        self.context
            .io_mut()
            .update_delta_time(now - self.last_frame);
        self.last_frame = now;

        self.platform
            .prepare_frame(self.context.io_mut(), window)
            .context("Failed to prepare GUI frame")?;

        let ui = self.context.new_frame();
        if self.show_demo {
            ui.show_demo_window(&mut self.show_demo);
        }
        self.platform.prepare_render(ui, window);

        self.frame_open = true;
        Ok(())
    }

    /// Record the frame's draw data into `cmd`, inside the open render pass
    pub fn draw(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        if !self.frame_open {
            return Ok(());
        }
        self.frame_open = false;

        let draw_data = self.context.render();
        self.backend
            .cmd_draw(cmd, draw_data)
            .context("Failed to record GUI draw data")
    }

    /// End an open frame without drawing it
    pub fn discard_frame(&mut self) {
        if self.frame_open {
            let _ = self.context.render();
            self.frame_open = false;
        }
    }

    /// The swapchain was rebuilt together with its render pass
    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        self.backend
            .set_render_pass(render_pass)
            .context("Failed to retarget GUI renderer")
    }
}
