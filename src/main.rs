// =============================================================================
// RHI TRIANGLE DEMO - textured triangle and GUI overlay over a thin Vulkan RHI
// =============================================================================
//
// Two threads: the main thread owns the window, the event pump, the GUI and
// everything on the GPU; the logic thread animates the uniform record at a
// fixed 120 Hz.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit ApplicationHandler, startup + shutdown order)       │
// │    ├── LogicTicker ──publishes──> SharedUniform                 │
// │    └── Renderer                                                 │
// │          ├── SwapChain + RenderPass (rebuilt on resize)         │
// │          ├── Pipeline, buffers, texture, sampler                │
// │          ├── ImmediateContext (frames in flight)                │
// │          └── GuiLayer (imgui)                                   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Drain window events, forwarding each to the GUI
// 2. Acquire a swapchain image (stale chain: rebuild, skip the frame)
// 3. Copy the latest uniform record into this frame's slot
// 4. Record the triangle and the GUI into one render pass
// 5. Submit and present
//
// =============================================================================

mod assets;
mod backend;
mod config;
mod error;
mod frame;
mod gui;
mod lifecycle;
mod logic;
mod renderer;
mod scene;

use anyhow::Result;
use backend::VulkanDevice;
use config::Config;
use error::DemoError;
use frame::{FpsCounter, FrameOutcome, FrameStats};
use lifecycle::ShutdownSteps;
use logic::{LogicTicker, SharedUniform, Termination};
use renderer::Renderer;
use scene::ShaderUniform;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{}, present mode: {}, logic: {} Hz",
        config.window.width,
        config.window.height,
        config.graphics.present_mode,
        config.logic.tick_rate
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // A fatal error becomes the process exit status
    app.finish()
}

/// Initialize logging, optionally mirrored into a fresh log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== {} Log ===", config.window.title);
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Owns everything the demo creates.
///
/// IMPORTANT: teardown goes through lifecycle::shutdown, not field order.
/// The logic thread must be joined and the GPU idle before the renderer,
/// window and device are released, in that order.
struct App {
    config: Config,
    termination: Termination,

    ticker: Option<LogicTicker>,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    device: Option<Arc<VulkanDevice>>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATS
    // ─────────────────────────────────────────────────────────────────────────
    stats: FrameStats,
    fps: FpsCounter,
    ticks: u64,

    /// First unrecoverable error; ends the event loop
    fatal: Option<anyhow::Error>,
    shut_down: bool,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            termination: Termination::new(),
            ticker: None,
            renderer: None,
            window: None,
            device: None,
            stats: FrameStats::default(),
            fps: FpsCounter::new(Instant::now()),
            ticks: 0,
            fatal: None,
            shut_down: false,
        }
    }

    // =========================================================================
    // STARTUP
    // =========================================================================

    /// Assets → device → window → renderer → logic thread.
    ///
    /// Assets are checked before anything is created so a missing shader
    /// never opens a window.
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let assets = assets::DemoAssets::load(&self.config.assets)?;

        let device = VulkanDevice::new(
            &self.config.window.title,
            self.config.debug.validation_layers,
        )?;
        self.device = Some(device.clone());

        let attributes = Window::default_attributes()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(true);
        let window = event_loop
            .create_window(attributes)
            .map(Arc::new)
            .map_err(|e| DemoError::Window(e.to_string()))?;
        self.window = Some(window.clone());

        // Projection uses the configured aspect and is never updated
        let aspect = self.config.window.width as f32 / self.config.window.height.max(1) as f32;
        let uniform = SharedUniform::new(ShaderUniform::initial(aspect));

        let renderer = Renderer::new(
            device,
            window,
            &self.config,
            &assets,
            uniform.clone(),
        )?;
        self.renderer = Some(renderer);

        self.ticker = Some(LogicTicker::spawn(
            uniform,
            self.termination.clone(),
            self.config.logic.tick_rate,
        )?);

        self.fps = FpsCounter::new(Instant::now());
        log::info!("Startup complete, entering frame loop");
        Ok(())
    }

    /// Remember the first fatal error and leave the event loop
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("Fatal: {:#}", err);
        self.fatal.get_or_insert(err);
        self.termination.request();
        event_loop.exit();
    }

    fn finish(mut self) -> Result<()> {
        if !self.shut_down {
            self.shutdown();
        }
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
        if let Err(e) = lifecycle::shutdown(self) {
            self.fatal.get_or_insert(e);
        }
        log::info!(
            "Frames presented: {}, swapchain rebuilds: {}, skipped: {}, abandoned: {}, logic ticks: {}",
            self.stats.presented,
            self.stats.rebuilds,
            self.stats.skipped,
            self.stats.abandoned,
            self.ticks
        );
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.termination.is_requested() {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match frame::drive_frame(renderer, &mut self.stats) {
            Ok(FrameOutcome::Presented) => self.update_fps(),
            Ok(FrameOutcome::Rebuilt | FrameOutcome::Skipped) => {}
            Err(e) if DemoError::is_stale(&e) => log::debug!("Frame dropped: {:#}", e),
            Err(e) if matches!(e.downcast_ref::<DemoError>(), Some(DemoError::DeviceLost(_))) => {
                self.fail(event_loop, e)
            }
            Err(e) => log::error!("Render error: {:#}", e),
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let Some((fps, frame_ms)) = self.fps.frame(Instant::now()) {
            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title, fps, frame_ms
                ));
            }
        }
    }
}

// =============================================================================
// SHUTDOWN STEPS
// =============================================================================

impl ShutdownSteps for App {
    fn request_termination(&mut self) {
        self.termination.request();
    }

    fn join_logic(&mut self) -> Result<()> {
        if let Some(ticker) = self.ticker.take() {
            self.ticks = ticker.join()?;
        }
        Ok(())
    }

    fn flush_context(&mut self) -> Result<()> {
        match (self.renderer.as_mut(), self.device.as_ref()) {
            (Some(renderer), _) => renderer.flush(true),
            (None, Some(device)) => device.wait_idle(),
            (None, None) => Ok(()),
        }
    }

    fn teardown_gui(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.teardown_gui();
        }
    }

    fn release_renderer(&mut self) {
        // Swapchain and surface go here, while the window still exists
        if self.renderer.take().is_some() {
            log::info!("Renderer resources released");
        }
    }

    fn destroy_window(&mut self) {
        if self.window.take().is_some() {
            log::info!("Window destroyed");
        }
    }

    fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            let holders = Arc::strong_count(&device) - 1;
            if holders > 0 {
                log::warn!("Device still referenced by {} resource(s) at release", holders);
            }
            drop(device);
            log::info!("Device released");
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() || self.fatal.is_some() {
            return;
        }

        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e.context("Startup failed"));
        }
    }

    /// Every event goes to the GUI first, then to the demo.
    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        renderer.handle_window_event(window_id, &event);

        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.termination.request();
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => renderer.on_resized(size),

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => self.redraw(event_loop),

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed() && !renderer.gui_wants_keyboard() =>
            {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.termination.request();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.termination.is_requested() {
            return;
        }

        if self.ticker.as_ref().is_some_and(|t| t.is_finished()) {
            let err = match self.ticker.take().map(LogicTicker::join) {
                Some(Err(e)) => e,
                _ => anyhow::anyhow!("Logic thread exited early"),
            };
            self.fail(event_loop, err);
            return;
        }

        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}
