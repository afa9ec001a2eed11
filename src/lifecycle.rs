// Shutdown ordering
//
//   terminate ─> join logic ─> flush context ─> GUI ─> renderer ─> window ─> device
//
// Every step runs even if an earlier one failed. The first error is the one
// reported.

use anyhow::Result;

/// The teardown steps, in the order `shutdown` runs them
pub trait ShutdownSteps {
    fn request_termination(&mut self);
    /// Returns once the logic thread has exited
    fn join_logic(&mut self) -> Result<()>;
    /// Submit pending work and wait for the GPU to go idle
    fn flush_context(&mut self) -> Result<()>;
    fn teardown_gui(&mut self);
    /// Swapchain, surface and every GPU resource except the device
    fn release_renderer(&mut self);
    fn destroy_window(&mut self);
    fn release_device(&mut self);
}

pub fn shutdown(steps: &mut impl ShutdownSteps) -> Result<()> {
    log::info!("Shutting down");

    let mut first_error = None;
    let mut note = |step: &str, result: Result<()>| {
        if let Err(e) = result {
            log::error!("Shutdown step '{}' failed: {:#}", step, e);
            first_error.get_or_insert(e);
        }
    };

    steps.request_termination();
    note("join logic", steps.join_logic());
    note("flush context", steps.flush_context());
    steps.teardown_gui();
    steps.release_renderer();
    steps.destroy_window();
    steps.release_device();

    match first_error {
        Some(e) => Err(e),
        None => {
            log::info!("Shutdown complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Default)]
    struct Recorder {
        steps: Vec<&'static str>,
        fail_join: bool,
        fail_flush: bool,
    }

    impl ShutdownSteps for Recorder {
        fn request_termination(&mut self) {
            self.steps.push("terminate");
        }

        fn join_logic(&mut self) -> Result<()> {
            self.steps.push("join");
            if self.fail_join {
                return Err(anyhow!("logic thread panicked"));
            }
            Ok(())
        }

        fn flush_context(&mut self) -> Result<()> {
            self.steps.push("flush");
            if self.fail_flush {
                return Err(anyhow!("device lost"));
            }
            Ok(())
        }

        fn teardown_gui(&mut self) {
            self.steps.push("gui");
        }

        fn release_renderer(&mut self) {
            self.steps.push("renderer");
        }

        fn destroy_window(&mut self) {
            self.steps.push("window");
        }

        fn release_device(&mut self) {
            self.steps.push("device");
        }
    }

    const FULL_ORDER: [&str; 7] = [
        "terminate", "join", "flush", "gui", "renderer", "window", "device",
    ];

    #[test]
    fn steps_run_in_order() {
        let mut recorder = Recorder::default();
        shutdown(&mut recorder).unwrap();
        assert_eq!(recorder.steps, FULL_ORDER);
    }

    #[test]
    fn failures_do_not_skip_later_steps() {
        let mut recorder = Recorder {
            fail_join: true,
            fail_flush: true,
            ..Default::default()
        };
        let err = shutdown(&mut recorder).unwrap_err();
        assert_eq!(recorder.steps, FULL_ORDER);
        assert!(err.to_string().contains("logic thread"));
    }
}
