// Frame loop policy
//
// The per-frame decision (skip, rebuild, or record and present) is kept
// apart from the Vulkan calls so it can be driven by a scripted target in
// tests. The renderer implements FrameTarget for the real swapchain.

use anyhow::Result;
use std::time::{Duration, Instant};

/// The steps a frame can take
pub trait FrameTarget {
    /// Nothing to draw into (window minimised)
    fn is_minimized(&self) -> bool;

    /// Acquire the next image. False means the swapchain is stale.
    fn acquire(&mut self) -> Result<bool>;

    /// Drop the render pass, resize the swapchain and rebuild the pass
    fn rebuild(&mut self) -> Result<()>;

    /// Record and submit the frame into the acquired image
    fn record(&mut self) -> Result<()>;

    fn present(&mut self) -> Result<()>;

    /// Undo a frame that failed in `rebuild` or `record`: release the
    /// acquired image if there is one and leave the chain marked stale, so
    /// the next frame starts with a rebuild
    fn abandon(&mut self, image_acquired: bool) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Swapchain was rebuilt; nothing was drawn or presented
    Rebuilt,
    Skipped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub rebuilds: u64,
    pub skipped: u64,
    pub abandoned: u64,
}

/// Run one frame against `target`
pub fn drive_frame(target: &mut impl FrameTarget, stats: &mut FrameStats) -> Result<FrameOutcome> {
    if target.is_minimized() {
        stats.skipped += 1;
        return Ok(FrameOutcome::Skipped);
    }

    if !target.acquire()? {
        if let Err(e) = target.rebuild() {
            abandon(target, stats, false);
            return Err(e);
        }
        stats.rebuilds += 1;
        log::debug!("Swapchain rebuilt (rebuild #{})", stats.rebuilds);
        return Ok(FrameOutcome::Rebuilt);
    }

    if let Err(e) = target.record() {
        abandon(target, stats, true);
        return Err(e);
    }
    target.present()?;
    stats.presented += 1;
    Ok(FrameOutcome::Presented)
}

fn abandon(target: &mut impl FrameTarget, stats: &mut FrameStats, image_acquired: bool) {
    stats.abandoned += 1;
    if let Err(e) = target.abandon(image_acquired) {
        log::error!("Failed to abandon frame: {:#}", e);
    }
}

/// Byte layout of the per-frame uniform regions inside one buffer.
/// Each frame slot gets its own region so the CPU never writes memory the
/// GPU may still be reading for an earlier frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformRing {
    record_size: u64,
    stride: u64,
    slots: usize,
}

impl UniformRing {
    pub fn new(record_size: u64, min_alignment: u64, slots: usize) -> Self {
        let alignment = min_alignment.max(1);
        let stride = record_size.div_ceil(alignment) * alignment;
        Self {
            record_size,
            stride,
            slots: slots.max(1),
        }
    }

    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Total buffer size needed
    pub fn size(&self) -> u64 {
        self.stride * self.slots as u64
    }

    pub fn offset(&self, slot: usize) -> u64 {
        (slot % self.slots) as u64 * self.stride
    }
}

/// Frames per second, refreshed once per second
pub struct FpsCounter {
    frames: u32,
    last_update: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            last_update: now,
            last_frame: now,
        }
    }

    /// Count a presented frame. Returns (fps, frame time in ms) when a new
    /// reading is available.
    pub fn frame(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frames += 1;

        let elapsed = now.duration_since(self.last_update);
        if elapsed < Duration::from_secs(1) {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.last_update = now;
        Some((fps, frame_time * 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records which steps ran; acquire answers from a script. Tracks the
    /// images handed out by acquire that were neither presented nor
    /// released by a rebuild.
    #[derive(Default)]
    struct ScriptedTarget {
        acquire_results: Vec<bool>,
        minimized: bool,
        stale: bool,
        record_failures: u32,
        rebuild_failures: u32,
        held_images: u32,
        log: Vec<&'static str>,
    }

    impl FrameTarget for ScriptedTarget {
        fn is_minimized(&self) -> bool {
            self.minimized
        }

        fn acquire(&mut self) -> Result<bool> {
            self.log.push("acquire");
            if self.stale {
                return Ok(false);
            }
            let acquired = if self.acquire_results.is_empty() {
                true
            } else {
                self.acquire_results.remove(0)
            };
            if acquired {
                self.held_images += 1;
            }
            Ok(acquired)
        }

        fn rebuild(&mut self) -> Result<()> {
            self.log.push("rebuild");
            // Retiring the old chain releases its images
            self.held_images = 0;
            if self.rebuild_failures > 0 {
                self.rebuild_failures -= 1;
                anyhow::bail!("render pass creation failed");
            }
            self.stale = false;
            Ok(())
        }

        fn record(&mut self) -> Result<()> {
            self.log.push("record");
            if self.record_failures > 0 {
                self.record_failures -= 1;
                anyhow::bail!("gui draw failed");
            }
            Ok(())
        }

        fn present(&mut self) -> Result<()> {
            self.log.push("present");
            self.held_images -= 1;
            Ok(())
        }

        fn abandon(&mut self, image_acquired: bool) -> Result<()> {
            self.log.push(if image_acquired {
                "abandon acquired"
            } else {
                "abandon"
            });
            self.stale = true;
            Ok(())
        }
    }

    #[test]
    fn stale_acquire_rebuilds_once_and_presents_nothing() {
        let mut target = ScriptedTarget {
            acquire_results: vec![false],
            ..Default::default()
        };
        let mut stats = FrameStats::default();

        let outcome = drive_frame(&mut target, &mut stats).unwrap();

        assert_eq!(outcome, FrameOutcome::Rebuilt);
        assert_eq!(target.log, vec!["acquire", "rebuild"]);
        assert_eq!(stats.rebuilds, 1);
        assert_eq!(stats.presented, 0);
    }

    #[test]
    fn frame_after_rebuild_presents_normally() {
        let mut target = ScriptedTarget {
            acquire_results: vec![true, false, true],
            ..Default::default()
        };
        let mut stats = FrameStats::default();

        let outcomes: Vec<_> = (0..3)
            .map(|_| drive_frame(&mut target, &mut stats).unwrap())
            .collect();

        assert_eq!(
            outcomes,
            vec![FrameOutcome::Presented, FrameOutcome::Rebuilt, FrameOutcome::Presented]
        );
        assert_eq!(target.log.iter().filter(|s| **s == "rebuild").count(), 1);
        assert_eq!(target.log.iter().filter(|s| **s == "present").count(), 2);
        assert_eq!(
            stats,
            FrameStats {
                presented: 2,
                rebuilds: 1,
                skipped: 0,
                abandoned: 0,
            }
        );
    }

    #[test]
    fn failed_record_releases_its_image_through_a_rebuild() {
        let mut target = ScriptedTarget {
            record_failures: 1,
            ..Default::default()
        };
        let mut stats = FrameStats::default();

        let err = drive_frame(&mut target, &mut stats).unwrap_err();
        assert!(err.to_string().contains("gui draw failed"));
        assert_eq!(target.log, vec!["acquire", "record", "abandon acquired"]);

        assert_eq!(drive_frame(&mut target, &mut stats).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(drive_frame(&mut target, &mut stats).unwrap(), FrameOutcome::Presented);
        assert_eq!(target.held_images, 0);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.presented, 1);
    }

    #[test]
    fn repeated_record_failures_never_pile_up_images() {
        let mut target = ScriptedTarget {
            record_failures: 4,
            ..Default::default()
        };
        let mut stats = FrameStats::default();

        let mut errors = 0;
        for _ in 0..10 {
            if drive_frame(&mut target, &mut stats).is_err() {
                errors += 1;
            }
            assert!(target.held_images <= 1);
        }

        assert_eq!(errors, 4);
        assert_eq!(stats.abandoned, 4);
        assert_eq!(stats.rebuilds, 4);
        assert_eq!(stats.presented, 2);
        assert_eq!(target.held_images, 0);
    }

    #[test]
    fn failed_rebuild_is_retried_next_frame() {
        let mut target = ScriptedTarget {
            acquire_results: vec![false],
            rebuild_failures: 1,
            ..Default::default()
        };
        let mut stats = FrameStats::default();

        assert!(drive_frame(&mut target, &mut stats).is_err());
        assert_eq!(target.log, vec!["acquire", "rebuild", "abandon"]);

        assert_eq!(drive_frame(&mut target, &mut stats).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(drive_frame(&mut target, &mut stats).unwrap(), FrameOutcome::Presented);
        assert_eq!(stats.rebuilds, 1);
        assert_eq!(stats.abandoned, 1);
    }

    #[test]
    fn minimised_window_touches_nothing() {
        let mut target = ScriptedTarget {
            minimized: true,
            ..Default::default()
        };
        let mut stats = FrameStats::default();

        assert_eq!(drive_frame(&mut target, &mut stats).unwrap(), FrameOutcome::Skipped);
        assert!(target.log.is_empty());
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn ring_regions_are_aligned_and_disjoint() {
        let ring = UniformRing::new(144, 256, 2);
        assert_eq!(ring.stride(), 256);
        assert_eq!(ring.size(), 512);
        assert_eq!(ring.offset(0), 0);
        assert_eq!(ring.offset(1), 256);
        assert_eq!(ring.offset(2), 0);
        assert!(ring.offset(1) >= ring.offset(0) + ring.record_size());

        let tight = UniformRing::new(144, 16, 3);
        assert_eq!(tight.stride(), 144);
        assert_eq!(tight.size(), 432);
    }

    #[test]
    fn fps_reports_once_per_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        for i in 1..60 {
            assert!(fps.frame(start + Duration::from_millis(i * 16)).is_none());
        }
        let (rate, frame_ms) = fps.frame(start + Duration::from_millis(1000)).unwrap();
        assert!((rate - 60.0).abs() < 0.01);
        assert!((frame_ms - 56.0).abs() < 0.01);
    }
}
