// Logic thread - fixed-rate updates of the shared uniform record
//
// The worker never touches GPU memory. It writes into a CPU-side record
// behind a mutex; the frame recorder copies the latest record into the
// frame's slot of the mapped uniform buffer. The GPU therefore always
// reads a recent value and never a region that is being written.

use crate::scene::ShaderUniform;
use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Cooperative stop request shared by the event pump and the logic thread
#[derive(Clone, Default)]
pub struct Termination(Arc<AtomicBool>);

impl Termination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The uniform record as last written by the logic thread
pub struct SharedUniform {
    record: Mutex<ShaderUniform>,
}

impl SharedUniform {
    pub fn new(initial: ShaderUniform) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(initial),
        })
    }

    /// Exclusive access for writing; dropping the guard publishes
    pub fn map(&self) -> MutexGuard<'_, ShaderUniform> {
        self.record.lock()
    }

    /// Copy of the most recently published record
    pub fn snapshot(&self) -> ShaderUniform {
        *self.record.lock()
    }
}

/// Tick deadlines anchored at the start instant: tick `n` is due at
/// `start + n / rate`, so late wake-ups do not push later ticks back.
pub struct TickSchedule {
    start: Instant,
    rate: f64,
    ticks: u64,
}

impl TickSchedule {
    pub fn new(start: Instant, tick_rate: u32) -> Self {
        Self {
            start,
            rate: tick_rate as f64,
            ticks: 0,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }

    /// Seconds between the schedule's start and `now`
    pub fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.start).as_secs_f64()
    }

    pub fn deadline(&self, tick: u64) -> Instant {
        self.start + Duration::from_secs_f64(tick as f64 / self.rate)
    }

    /// Count one completed tick and return when the next one is due
    pub fn advance(&mut self) -> Instant {
        self.ticks += 1;
        self.deadline(self.ticks)
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

/// Run `on_tick(elapsed_secs)` once per tick until termination is requested.
/// The flag is checked once per tick, before the tick body.
pub fn run_ticks(
    schedule: &mut TickSchedule,
    termination: &Termination,
    mut on_tick: impl FnMut(f64),
) -> u64 {
    while !termination.is_requested() {
        on_tick(schedule.elapsed_secs(Instant::now()));
        let deadline = schedule.advance();
        sleep_until(deadline);
    }
    schedule.ticks()
}

/// Handle to the spawned logic thread
pub struct LogicTicker {
    handle: JoinHandle<u64>,
}

impl LogicTicker {
    pub fn spawn(
        uniform: Arc<SharedUniform>,
        termination: Termination,
        tick_rate: u32,
    ) -> Result<Self> {
        log::info!("Starting logic thread at {} Hz", tick_rate);

        let handle = std::thread::Builder::new()
            .name("logic".to_string())
            .spawn(move || {
                let mut schedule = TickSchedule::new(Instant::now(), tick_rate);
                run_ticks(&mut schedule, &termination, |elapsed| {
                    uniform.map().animate(elapsed);
                    log::trace!("tick at {:.4}s", elapsed);
                })
            })
            .context("Failed to spawn logic thread")?;

        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to observe termination; returns its tick count
    pub fn join(self) -> Result<u64> {
        let ticks = self
            .handle
            .join()
            .map_err(|_| anyhow::anyhow!("Logic thread panicked"))?;
        log::info!("Logic thread stopped after {} ticks", ticks);
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn deadlines_are_anchored_at_start() {
        let start = Instant::now();
        let mut schedule = TickSchedule::new(start, 120);
        for n in 1..=600u64 {
            let deadline = schedule.advance();
            let expected = n as f64 / 120.0;
            let actual = (deadline - start).as_secs_f64();
            assert!((actual - expected).abs() < 1e-6, "tick {n}: {actual} vs {expected}");
        }
        assert_eq!(schedule.ticks(), 600);
        assert!((schedule.interval().as_secs_f64() - 1.0 / 120.0).abs() < 1e-9);
    }

    #[test]
    fn ticks_wait_for_their_deadline() {
        let termination = Termination::new();
        let mut schedule = TickSchedule::new(Instant::now(), 120);
        let start = schedule.start();
        let mut seen = Vec::new();

        let ticks = run_ticks(&mut schedule, &termination, |_| {
            seen.push(Instant::now());
            if seen.len() == 24 {
                termination.request();
            }
        });

        assert_eq!(ticks, 24);
        for (n, at) in seen.iter().enumerate() {
            let due = start + Duration::from_secs_f64(n as f64 / 120.0);
            assert!(*at >= due, "tick {n} ran early");
            // loose bound: one scheduler quantum plus CI noise
            assert!(*at - due < Duration::from_millis(50), "tick {n} drifted");
        }
        // tick N-1 ran, then the worker slept until start + N/120
        assert!(start.elapsed() >= Duration::from_secs_f64(24.0 / 120.0));
    }

    #[test]
    fn terminated_before_start_runs_no_ticks() {
        let termination = Termination::new();
        termination.request();
        let mut schedule = TickSchedule::new(Instant::now(), 120);
        let ticks = run_ticks(&mut schedule, &termination, |_| panic!("should not tick"));
        assert_eq!(ticks, 0);
    }

    #[test]
    fn worker_tick_count_tracks_wall_clock() {
        let uniform = SharedUniform::new(ShaderUniform::initial(640.0 / 480.0));
        let termination = Termination::new();
        let ticker = LogicTicker::spawn(uniform, termination.clone(), 120).unwrap();

        std::thread::sleep(Duration::from_millis(500));
        termination.request();
        let ticks = ticker.join().unwrap();

        // 0.5 s at 120 Hz is 60 ticks; anchored deadlines catch up after hiccups
        assert!((50..=66).contains(&ticks), "ran {ticks} ticks");
    }

    #[test]
    fn worker_writes_consistent_records() {
        let initial = ShaderUniform::initial(640.0 / 480.0);
        let uniform = SharedUniform::new(initial);
        let termination = Termination::new();
        let ticker = LogicTicker::spawn(uniform.clone(), termination.clone(), 120).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        let record = uniform.snapshot();
        termination.request();
        ticker.join().unwrap();

        // colour.xy = (sin t, cos t) for the tick's t
        let t = (record.color.x as f64).atan2(record.color.y as f64);
        assert!((record.color.truncate().truncate().length() - 1.0).abs() < 1e-4);
        assert_eq!(record.color.z, 1.0);
        assert_eq!(record.color.w, 1.0);
        assert!(record
            .modelview
            .abs_diff_eq(crate::scene::orbit_view(t), 1e-4));
        assert_eq!(
            bytemuck::bytes_of(&record.projection),
            bytemuck::bytes_of(&initial.projection)
        );
        assert_ne!(record.color, Vec4::ONE);
    }

    #[test]
    fn join_happens_after_termination() {
        let uniform = SharedUniform::new(ShaderUniform::initial(1.0));
        let termination = Termination::new();
        let ticker = LogicTicker::spawn(uniform, termination.clone(), 120).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert!(!ticker.is_finished());
        termination.request();
        assert!(ticker.join().unwrap() >= 1);
    }
}
