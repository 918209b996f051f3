// =============================================================================
// HELLO TRIANGLE - Vulkan frame loop with two frames in flight
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Platform (winit window, pumped once per frame)                 │
// │    └── FrameScheduler (acquire → record → submit → present)     │
// │          └── Renderer (swapchain, pipeline, frame slots)        │
// │                └── VulkanDevice (instance, surface, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Pump window events (close, resize)
// 2. Wait for the frame slot's fence
// 3. Acquire swapchain image
// 4. Record and submit the draw
// 5. Present, rebuilding the swapchain if it went stale
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod platform;
mod renderer;
mod vertex;

use anyhow::Result;
use config::Config;
use frame::{FrameBackend, FrameScheduler, TickOutcome};
use platform::Platform;
use renderer::Renderer;
use std::process::ExitCode;
use std::time::{Duration, Instant};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    init_logging();

    let config = Config::load();
    log::info!("Starting {}", config.window.title);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `info` unless RUST_LOG says otherwise
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn run(config: &Config) -> Result<()> {
    let mut platform = Platform::new(&config.window)?;

    let Some(extent) = frame::wait_for_nonzero_extent(&mut platform) else {
        return Ok(());
    };
    let (display_handle, window_handle) = platform.raw_handles()?;
    let mut renderer = Renderer::new(config, display_handle, window_handle, extent)?;

    let mut scheduler = FrameScheduler::new();
    let mut fps = config
        .debug
        .show_fps
        .then(|| FpsCounter::new(Duration::from_secs(1)));

    // ─────────────────────────────────────────────────────────────────────────
    // MAIN LOOP
    // ─────────────────────────────────────────────────────────────────────────
    loop {
        platform.poll_events();
        if platform.should_close() {
            break;
        }

        match scheduler.tick(&mut renderer, &mut platform)? {
            TickOutcome::Presented { .. } => {
                if let Some(fps) = fps.as_mut() {
                    if let Some((rate, frame_ms)) = fps.frame(Instant::now()) {
                        platform.set_title(&format!(
                            "{} - {:.0} FPS ({:.2}ms)",
                            config.window.title, rate, frame_ms
                        ));
                    }
                }
            }
            TickOutcome::Rebuilt => {}
            TickOutcome::Closing => break,
        }
    }

    log::info!(
        "Exiting after {} frames, {} swapchain rebuilds",
        scheduler.frame_counter(),
        scheduler.rebuild_count()
    );

    // Nothing may be in flight when the renderer starts tearing down
    renderer.wait_idle()?;
    drop(renderer);
    drop(platform);

    log::info!("Cleanup complete");
    Ok(())
}

// =============================================================================
// FPS TRACKING
// =============================================================================

struct FpsCounter {
    interval: Duration,
    last_frame: Option<Instant>,
    last_report: Option<Instant>,
    frames: u32,
}

impl FpsCounter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_frame: None,
            last_report: None,
            frames: 0,
        }
    }

    /// Count a presented frame. Once per interval returns frames per second
    /// and the latest frame time in milliseconds.
    fn frame(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_time = self
            .last_frame
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        let Some(last_report) = self.last_report else {
            self.last_report = Some(now);
            return None;
        };

        self.frames += 1;
        let elapsed = now.duration_since(last_report);
        if elapsed < self.interval {
            return None;
        }

        let rate = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.last_report = Some(now);
        Some((rate, frame_time * 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_reports_once_per_interval() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(Duration::from_secs(1));

        assert_eq!(fps.frame(start), None);
        for i in 1..10 {
            assert_eq!(fps.frame(start + Duration::from_millis(100 * i)), None);
        }

        let (rate, frame_ms) = fps.frame(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 10.0).abs() < 0.01);
        assert!((frame_ms - 100.0).abs() < 0.01);

        // Counting restarts after a report
        assert_eq!(fps.frame(start + Duration::from_millis(1100)), None);
    }
}
