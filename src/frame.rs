// =============================================================================
// FRAME SCHEDULER - acquire → record → submit → present
// =============================================================================
//
// Drives one frame slot per tick and owns the swapchain rebuild protocol.
// The GPU side sits behind `FrameBackend` and the window behind
// `WindowSystem`, so the ordering rules can be exercised without a device.
//
// FRAME TIMELINE (one tick, slot = counter % MAX_FRAMES_IN_FLIGHT):
// ┌──────────────────────────────────────────────────────────────────────┐
// │ wait fence ─> acquire ─> reset fence ─> record ─> submit ─> present  │
// │     │            │                                            │      │
// │  (slot free   (out of date:                         (out of date,   │
// │   again)       rebuild, end tick)                    suboptimal or  │
// │                                                      resized: rebuild)│
// └──────────────────────────────────────────────────────────────────────┘

use anyhow::Result;
use ash::vk;

use crate::config::MAX_FRAMES_IN_FLIGHT;

/// Result of asking the swapchain for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
    /// The driver returned without an image (`NOT_READY`/`TIMEOUT`).
    NoImage,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented { slot: usize, image_index: u32 },
    /// Acquisition failed recoverably; the swapchain was rebuilt instead.
    Rebuilt,
    /// The window was closed while the scheduler waited for it to be restored.
    Closing,
}

/// GPU operations one tick is made of, addressed by frame slot.
pub trait FrameBackend {
    /// Block until the slot's last submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    /// Signals the slot's "image available" semaphore when the image is ready.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    /// Waits on "image available", signals "render finished" and the slot fence.
    fn submit(&mut self, slot: usize) -> Result<()>;
    /// Waits on "render finished".
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    fn wait_idle(&mut self) -> Result<()>;
    /// Replace the swapchain and everything derived from it. Only called
    /// after `wait_idle`.
    fn rebuild_swapchain(&mut self, framebuffer_extent: vk::Extent2D) -> Result<()>;
}

/// What the scheduler needs from the window.
pub trait WindowSystem {
    fn framebuffer_size(&self) -> vk::Extent2D;
    /// Block until at least one window event has been handled.
    fn wait_events(&mut self);
    fn resize_pending(&self) -> bool;
    fn clear_resize(&mut self);
    fn close_requested(&self) -> bool {
        false
    }
}

/// Block while the window is minimized, then return its pixel size.
/// `None` if the window was closed before it came back.
pub fn wait_for_nonzero_extent<W: WindowSystem>(window: &mut W) -> Option<vk::Extent2D> {
    let mut extent = window.framebuffer_size();
    if extent.width == 0 || extent.height == 0 {
        log::info!("Window minimized, waiting for it to be restored");
    }
    while extent.width == 0 || extent.height == 0 {
        if window.close_requested() {
            return None;
        }
        window.wait_events();
        extent = window.framebuffer_size();
    }
    Some(extent)
}

pub struct FrameScheduler {
    frame_counter: u64,
    phases: [SlotPhase; MAX_FRAMES_IN_FLIGHT],
    rebuilds: u64,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            frame_counter: 0,
            phases: [SlotPhase::Idle; MAX_FRAMES_IN_FLIGHT],
            rebuilds: 0,
        }
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Frames presented so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn phase(&self, slot: usize) -> SlotPhase {
        self.phases[slot % MAX_FRAMES_IN_FLIGHT]
    }

    fn enter(&mut self, slot: usize, phase: SlotPhase) {
        log::trace!("slot {}: {:?} -> {:?}", slot, self.phase(slot), phase);
        self.phases[slot] = phase;
    }

    /// Render and present one frame.
    pub fn tick<B, W>(&mut self, backend: &mut B, window: &mut W) -> Result<TickOutcome>
    where
        B: FrameBackend,
        W: WindowSystem,
    {
        // A resize seen while polling must be applied before acquiring
        if window.resize_pending() && !self.rebuild(backend, window)? {
            return Ok(TickOutcome::Closing);
        }

        let slot = self.current_slot();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot
        // ─────────────────────────────────────────────────────────────────────
        backend.wait_for_slot(slot)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        self.enter(slot, SlotPhase::Acquiring);
        let (image_index, suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            outcome @ (AcquireOutcome::OutOfDate | AcquireOutcome::NoImage) => {
                log::debug!("Acquire returned {:?}, rebuilding swapchain", outcome);
                // Fence untouched, so the next wait on this slot returns at once
                self.enter(slot, SlotPhase::Idle);
                return Ok(if self.rebuild(backend, window)? {
                    TickOutcome::Rebuilt
                } else {
                    TickOutcome::Closing
                });
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Reset the fence now that work will definitely be submitted
        // ─────────────────────────────────────────────────────────────────────
        backend.reset_slot_fence(slot)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4 + 5: Record and submit
        // ─────────────────────────────────────────────────────────────────────
        self.enter(slot, SlotPhase::Recording);
        backend.record(slot, image_index)?;
        backend.submit(slot)?;
        self.enter(slot, SlotPhase::Submitted);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present
        // ─────────────────────────────────────────────────────────────────────
        self.enter(slot, SlotPhase::Presenting);
        let presented = backend.present(slot, image_index)?;
        self.enter(slot, SlotPhase::Idle);

        if suboptimal || presented != PresentOutcome::Presented || window.resize_pending() {
            log::debug!(
                "Rebuilding after present (acquire suboptimal: {}, present: {:?})",
                suboptimal,
                presented
            );
            self.rebuild(backend, window)?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Advance to next frame slot
        // ─────────────────────────────────────────────────────────────────────
        self.frame_counter += 1;

        Ok(TickOutcome::Presented { slot, image_index })
    }

    /// Stop-the-world swapchain rebuild at the window's current size.
    /// Returns false, with nothing rebuilt, if the window closed while minimized.
    pub fn rebuild<B, W>(&mut self, backend: &mut B, window: &mut W) -> Result<bool>
    where
        B: FrameBackend,
        W: WindowSystem,
    {
        let Some(extent) = wait_for_nonzero_extent(window) else {
            return Ok(false);
        };

        // Nothing in flight may still reference the old images
        backend.wait_idle()?;
        backend.rebuild_swapchain(extent)?;

        window.clear_resize();
        self.rebuilds += 1;
        log::info!("Swapchain rebuilt at {}x{}", extent.width, extent.height);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const N: usize = MAX_FRAMES_IN_FLIGHT;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        Rebuild(u32, u32),
    }

    /// Records every call and models the fences closely enough to catch
    /// a slot being reused before its wait.
    struct MockBackend {
        ops: Vec<Op>,
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        fail_acquire: bool,
        // Submitted and not yet waited on
        pending: [bool; N],
        // Fence reset and not yet submitted
        fence_reset: [bool; N],
        idle_since_submit: bool,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                ops: Vec::new(),
                image_count,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_acquire: false,
                pending: [false; N],
                fence_reset: [false; N],
                idle_since_submit: true,
            }
        }

        fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
            self.ops.iter().filter(|op| pred(op)).count()
        }

        fn rebuilds(&self) -> Vec<(u32, u32)> {
            self.ops
                .iter()
                .filter_map(|op| match *op {
                    Op::Rebuild(w, h) => Some((w, h)),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.ops.push(Op::Wait(slot));
            self.pending[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.ops.push(Op::Acquire(slot));
            if self.fail_acquire {
                anyhow::bail!("device lost");
            }
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
            self.ops.push(Op::Reset(slot));
            assert!(!self.pending[slot], "fence of slot {} reset while in flight", slot);
            self.fence_reset[slot] = true;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.ops.push(Op::Record(slot, image_index));
            assert!(!self.pending[slot], "command buffer of slot {} reused while in flight", slot);
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.ops.push(Op::Submit(slot));
            assert!(self.fence_reset[slot], "slot {} submitted with a signaled fence", slot);
            self.fence_reset[slot] = false;
            self.pending[slot] = true;
            self.idle_since_submit = false;
            assert!(self.pending.iter().filter(|&&p| p).count() <= N);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.ops.push(Op::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.ops.push(Op::WaitIdle);
            self.pending = [false; N];
            self.idle_since_submit = true;
            Ok(())
        }

        fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
            assert!(self.idle_since_submit, "swapchain rebuilt while work was in flight");
            self.ops.push(Op::Rebuild(extent.width, extent.height));
            self.next_image = 0;
            Ok(())
        }
    }

    struct MockWindow {
        size: vk::Extent2D,
        // Sizes revealed one per `wait_events`
        upcoming_sizes: VecDeque<vk::Extent2D>,
        resized: bool,
        closed: bool,
        waits: usize,
    }

    impl MockWindow {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: vk::Extent2D { width, height },
                upcoming_sizes: VecDeque::new(),
                resized: false,
                closed: false,
                waits: 0,
            }
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.size = vk::Extent2D { width, height };
            self.resized = true;
        }
    }

    impl WindowSystem for MockWindow {
        fn framebuffer_size(&self) -> vk::Extent2D {
            self.size
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(size) = self.upcoming_sizes.pop_front() {
                self.size = size;
            }
        }

        fn resize_pending(&self) -> bool {
            self.resized
        }

        fn clear_resize(&mut self) {
            self.resized = false;
        }

        fn close_requested(&self) -> bool {
            self.closed
        }
    }

    #[test]
    fn normal_frames_cycle_slots() {
        let mut backend = MockBackend::new(3);
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();

        let mut slots = Vec::new();
        for _ in 0..10 {
            match scheduler.tick(&mut backend, &mut window).unwrap() {
                TickOutcome::Presented { slot, .. } => slots.push(slot),
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(backend.count(|op| matches!(op, Op::Acquire(_))), 10);
        assert_eq!(backend.count(|op| matches!(op, Op::Submit(_))), 10);
        assert_eq!(backend.count(|op| matches!(op, Op::Present(..))), 10);
        assert_eq!(backend.count(|op| matches!(op, Op::WaitIdle)), 0);
        assert_eq!(scheduler.frame_counter(), 10);
        assert_eq!(scheduler.rebuild_count(), 0);
    }

    #[test]
    fn tick_follows_the_frame_protocol_order() {
        let mut backend = MockBackend::new(3);
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();

        scheduler.tick(&mut backend, &mut window).unwrap();

        assert_eq!(
            backend.ops,
            vec![
                Op::Wait(0),
                Op::Acquire(0),
                Op::Reset(0),
                Op::Record(0, 0),
                Op::Submit(0),
                Op::Present(0, 0),
            ]
        );
        assert_eq!(scheduler.phase(0), SlotPhase::Idle);
    }

    #[test]
    fn waits_and_submits_pair_up_per_slot() {
        let mut backend = MockBackend::new(3);
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();

        for _ in 0..7 {
            scheduler.tick(&mut backend, &mut window).unwrap();
            for slot in 0..N {
                let waits = backend.count(|op| *op == Op::Wait(slot));
                let submits = backend.count(|op| *op == Op::Submit(slot));
                assert_eq!(waits, submits, "slot {}", slot);
            }
        }

        // Each submit is preceded by a wait on the same slot since its last submit
        let mut waited = [false; N];
        for op in &backend.ops {
            match *op {
                Op::Wait(slot) => waited[slot] = true,
                Op::Submit(slot) => {
                    assert!(waited[slot]);
                    waited[slot] = false;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_recording() {
        let mut backend = MockBackend::new(3);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = MockWindow::new(1024, 768);
        let mut scheduler = FrameScheduler::new();

        let outcome = scheduler.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Rebuilt);
        assert_eq!(
            backend.ops,
            vec![Op::Wait(0), Op::Acquire(0), Op::WaitIdle, Op::Rebuild(1024, 768)]
        );
        assert_eq!(scheduler.frame_counter(), 0);
        assert_eq!(scheduler.current_slot(), 0);

        // The next tick reuses slot 0 and goes through normally
        let outcome = scheduler.tick(&mut backend, &mut window).unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Presented {
                slot: 0,
                image_index: 0
            }
        );
        assert_eq!(backend.rebuilds().len(), 1);
    }

    #[test]
    fn missing_image_is_treated_like_out_of_date() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(AcquireOutcome::NoImage);
        let mut window = MockWindow::new(640, 480);
        let mut scheduler = FrameScheduler::new();

        assert_eq!(
            scheduler.tick(&mut backend, &mut window).unwrap(),
            TickOutcome::Rebuilt
        );
        assert_eq!(backend.count(|op| matches!(op, Op::Reset(_))), 0);
        assert_eq!(backend.count(|op| matches!(op, Op::Record(..))), 0);
        assert_eq!(backend.rebuilds(), vec![(640, 480)]);
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let mut backend = MockBackend::new(3);
        backend.acquire_script.push_back(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();

        scheduler.tick(&mut backend, &mut window).unwrap();

        assert_eq!(
            &backend.ops[3..],
            &[
                Op::Record(0, 2),
                Op::Submit(0),
                Op::Present(0, 2),
                Op::WaitIdle,
                Op::Rebuild(800, 600),
            ]
        );
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn present_out_of_date_or_suboptimal_rebuilds() {
        for outcome in [PresentOutcome::OutOfDate, PresentOutcome::Suboptimal] {
            let mut backend = MockBackend::new(3);
            backend.present_script.push_back(outcome);
            let mut window = MockWindow::new(800, 600);
            let mut scheduler = FrameScheduler::new();

            scheduler.tick(&mut backend, &mut window).unwrap();
            scheduler.tick(&mut backend, &mut window).unwrap();

            assert_eq!(backend.rebuilds().len(), 1, "{:?}", outcome);
            assert_eq!(scheduler.frame_counter(), 2);
        }
    }

    #[test]
    fn repeated_resizes_collapse_into_one_rebuild_at_latest_size() {
        let mut backend = MockBackend::new(3);
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();
        scheduler.tick(&mut backend, &mut window).unwrap();

        window.resize(900, 700);
        window.resize(1000, 720);
        window.resize(1280, 800);
        scheduler.tick(&mut backend, &mut window).unwrap();
        scheduler.tick(&mut backend, &mut window).unwrap();

        assert_eq!(backend.rebuilds(), vec![(1280, 800)]);
        assert!(!window.resize_pending());
        // Applied before the acquire of the tick that saw it
        let rebuild_at = backend.ops.iter().position(|op| matches!(op, Op::Rebuild(..))).unwrap();
        assert_eq!(backend.ops[rebuild_at + 1], Op::Wait(1));
    }

    #[test]
    fn device_idle_always_precedes_rebuild() {
        let mut backend = MockBackend::new(3);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        backend.present_script.extend([
            PresentOutcome::Presented,
            PresentOutcome::Suboptimal,
            PresentOutcome::OutOfDate,
        ]);
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();

        for i in 0..6 {
            if i == 4 {
                window.resize(640, 480);
            }
            scheduler.tick(&mut backend, &mut window).unwrap();
        }

        assert_eq!(scheduler.rebuild_count(), 4);
        for (i, op) in backend.ops.iter().enumerate() {
            if matches!(op, Op::Rebuild(..)) {
                assert_eq!(backend.ops[i - 1], Op::WaitIdle);
            }
        }
    }

    #[test]
    fn minimized_window_blocks_rebuild_until_restored() {
        let mut backend = MockBackend::new(3);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut window = MockWindow::new(0, 0);
        window.upcoming_sizes.extend([
            vk::Extent2D { width: 0, height: 0 },
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        ]);
        let mut scheduler = FrameScheduler::new();

        scheduler.tick(&mut backend, &mut window).unwrap();

        assert_eq!(window.waits, 2);
        assert_eq!(backend.rebuilds(), vec![(800, 600)]);
        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn one_zero_dimension_still_counts_as_minimized() {
        let mut window = MockWindow::new(1024, 0);
        window.upcoming_sizes.push_back(vk::Extent2D {
            width: 1024,
            height: 10,
        });

        let extent = wait_for_nonzero_extent(&mut window);
        assert_eq!(extent, Some(vk::Extent2D { width: 1024, height: 10 }));
        assert_eq!(window.waits, 1);
    }

    #[test]
    fn closing_while_minimized_skips_the_rebuild() {
        let mut backend = MockBackend::new(3);
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();
        scheduler.tick(&mut backend, &mut window).unwrap();

        window.resize(0, 0);
        window.closed = true;
        let outcome = scheduler.tick(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, TickOutcome::Closing);
        assert_eq!(window.waits, 0);
        assert!(backend.rebuilds().is_empty());
        assert_eq!(backend.count(|op| matches!(op, Op::WaitIdle)), 0);
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn fatal_acquire_error_propagates_without_reset() {
        let mut backend = MockBackend::new(3);
        backend.fail_acquire = true;
        let mut window = MockWindow::new(800, 600);
        let mut scheduler = FrameScheduler::new();

        let err = scheduler.tick(&mut backend, &mut window).unwrap_err();
        assert!(err.to_string().contains("device lost"));
        assert_eq!(backend.ops, vec![Op::Wait(0), Op::Acquire(0)]);
    }
}
